use memchr::memmem;

/// Locate where `tag` starts, or might start, in `buffer`.
///
/// - `None` when `tag` is empty.
/// - The first full occurrence of `tag`, if any; a direct match always wins.
/// - Otherwise the start of the longest suffix of `buffer` that is a prefix of
///   `tag`, i.e. a tag that may complete once more input arrives.
/// - `None` when no suffix of `buffer` can begin `tag`.
///
/// The comparison is bytewise. Because `buffer` is valid UTF-8 and a tag's
/// first byte is never a continuation byte, any returned index is a char
/// boundary of `buffer`.
#[must_use]
pub fn find_potential_start(buffer: &str, tag: &str) -> Option<usize> {
    if tag.is_empty() {
        return None;
    }
    let haystack = buffer.as_bytes();
    let needle = tag.as_bytes();

    if let Some(index) = memmem::find(haystack, needle) {
        return Some(index);
    }

    // No full match, so only the last `tag.len() - 1` bytes can hold a prefix.
    // Walking start positions upward finds the longest such suffix first.
    let first_candidate = haystack.len().saturating_sub(needle.len() - 1);
    (first_candidate..haystack.len()).find(|&start| needle.starts_with(&haystack[start..]))
}
