use std::sync::atomic::{AtomicU64, Ordering};

/// Cheap, collision-resistant message ids: a random 128-bit seed XOR a
/// process-wide sequence number.
pub struct MessageIdGenerator {
    seed: u128,
    counter: AtomicU64,
}

impl MessageIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        let seed_hi = u128::from(fastrand::u64(..));
        let seed_lo = u128::from(fastrand::u64(..));
        Self {
            seed: (seed_hi << 64) | seed_lo,
            counter: AtomicU64::new(1),
        }
    }

    pub fn next_seq(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    #[must_use]
    pub fn message_uuid(&self, seq: u64) -> uuid::Uuid {
        uuid::Uuid::from_u128(self.seed ^ u128::from(seq))
    }

    /// Next id in the `msg_<32 hex>` form used as the registry key.
    #[must_use]
    pub fn next_message_id(&self) -> String {
        let uuid = self.message_uuid(self.next_seq());
        format!("msg_{}", uuid.simple())
    }
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
