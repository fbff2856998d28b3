mod cancel_registry;
mod request_id;

use std::sync::Arc;

use crate::config::{AppConfig, ConfigError};
use crate::pipeline::ResponseEventPipeline;
use crate::tags::TagDictionary;

pub use cancel_registry::{CancellationRegistry, RegistrationGuard, DEFAULT_REGISTRY_SHARDS};
pub use request_id::MessageIdGenerator;

/// Shared application state: the configured pipeline and its registry.
pub struct AppState {
    pub config: AppConfig,
    pipeline: ResponseEventPipeline,
    message_ids: MessageIdGenerator,
}

impl AppState {
    /// Build state from a validated config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when a tag dialect pattern does not
    /// compile.
    pub fn new(config: AppConfig) -> Result<Self, ConfigError> {
        let tags = TagDictionary::from_config(&config.tags)?;
        let registry = CancellationRegistry::new(config.pipeline.registry_shards);
        Ok(Self {
            pipeline: ResponseEventPipeline::new(Arc::new(registry), Arc::new(tags)),
            message_ids: MessageIdGenerator::new(),
            config,
        })
    }

    #[must_use]
    pub fn pipeline(&self) -> &ResponseEventPipeline {
        &self.pipeline
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<CancellationRegistry> {
        self.pipeline.registry()
    }

    #[must_use]
    pub fn next_message_id(&self) -> String {
        self.message_ids.next_message_id()
    }
}
