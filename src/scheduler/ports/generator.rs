//! Content generation port: embeddings and article prose.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type for content generation operations.
pub type GenerationResult<T> = Result<T, GenerationError>;

/// Generative backend contract.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Embeds `text` into a fixed-dimension vector.
    async fn embed(&self, text: &str) -> GenerationResult<Vec<f32>>;

    /// Generates article text for `topic`, grounded on `references`
    /// (nearest first).
    async fn generate(&self, topic: &str, references: &[String]) -> GenerationResult<String>;
}

/// Errors returned by content generation adapters.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// The backend could not be reached or failed internally.
    #[error("generation backend failure: {0}")]
    Backend(Arc<dyn std::error::Error + Send + Sync>),

    /// The backend refused the request.
    #[error("generation request rejected: {0}")]
    Rejected(String),

    /// The backend answered without usable content.
    #[error("generation backend returned no content")]
    EmptyResponse,
}

impl GenerationError {
    /// Wraps a backend failure.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Arc::new(err))
    }
}
