//! Embedding index port for article retrieval.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Result type for embedding index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Stored text returned by a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredText {
    /// Stored text.
    pub text: String,
    /// Distance from the query vector; smaller is nearer.
    pub distance: f32,
}

/// Vector index contract.
#[async_trait]
pub trait EmbeddingIndex: Send + Sync {
    /// Returns up to `top_k` stored texts nearest to `vector`, by ascending
    /// distance. An unknown or empty collection yields an empty result.
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> IndexResult<Vec<ScoredText>>;

    /// Stores `text` under `vector`.
    async fn insert(&self, collection: &str, text: &str, vector: &[f32]) -> IndexResult<()>;
}

/// Errors returned by embedding index adapters.
#[derive(Debug, Clone, Error)]
pub enum IndexError {
    /// The vector length differs from the collection's dimension.
    #[error("vector dimension mismatch in '{collection}': expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Collection name.
        collection: String,
        /// Dimension of vectors already stored.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },

    /// Backend failure.
    #[error("embedding index failure: {0}")]
    Backend(Arc<dyn std::error::Error + Send + Sync>),
}

impl IndexError {
    /// Wraps a backend failure.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Arc::new(err))
    }
}
