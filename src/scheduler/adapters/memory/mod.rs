//! In-memory adapters for tests and local runs.

mod index;
mod source_control;

pub use index::InMemoryEmbeddingIndex;
pub use source_control::InMemorySourceControl;
