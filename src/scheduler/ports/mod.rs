//! Port contracts for the collaborators the scheduler drives.

mod generator;
mod index;
mod source_control;

#[cfg(test)]
pub use generator::MockContentGenerator;
pub use generator::{ContentGenerator, GenerationError, GenerationResult};
pub use index::{EmbeddingIndex, IndexError, IndexResult, ScoredText};
pub use source_control::{
    PutFileRequest, SourceControlClient, SourceControlError, SourceControlResult,
};
