//! Error types for scheduler domain validation.

use thiserror::Error;

/// Errors returned while constructing scheduler domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerDomainError {
    /// The repository reference does not follow `owner/name[@branch]`.
    #[error("invalid repository reference '{0}', expected owner/name[@branch]")]
    InvalidRepository(String),

    /// The branch name is empty or contains whitespace.
    #[error("invalid branch name '{0}'")]
    InvalidBranch(String),

    /// The commit identifier is not a hexadecimal SHA.
    #[error("invalid commit sha '{0}'")]
    InvalidCommitSha(String),
}
