//! Source-control port for commit discovery and article publishing.

use crate::scheduler::domain::{CommitRecord, CommitSha, RepositoryRef};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Result type for source-control operations.
pub type SourceControlResult<T> = Result<T, SourceControlError>;

/// File write request.
///
/// `existing_hash` must carry the current content hash when the file
/// already exists; the write is then an update rather than a create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutFileRequest {
    /// Repository-relative file path.
    pub path: String,
    /// Full file content.
    pub content: String,
    /// Commit message for the write.
    pub message: String,
    /// Content hash of the file being replaced, if any.
    pub existing_hash: Option<String>,
}

/// Source-control contract consumed by the scheduler.
#[async_trait]
pub trait SourceControlClient: Send + Sync {
    /// Returns the current head of the repository branch.
    ///
    /// Returns `None` when the branch has no commits yet.
    async fn head(&self, repository: &RepositoryRef) -> SourceControlResult<Option<CommitSha>>;

    /// Lists commits newer than `since`, oldest first.
    ///
    /// With `since = None` the reachable history is listed. The result is
    /// empty when nothing is newer than `since`.
    async fn list_commits_since(
        &self,
        repository: &RepositoryRef,
        since: Option<&CommitSha>,
    ) -> SourceControlResult<Vec<CommitRecord>>;

    /// Returns the content hash of an existing file, or `None` if absent.
    async fn file_hash(
        &self,
        repository: &RepositoryRef,
        path: &str,
    ) -> SourceControlResult<Option<String>>;

    /// Creates or updates a file and returns its new content hash.
    async fn put_file(
        &self,
        repository: &RepositoryRef,
        request: PutFileRequest,
    ) -> SourceControlResult<String>;
}

/// Errors returned by source-control adapters.
#[derive(Debug, Clone, Error)]
pub enum SourceControlError {
    /// Network or provider failure expected to clear on a later attempt.
    #[error("transient source-control failure: {0}")]
    TransientNetwork(Arc<dyn std::error::Error + Send + Sync>),

    /// Credentials were rejected or the repository is not accessible.
    #[error("source-control authorization failed: {0}")]
    Auth(String),

    /// The supplied content hash does not match the stored file.
    #[error("content hash conflict for '{path}'")]
    Conflict {
        /// Path of the conflicting file.
        path: String,
    },

    /// The provider rejected the file write.
    #[error("publish failed: {0}")]
    Publish(Arc<dyn std::error::Error + Send + Sync>),

    /// The provider returned a payload that could not be interpreted.
    #[error("invalid source-control response: {0}")]
    InvalidResponse(String),
}

impl SourceControlError {
    /// Wraps a transient network failure.
    pub fn transient(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::TransientNetwork(Arc::new(err))
    }

    /// Wraps a rejected file write.
    pub fn publish(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Publish(Arc::new(err))
    }

    /// Creates an authorization failure.
    pub fn auth(reason: impl Into<String>) -> Self {
        Self::Auth(reason.into())
    }

    /// Returns whether the error is an authorization failure.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}
