//! Commit records produced by source control and consumed by the pipeline.

use super::CommitSha;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Author metadata attached to a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthor {
    /// Display name of the author.
    pub name: String,
    /// Author e-mail address, when published by the provider.
    pub email: Option<String>,
}

impl CommitAuthor {
    /// Creates author metadata without an e-mail address.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: None,
        }
    }

    /// Sets the author e-mail address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Immutable commit value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    sha: CommitSha,
    message: String,
    author: CommitAuthor,
    committed_at: DateTime<Utc>,
}

impl CommitRecord {
    /// Creates a commit record.
    #[must_use]
    pub fn new(
        sha: CommitSha,
        message: impl Into<String>,
        author: CommitAuthor,
        committed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sha,
            message: message.into(),
            author,
            committed_at,
        }
    }

    /// Returns the commit identifier.
    #[must_use]
    pub const fn sha(&self) -> &CommitSha {
        &self.sha
    }

    /// Returns the full commit message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the commit author.
    #[must_use]
    pub const fn author(&self) -> &CommitAuthor {
        &self.author
    }

    /// Returns the commit timestamp.
    #[must_use]
    pub const fn committed_at(&self) -> DateTime<Utc> {
        self.committed_at
    }
}
