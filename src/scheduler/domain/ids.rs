//! Identifier and validated scalar types for the scheduler domain.

use super::SchedulerDomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Branch polled when a repository reference names none.
pub const DEFAULT_BRANCH: &str = "main";

/// Shortest accepted commit identifier (abbreviated SHAs included).
const MIN_SHA_LENGTH: usize = 2;

/// Longest accepted commit identifier (SHA-256 object names).
const MAX_SHA_LENGTH: usize = 64;

/// Identity of one supervised repository branch.
///
/// Tasks are keyed by this value, so two references are the same task only
/// when owner, name and branch all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryRef {
    owner: String,
    name: String,
    branch: String,
}

impl RepositoryRef {
    /// Creates a validated repository reference.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerDomainError::InvalidRepository`] when the owner or
    /// name is empty, contains whitespace or a slash, and
    /// [`SchedulerDomainError::InvalidBranch`] when the branch is empty or
    /// contains whitespace.
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        branch: impl Into<String>,
    ) -> Result<Self, SchedulerDomainError> {
        let owner_segment = owner.into().trim().to_owned();
        let name_segment = name.into().trim().to_owned();
        let branch_name = branch.into().trim().to_owned();

        if !is_valid_segment(&owner_segment) || !is_valid_segment(&name_segment) {
            return Err(SchedulerDomainError::InvalidRepository(format!(
                "{owner_segment}/{name_segment}"
            )));
        }
        if branch_name.is_empty() || branch_name.chars().any(char::is_whitespace) {
            return Err(SchedulerDomainError::InvalidBranch(branch_name));
        }

        Ok(Self {
            owner: owner_segment,
            name: name_segment,
            branch: branch_name,
        })
    }

    /// Creates a reference on the default branch.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerDomainError::InvalidRepository`] for invalid owner
    /// or name segments.
    pub fn on_default_branch(
        owner: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, SchedulerDomainError> {
        Self::new(owner, name, DEFAULT_BRANCH)
    }

    /// Parses `owner/name` or `owner/name@branch`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerDomainError`] when the value is malformed.
    pub fn parse(value: &str) -> Result<Self, SchedulerDomainError> {
        let trimmed = value.trim();
        let (full_name, branch) = trimmed
            .split_once('@')
            .unwrap_or((trimmed, DEFAULT_BRANCH));
        let (owner, name) = full_name
            .split_once('/')
            .ok_or_else(|| SchedulerDomainError::InvalidRepository(value.to_owned()))?;
        Self::new(owner, name, branch)
            .map_err(|err| match err {
                SchedulerDomainError::InvalidRepository(_) => {
                    SchedulerDomainError::InvalidRepository(value.to_owned())
                }
                other => other,
            })
    }

    /// Returns the repository owner.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Returns the repository name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the polled branch.
    #[must_use]
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Returns `owner/name`.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.chars().any(|ch| ch.is_whitespace() || ch == '/')
}

impl FromStr for RepositoryRef {
    type Err = SchedulerDomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.name, self.branch)
    }
}

/// Hexadecimal commit identifier, normalized to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommitSha(String);

impl CommitSha {
    /// Creates a validated commit identifier.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerDomainError::InvalidCommitSha`] when the value is
    /// not 2 to 64 hexadecimal characters.
    pub fn new(value: impl Into<String>) -> Result<Self, SchedulerDomainError> {
        let raw = value.into();
        let normalized = raw.trim().to_ascii_lowercase();
        let is_valid = (MIN_SHA_LENGTH..=MAX_SHA_LENGTH).contains(&normalized.len())
            && normalized.chars().all(|ch| ch.is_ascii_hexdigit());
        if !is_valid {
            return Err(SchedulerDomainError::InvalidCommitSha(raw));
        }
        Ok(Self(normalized))
    }

    /// Returns the identifier as `str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the conventional seven-character abbreviation.
    #[must_use]
    pub fn short(&self) -> String {
        self.0.chars().take(7).collect()
    }
}

impl TryFrom<String> for CommitSha {
    type Error = SchedulerDomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CommitSha> for String {
    fn from(value: CommitSha) -> Self {
        value.0
    }
}

impl AsRef<str> for CommitSha {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for CommitSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
