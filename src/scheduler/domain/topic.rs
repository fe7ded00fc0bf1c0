//! Article topics derived from commit messages.
//!
//! Extraction is a local, deterministic heuristic over the commit subject.
//! It never fails: when nothing meaningful can be extracted the raw message
//! is used, and an empty message falls back to the abbreviated commit SHA.

use super::CommitRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Slug used when a topic contains no path-safe characters.
const UNTITLED_SLUG: &str = "untitled";

/// Longest alphabetic prefix treated as a conventional-commit type.
const MAX_COMMIT_TYPE_LENGTH: usize = 16;

/// Article topic extracted from a commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Extracts the topic for a commit.
    #[must_use]
    pub fn from_commit(commit: &CommitRecord) -> Self {
        if let Some(topic) = extract_subject(commit.message()) {
            return Self(topic);
        }
        let raw = commit.message().trim();
        if raw.is_empty() {
            Self(format!("commit {}", commit.sha().short()))
        } else {
            Self(raw.to_owned())
        }
    }

    /// Returns the topic text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the normalized file-name slug for this topic.
    ///
    /// Letters are lower-cased; whitespace, underscores, dots and slashes
    /// become hyphens; other punctuation is dropped and hyphen runs collapse.
    #[must_use]
    pub fn slug(&self) -> String {
        let mut slug = String::with_capacity(self.0.len());
        for ch in self.0.chars().flat_map(char::to_lowercase) {
            if ch.is_whitespace() || matches!(ch, '_' | '-' | '.' | '/') {
                if !slug.is_empty() && !slug.ends_with('-') {
                    slug.push('-');
                }
            } else if ch.is_alphanumeric() {
                slug.push(ch);
            }
        }
        while slug.ends_with('-') {
            slug.pop();
        }
        if slug.is_empty() {
            UNTITLED_SLUG.to_owned()
        } else {
            slug
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn extract_subject(message: &str) -> Option<String> {
    let subject = message.lines().map(str::trim).find(|line| !line.is_empty())?;
    let without_type = strip_commit_type(subject);
    let without_reference = strip_pull_request_reference(without_type);
    let topic = without_reference.trim().trim_end_matches('.').trim();
    if topic.is_empty() {
        None
    } else {
        Some(topic.to_owned())
    }
}

/// Removes a `type(scope)!: ` conventional-commit prefix.
fn strip_commit_type(subject: &str) -> &str {
    let Some((prefix, rest)) = subject.split_once(": ") else {
        return subject;
    };
    let head = prefix.strip_suffix('!').unwrap_or(prefix);
    let kind = match head.split_once('(') {
        Some((name, scope)) if scope.ends_with(')') => name,
        Some(_) => return subject,
        None => head,
    };
    let is_commit_type = !kind.is_empty()
        && kind.len() <= MAX_COMMIT_TYPE_LENGTH
        && kind.chars().all(|ch| ch.is_ascii_alphabetic());
    if is_commit_type { rest } else { subject }
}

/// Removes a trailing ` (#123)` pull-request reference.
fn strip_pull_request_reference(subject: &str) -> &str {
    let Some((before, reference)) = subject.rsplit_once(" (#") else {
        return subject;
    };
    match reference.strip_suffix(')') {
        Some(number) if !number.is_empty() && number.chars().all(|ch| ch.is_ascii_digit()) => {
            before
        }
        _ => subject,
    }
}
