//! In-memory source control for tests and local runs.

use crate::scheduler::{
    domain::{CommitRecord, CommitSha, RepositoryRef},
    ports::{PutFileRequest, SourceControlClient, SourceControlError, SourceControlResult},
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

/// Thread-safe in-memory repository host.
///
/// Commits are appended with [`Self::push_commit`]. Listing and publishing
/// failures can be scripted per repository; each scripted failure is
/// returned once, in the order it was queued.
#[derive(Debug, Clone, Default)]
pub struct InMemorySourceControl {
    state: Arc<RwLock<InMemorySourceControlState>>,
}

#[derive(Debug, Default)]
struct InMemorySourceControlState {
    repositories: HashMap<RepositoryRef, RepositoryState>,
}

#[derive(Debug, Default)]
struct RepositoryState {
    commits: Vec<CommitRecord>,
    files: HashMap<String, StoredFile>,
    writes: Vec<PutFileRequest>,
    fetches: Vec<Vec<CommitSha>>,
    listing_failures: VecDeque<SourceControlError>,
    publish_failures: VecDeque<SourceControlError>,
}

#[derive(Debug, Clone)]
struct StoredFile {
    content: String,
    hash: String,
}

fn content_hash(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

fn lock_error(err: &impl ToString) -> SourceControlError {
    SourceControlError::transient(std::io::Error::other(err.to_string()))
}

impl InMemorySourceControl {
    /// Creates an empty host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a commit to the repository branch.
    pub fn push_commit(&self, repository: &RepositoryRef, commit: CommitRecord) {
        self.with_repository(repository, |repo| repo.commits.push(commit));
    }

    /// Queues a failure for the next listing of `repository`.
    pub fn fail_next_listing(&self, repository: &RepositoryRef, error: SourceControlError) {
        self.with_repository(repository, |repo| repo.listing_failures.push_back(error));
    }

    /// Queues a failure for the next file write to `repository`.
    pub fn fail_next_publish(&self, repository: &RepositoryRef, error: SourceControlError) {
        self.with_repository(repository, |repo| repo.publish_failures.push_back(error));
    }

    /// Returns the commits returned by each successful listing, in order.
    #[must_use]
    pub fn fetches(&self, repository: &RepositoryRef) -> Vec<Vec<CommitSha>> {
        self.read_repository(repository, |repo| repo.fetches.clone())
    }

    /// Returns every accepted file write, in order.
    #[must_use]
    pub fn writes(&self, repository: &RepositoryRef) -> Vec<PutFileRequest> {
        self.read_repository(repository, |repo| repo.writes.clone())
    }

    /// Returns the stored content of a file.
    #[must_use]
    pub fn file_content(&self, repository: &RepositoryRef, path: &str) -> Option<String> {
        self.read_repository(repository, |repo| {
            repo.files.get(path).map(|file| file.content.clone())
        })
    }

    /// Returns the stored file paths, sorted.
    #[must_use]
    pub fn file_paths(&self, repository: &RepositoryRef) -> Vec<String> {
        let mut paths = self.read_repository(repository, |repo| {
            repo.files.keys().cloned().collect::<Vec<_>>()
        });
        paths.sort();
        paths
    }

    fn with_repository(&self, repository: &RepositoryRef, apply: impl FnOnce(&mut RepositoryState)) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        apply(state.repositories.entry(repository.clone()).or_default());
    }

    fn read_repository<T: Default>(
        &self,
        repository: &RepositoryRef,
        read: impl FnOnce(&RepositoryState) -> T,
    ) -> T {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.repositories.get(repository).map(read).unwrap_or_default()
    }
}

#[async_trait]
impl SourceControlClient for InMemorySourceControl {
    async fn head(&self, repository: &RepositoryRef) -> SourceControlResult<Option<CommitSha>> {
        let state = self.state.read().map_err(|err| lock_error(&err))?;
        Ok(state
            .repositories
            .get(repository)
            .and_then(|repo| repo.commits.last())
            .map(|commit| commit.sha().clone()))
    }

    async fn list_commits_since(
        &self,
        repository: &RepositoryRef,
        since: Option<&CommitSha>,
    ) -> SourceControlResult<Vec<CommitRecord>> {
        let mut state = self.state.write().map_err(|err| lock_error(&err))?;
        let repo = state.repositories.entry(repository.clone()).or_default();
        if let Some(error) = repo.listing_failures.pop_front() {
            return Err(error);
        }

        // An unknown `since` lists the whole branch.
        let start = since
            .and_then(|sha| repo.commits.iter().position(|commit| commit.sha() == sha))
            .map_or(0, |position| position.saturating_add(1));
        let commits = repo.commits.get(start..).unwrap_or_default().to_vec();
        repo.fetches
            .push(commits.iter().map(|commit| commit.sha().clone()).collect());
        Ok(commits)
    }

    async fn file_hash(
        &self,
        repository: &RepositoryRef,
        path: &str,
    ) -> SourceControlResult<Option<String>> {
        let state = self.state.read().map_err(|err| lock_error(&err))?;
        Ok(state
            .repositories
            .get(repository)
            .and_then(|repo| repo.files.get(path))
            .map(|file| file.hash.clone()))
    }

    async fn put_file(
        &self,
        repository: &RepositoryRef,
        request: PutFileRequest,
    ) -> SourceControlResult<String> {
        let mut state = self.state.write().map_err(|err| lock_error(&err))?;
        let repo = state.repositories.entry(repository.clone()).or_default();
        if let Some(error) = repo.publish_failures.pop_front() {
            return Err(error);
        }

        let stored_hash = repo.files.get(&request.path).map(|file| file.hash.as_str());
        if stored_hash != request.existing_hash.as_deref() {
            return Err(SourceControlError::Conflict { path: request.path });
        }

        let hash = content_hash(&request.content);
        repo.files.insert(
            request.path.clone(),
            StoredFile {
                content: request.content.clone(),
                hash: hash.clone(),
            },
        );
        repo.writes.push(request);
        Ok(hash)
    }
}
