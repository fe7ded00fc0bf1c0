//! Polling task aggregate and its read-only snapshot.
//!
//! A [`Task`] is owned by exactly one polling loop. Commit bookkeeping uses
//! two markers:
//!
//! - the *watermark*, below which every commit is handled. It is the `since`
//!   argument of each listing and only moves across a contiguous prefix of
//!   handled commits, so a failed commit is listed again on the next run.
//! - the *last processed commit*, the newest commit whose pipeline succeeded.
//!
//! Commits above the watermark carry a [`CommitProgress`] entry so that
//! already-successful commits are skipped when they are listed again.

use super::{CommitSha, RepositoryRef};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Whether a task is allowed to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Runs whenever the task is due.
    Active,
    /// Source control rejected the credentials; no runs until reauthorized.
    Disabled {
        /// Authorization failure reported by source control.
        reason: String,
    },
}

impl TaskStatus {
    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled { .. } => "disabled",
        }
    }
}

/// Handling state of a commit above the watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CommitProgress {
    /// The pipeline succeeded.
    Succeeded,
    /// The pipeline failed and the commit will be retried.
    Failed {
        /// Failed attempts so far.
        attempts: u32,
    },
    /// The retry budget is exhausted; the commit is skipped for good.
    Abandoned {
        /// Failed attempts before giving up.
        attempts: u32,
    },
}

impl CommitProgress {
    /// Returns whether the commit no longer blocks the watermark.
    #[must_use]
    pub const fn is_handled(self) -> bool {
        matches!(self, Self::Succeeded | Self::Abandoned { .. })
    }
}

/// Outcome of recording a failed pipeline attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// The commit stays below the watermark and is retried on the next run.
    Retry {
        /// Failed attempts so far.
        attempts: u32,
    },
    /// The retry budget is exhausted.
    Abandoned {
        /// Failed attempts before giving up.
        attempts: u32,
    },
}

/// Supervised polling state for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    repository: RepositoryRef,
    interval: Duration,
    last_run_at: DateTime<Utc>,
    last_processed_commit: Option<CommitSha>,
    watermark: Option<CommitSha>,
    progress: HashMap<CommitSha, CommitProgress>,
    running: bool,
    run_requested: bool,
    status: TaskStatus,
    counters: TaskCounters,
    last_error: Option<String>,
}

/// Lifetime counters reported in snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounters {
    /// Completed runs.
    pub runs: u64,
    /// Commits whose pipeline succeeded.
    pub processed: u64,
    /// Failed pipeline attempts.
    pub failed_attempts: u64,
    /// Commits given up on after exhausting their retry budget.
    pub abandoned: u64,
}

impl Task {
    /// Creates a task whose marker starts at the repository's known head.
    #[must_use]
    pub fn new(
        repository: RepositoryRef,
        interval: Duration,
        known_head: Option<CommitSha>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            repository,
            interval,
            last_run_at: created_at,
            last_processed_commit: known_head.clone(),
            watermark: known_head,
            progress: HashMap::new(),
            running: false,
            run_requested: false,
            status: TaskStatus::Active,
            counters: TaskCounters::default(),
            last_error: None,
        }
    }

    /// Returns the supervised repository.
    #[must_use]
    pub const fn repository(&self) -> &RepositoryRef {
        &self.repository
    }

    /// Returns the minimum duration between runs.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the completion time of the last run (creation time initially).
    #[must_use]
    pub const fn last_run_at(&self) -> DateTime<Utc> {
        self.last_run_at
    }

    /// Returns the newest commit whose pipeline succeeded.
    #[must_use]
    pub const fn last_processed_commit(&self) -> Option<&CommitSha> {
        self.last_processed_commit.as_ref()
    }

    /// Returns the boundary below which all commits are handled.
    #[must_use]
    pub const fn watermark(&self) -> Option<&CommitSha> {
        self.watermark.as_ref()
    }

    /// Returns whether a run is in progress.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Returns whether the task was disabled by an authorization failure.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        matches!(self.status, TaskStatus::Disabled { .. })
    }

    /// Returns the task status.
    #[must_use]
    pub const fn status(&self) -> &TaskStatus {
        &self.status
    }

    /// Returns the recorded progress for a commit above the watermark.
    #[must_use]
    pub fn progress(&self, sha: &CommitSha) -> Option<CommitProgress> {
        self.progress.get(sha).copied()
    }

    /// Returns whether the commit needs no further pipeline attempts.
    #[must_use]
    pub fn is_handled(&self, sha: &CommitSha) -> bool {
        self.progress(sha).is_some_and(CommitProgress::is_handled)
    }

    /// Returns whether a run should start at `now`.
    ///
    /// A pending manual trigger makes the task due regardless of interval.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.run_requested {
            return true;
        }
        let interval = TimeDelta::from_std(self.interval).unwrap_or(TimeDelta::MAX);
        now.signed_duration_since(self.last_run_at) >= interval
    }

    /// Requests a run on the next wake regardless of interval.
    pub const fn request_run(&mut self) {
        self.run_requested = true;
    }

    /// Marks a run as started.
    pub const fn begin_run(&mut self) {
        self.running = true;
        self.run_requested = false;
    }

    /// Marks the run as completed at `finished_at`.
    pub const fn finish_run(&mut self, finished_at: DateTime<Utc>) {
        self.last_run_at = finished_at;
        self.running = false;
        self.counters.runs = self.counters.runs.saturating_add(1);
    }

    /// Records a successful pipeline for `sha`.
    ///
    /// `later_in_batch` lists the commits fetched after `sha` in the same
    /// run. The last processed commit only moves when none of them has
    /// already succeeded, so retrying an older commit never regresses it.
    pub fn record_success(&mut self, sha: &CommitSha, later_in_batch: &[CommitSha]) {
        self.progress.insert(sha.clone(), CommitProgress::Succeeded);
        self.counters.processed = self.counters.processed.saturating_add(1);
        let newer_already_processed = later_in_batch
            .iter()
            .any(|later| Some(later) == self.last_processed_commit.as_ref());
        if !newer_already_processed {
            self.last_processed_commit = Some(sha.clone());
        }
    }

    /// Records a failed pipeline attempt for `sha`.
    ///
    /// The commit is abandoned once it has failed `max_attempts` times; a
    /// budget of zero is treated as one attempt.
    pub fn record_failure(
        &mut self,
        sha: &CommitSha,
        max_attempts: u32,
        error: impl Into<String>,
    ) -> FailureDisposition {
        self.counters.failed_attempts = self.counters.failed_attempts.saturating_add(1);
        self.last_error = Some(error.into());

        let previous = match self.progress(sha) {
            Some(CommitProgress::Failed { attempts }) => attempts,
            _ => 0,
        };
        let attempts = previous.saturating_add(1);
        if attempts >= max_attempts.max(1) {
            self.progress
                .insert(sha.clone(), CommitProgress::Abandoned { attempts });
            self.counters.abandoned = self.counters.abandoned.saturating_add(1);
            FailureDisposition::Abandoned { attempts }
        } else {
            self.progress
                .insert(sha.clone(), CommitProgress::Failed { attempts });
            FailureDisposition::Retry { attempts }
        }
    }

    /// Records a run-level error such as a failed listing.
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    /// Moves the watermark across the handled prefix of `batch`.
    ///
    /// `batch` is the oldest-first listing fetched from the current
    /// watermark. Progress entries at or below the new watermark are pruned.
    pub fn advance_watermark(&mut self, batch: &[CommitSha]) {
        let handled_prefix = batch
            .iter()
            .take_while(|sha| self.is_handled(sha))
            .collect::<Vec<_>>();
        let Some(new_watermark) = handled_prefix.last() else {
            return;
        };
        self.watermark = Some((*new_watermark).clone());
        for sha in &handled_prefix {
            self.progress.remove(*sha);
        }
    }

    /// Disables the task after an authorization failure.
    pub fn disable(&mut self, reason: impl Into<String>) {
        let text = reason.into();
        self.last_error = Some(text.clone());
        self.status = TaskStatus::Disabled { reason: text };
    }

    /// Re-enables a disabled task.
    pub fn reauthorize(&mut self) {
        self.status = TaskStatus::Active;
    }

    /// Returns a read-only copy of the observable state.
    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        let pending_retries = self
            .progress
            .values()
            .filter(|progress| matches!(progress, CommitProgress::Failed { .. }))
            .count();
        TaskSnapshot {
            repository: self.repository.clone(),
            interval: self.interval,
            last_run_at: self.last_run_at,
            last_processed_commit: self.last_processed_commit.clone(),
            watermark: self.watermark.clone(),
            running: self.running,
            status: self.status.clone(),
            pending_retries,
            counters: self.counters,
            last_error: self.last_error.clone(),
        }
    }
}

/// Read-only view of a task, published by its polling loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Supervised repository.
    pub repository: RepositoryRef,
    /// Minimum duration between runs.
    pub interval: Duration,
    /// Completion time of the last run.
    pub last_run_at: DateTime<Utc>,
    /// Newest commit whose pipeline succeeded.
    pub last_processed_commit: Option<CommitSha>,
    /// Boundary below which all commits are handled.
    pub watermark: Option<CommitSha>,
    /// Whether a run is in progress.
    pub running: bool,
    /// Task status.
    pub status: TaskStatus,
    /// Failed commits waiting for another attempt.
    pub pending_retries: usize,
    /// Lifetime counters.
    pub counters: TaskCounters,
    /// Most recent error text, if any.
    pub last_error: Option<String>,
}
