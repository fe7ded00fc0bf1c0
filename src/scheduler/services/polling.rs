//! Per-task polling loop.
//!
//! Each loop owns its [`Task`] outright. It wakes at the scheduler's fixed
//! tick, decides whether the task is due, and executes a run inline, so two
//! runs of the same task can never overlap. Outside code sends
//! [`TaskCommand`]s in and reads [`TaskSnapshot`]s out.

use crate::scheduler::{
    domain::{CommitSha, FailureDisposition, Task, TaskSnapshot},
    ports::{ContentGenerator, EmbeddingIndex, SourceControlClient, SourceControlError},
    services::{PipelineExecutor, SchedulerConfig},
};
use mockable::Clock;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Instruction delivered to a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCommand {
    /// Run on the next wake regardless of interval.
    RunNow,
    /// Re-enable a task disabled by an authorization failure.
    Reauthorize,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEnd {
    /// Every fetched commit was visited.
    Completed,
    /// Cancellation was observed between commits.
    Cancelled,
    /// Commits could not be listed; the run is retried on the next schedule.
    ListingFailed(String),
    /// Source control rejected the credentials; the task is now disabled.
    Disabled(String),
}

/// Summary of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Commits listed for this run, oldest first.
    pub fetched: Vec<CommitSha>,
    /// Commits whose pipeline succeeded in this run.
    pub processed: Vec<CommitSha>,
    /// Commits whose pipeline failed and will be retried.
    pub failed: Vec<CommitSha>,
    /// Commits given up on in this run.
    pub abandoned: Vec<CommitSha>,
    /// Commits skipped because an earlier run already handled them.
    pub skipped: Vec<CommitSha>,
    /// How the run ended.
    pub end: RunEnd,
}

impl RunReport {
    const fn new(end: RunEnd) -> Self {
        Self {
            fetched: Vec::new(),
            processed: Vec::new(),
            failed: Vec::new(),
            abandoned: Vec::new(),
            skipped: Vec::new(),
            end,
        }
    }
}

/// Result of a single wake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeOutcome {
    /// The task was not due, or a run was already in progress.
    Idle,
    /// The task is disabled and waits for reauthorization.
    Disabled,
    /// A run executed.
    Ran(RunReport),
}

/// Timer-driven loop bound to one task.
pub struct PollingLoop<S, G, I, C>
where
    S: SourceControlClient,
    G: ContentGenerator,
    I: EmbeddingIndex,
    C: Clock + Send + Sync,
{
    task: Task,
    source_control: Arc<S>,
    executor: PipelineExecutor<S, G, I>,
    clock: Arc<C>,
    config: SchedulerConfig,
    snapshots: watch::Sender<TaskSnapshot>,
}

impl<S, G, I, C> PollingLoop<S, G, I, C>
where
    S: SourceControlClient,
    G: ContentGenerator,
    I: EmbeddingIndex,
    C: Clock + Send + Sync,
{
    /// Creates a loop that owns `task`.
    #[must_use]
    pub fn new(
        task: Task,
        source_control: Arc<S>,
        executor: PipelineExecutor<S, G, I>,
        clock: Arc<C>,
        config: SchedulerConfig,
    ) -> Self {
        let (snapshots, _) = watch::channel(task.snapshot());
        Self {
            task,
            source_control,
            executor,
            clock,
            config,
            snapshots,
        }
    }

    /// Returns a receiver for the task's published snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TaskSnapshot> {
        self.snapshots.subscribe()
    }

    /// Returns the owned task.
    #[must_use]
    pub const fn task(&self) -> &Task {
        &self.task
    }

    /// Drives the loop until `cancel` fires.
    ///
    /// The first wake happens one tick after start. Cancellation is observed
    /// between wakes and between commits; a commit already in the pipeline
    /// always completes.
    pub async fn run(
        mut self,
        cancel: CancellationToken,
        mut commands: mpsc::UnboundedReceiver<TaskCommand>,
    ) {
        let tick = self.config.effective_tick();
        let now = Instant::now();
        let mut ticker = time::interval_at(now.checked_add(tick).unwrap_or(now), tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.task.interval(), tick = ?tick, "polling loop started");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(command) = commands.recv() => self.handle_command(command),
                _ = ticker.tick() => {
                    self.on_wake(&cancel).await;
                }
            }
        }

        info!("polling loop stopped");
    }

    /// Applies a command from the registry.
    pub fn handle_command(&mut self, command: TaskCommand) {
        match command {
            TaskCommand::RunNow => {
                debug!("run requested");
                self.task.request_run();
            }
            TaskCommand::Reauthorize => {
                if self.task.is_disabled() {
                    info!("task reauthorized");
                }
                self.task.reauthorize();
            }
        }
        self.publish_snapshot();
    }

    /// Handles one wake: runs the task when it is due and idle.
    ///
    /// `last_run_at` is stamped when the run completes, so a slow run delays
    /// the next one instead of stacking another behind it.
    pub async fn on_wake(&mut self, cancel: &CancellationToken) -> WakeOutcome {
        if self.task.is_disabled() {
            return WakeOutcome::Disabled;
        }
        if self.task.is_running() || !self.task.is_due(self.clock.utc()) {
            return WakeOutcome::Idle;
        }

        self.task.begin_run();
        self.publish_snapshot();
        let report = self.execute_run(cancel).await;
        self.task.finish_run(self.clock.utc());
        self.publish_snapshot();

        info!(
            fetched = report.fetched.len(),
            processed = report.processed.len(),
            failed = report.failed.len(),
            abandoned = report.abandoned.len(),
            end = ?report.end,
            "run finished"
        );
        WakeOutcome::Ran(report)
    }

    async fn execute_run(&mut self, cancel: &CancellationToken) -> RunReport {
        let repository = self.task.repository().clone();
        let since = self.task.watermark().cloned();
        let commits = match self
            .source_control
            .list_commits_since(&repository, since.as_ref())
            .await
        {
            Ok(commits) => commits,
            Err(SourceControlError::Auth(reason)) => {
                error!(reason = %reason, "authorization rejected; disabling task");
                self.task.disable(reason.clone());
                return RunReport::new(RunEnd::Disabled(reason));
            }
            Err(err) => {
                warn!(error = %err, "listing commits failed; retrying next run");
                let message = err.to_string();
                self.task.record_error(message.clone());
                return RunReport::new(RunEnd::ListingFailed(message));
            }
        };

        let batch = commits
            .iter()
            .map(|commit| commit.sha().clone())
            .collect::<Vec<_>>();
        let mut report = RunReport::new(RunEnd::Completed);
        report.fetched.clone_from(&batch);
        debug!(since = ?since, fetched = batch.len(), "commits listed");

        for (position, commit) in commits.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(commit = %commit.sha(), "cancellation observed; stopping run");
                report.end = RunEnd::Cancelled;
                break;
            }
            if self.task.is_handled(commit.sha()) {
                report.skipped.push(commit.sha().clone());
                continue;
            }

            match self.executor.process(&repository, commit).await {
                Ok(_article) => {
                    let later = batch.get(position.saturating_add(1)..).unwrap_or_default();
                    self.task.record_success(commit.sha(), later);
                    report.processed.push(commit.sha().clone());
                }
                Err(failure) if failure.is_auth() => {
                    let reason = failure.error.to_string();
                    error!(
                        commit = %commit.sha(),
                        reason = %reason,
                        "authorization rejected while publishing; disabling task"
                    );
                    self.task.disable(reason.clone());
                    report.end = RunEnd::Disabled(reason);
                    break;
                }
                Err(failure) => {
                    let disposition = self.task.record_failure(
                        commit.sha(),
                        self.config.max_commit_attempts,
                        failure.to_string(),
                    );
                    match disposition {
                        FailureDisposition::Retry { attempts } => {
                            warn!(
                                commit = %commit.sha(),
                                stage = %failure.stage,
                                attempts,
                                error = %failure.error,
                                "commit failed; continuing with newer commits"
                            );
                            report.failed.push(commit.sha().clone());
                        }
                        FailureDisposition::Abandoned { attempts } => {
                            error!(
                                commit = %commit.sha(),
                                stage = %failure.stage,
                                attempts,
                                error = %failure.error,
                                "commit abandoned after exhausting retries"
                            );
                            report.abandoned.push(commit.sha().clone());
                        }
                    }
                }
            }
            self.publish_snapshot();
        }

        self.task.advance_watermark(&batch);
        report
    }

    fn publish_snapshot(&self) {
        self.snapshots.send_replace(self.task.snapshot());
    }
}
