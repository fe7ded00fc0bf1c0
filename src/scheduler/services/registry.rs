//! Registry of supervised polling tasks.

use crate::scheduler::{
    domain::{CommitSha, RepositoryRef, Task, TaskSnapshot},
    ports::{ContentGenerator, EmbeddingIndex, SourceControlClient, SourceControlError},
    services::{PipelineExecutor, PollingLoop, SchedulerConfig, TaskCommand},
};
use mockable::Clock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span};

/// Request payload for scheduling a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddTaskRequest {
    repository: RepositoryRef,
    interval: Duration,
    known_head: Option<CommitSha>,
    posts_dir: Option<String>,
}

impl AddTaskRequest {
    /// Creates a request; the starting marker is resolved from the
    /// repository head unless [`Self::with_known_head`] sets one.
    #[must_use]
    pub const fn new(repository: RepositoryRef, interval: Duration) -> Self {
        Self {
            repository,
            interval,
            known_head: None,
            posts_dir: None,
        }
    }

    /// Starts processing after `head` instead of the current head.
    #[must_use]
    pub fn with_known_head(mut self, head: CommitSha) -> Self {
        self.known_head = Some(head);
        self
    }

    /// Publishes this repository's articles under `posts_dir` instead of
    /// the registry-wide directory.
    #[must_use]
    pub fn with_posts_dir(mut self, posts_dir: impl Into<String>) -> Self {
        self.posts_dir = Some(posts_dir.into());
        self
    }
}

/// Errors returned by [`TaskRegistry`].
#[derive(Debug, Error)]
pub enum TaskRegistryError {
    /// A task for the repository already exists.
    #[error("repository {0} is already scheduled")]
    AlreadyScheduled(RepositoryRef),
    /// No task exists for the repository.
    #[error("repository {0} is not scheduled")]
    NotScheduled(RepositoryRef),
    /// The registry is shutting down and accepts no new tasks.
    #[error("task registry is shutting down")]
    ShuttingDown,
    /// The repository head could not be resolved.
    #[error(transparent)]
    SourceControl(#[from] SourceControlError),
}

/// Result type for registry operations.
pub type TaskRegistryResult<T> = Result<T, TaskRegistryError>;

/// Read handle for one scheduled task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    repository: RepositoryRef,
    snapshots: watch::Receiver<TaskSnapshot>,
}

impl TaskHandle {
    /// Returns the scheduled repository.
    #[must_use]
    pub const fn repository(&self) -> &RepositoryRef {
        &self.repository
    }

    /// Returns the latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> TaskSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Waits for the next snapshot change.
    ///
    /// Returns `false` once the polling loop has exited.
    pub async fn changed(&mut self) -> bool {
        self.snapshots.changed().await.is_ok()
    }
}

struct TaskEntry {
    cancel: CancellationToken,
    /// Cancelled once the loop future has exited.
    stopped: CancellationToken,
    commands: mpsc::UnboundedSender<TaskCommand>,
    snapshots: watch::Receiver<TaskSnapshot>,
}

/// Owns the set of scheduled tasks and their polling loops.
pub struct TaskRegistry<S, G, I, C>
where
    S: SourceControlClient + 'static,
    G: ContentGenerator + 'static,
    I: EmbeddingIndex + 'static,
    C: Clock + Send + Sync + 'static,
{
    source_control: Arc<S>,
    executor: PipelineExecutor<S, G, I>,
    clock: Arc<C>,
    config: SchedulerConfig,
    tasks: RwLock<HashMap<RepositoryRef, TaskEntry>>,
    draining: Mutex<HashMap<RepositoryRef, CancellationToken>>,
    tracker: TaskTracker,
    root: CancellationToken,
}

impl<S, G, I, C> TaskRegistry<S, G, I, C>
where
    S: SourceControlClient + 'static,
    G: ContentGenerator + 'static,
    I: EmbeddingIndex + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates an empty registry.
    #[must_use]
    pub fn new(
        source_control: Arc<S>,
        generator: Arc<G>,
        index: Arc<I>,
        clock: Arc<C>,
        config: SchedulerConfig,
    ) -> Self {
        let executor = PipelineExecutor::new(
            Arc::clone(&source_control),
            generator,
            index,
            config.pipeline.clone(),
        );
        Self {
            source_control,
            executor,
            clock,
            config,
            tasks: RwLock::new(HashMap::new()),
            draining: Mutex::new(HashMap::new()),
            tracker: TaskTracker::new(),
            root: CancellationToken::new(),
        }
    }

    /// Schedules a repository and spawns its polling loop.
    ///
    /// Must be called from within a Tokio runtime. When the repository was
    /// removed while its loop was still finishing a commit, this waits for
    /// that loop to exit first.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRegistryError::AlreadyScheduled`] for a duplicate,
    /// [`TaskRegistryError::ShuttingDown`] after [`Self::shutdown`], or a
    /// source-control error when the head lookup fails.
    pub async fn add_task(&self, request: AddTaskRequest) -> TaskRegistryResult<TaskHandle> {
        let AddTaskRequest {
            repository,
            interval,
            known_head,
            posts_dir,
        } = request;
        self.ensure_schedulable(&repository)?;
        self.wait_for_drain(&repository).await;

        let marker = if known_head.is_some() {
            known_head
        } else {
            self.source_control.head(&repository).await?
        };

        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        if self.root.is_cancelled() {
            return Err(TaskRegistryError::ShuttingDown);
        }
        if tasks.contains_key(&repository) {
            return Err(TaskRegistryError::AlreadyScheduled(repository));
        }

        let task = Task::new(repository.clone(), interval, marker, self.clock.utc());
        let executor = posts_dir.map_or_else(
            || self.executor.clone(),
            |dir| self.executor.clone().with_posts_dir(dir),
        );
        let polling_loop = PollingLoop::new(
            task,
            Arc::clone(&self.source_control),
            executor,
            Arc::clone(&self.clock),
            self.config.clone(),
        );
        let snapshots = polling_loop.subscribe();
        let (commands, receiver) = mpsc::unbounded_channel();
        let cancel = self.root.child_token();
        let stopped = CancellationToken::new();
        let stop_guard = stopped.clone().drop_guard();
        let loop_cancel = cancel.clone();

        let span = info_span!("polling_loop", repository = %repository);
        self.tracker.spawn(
            async move {
                let _stopped = stop_guard;
                polling_loop.run(loop_cancel, receiver).await;
            }
            .instrument(span),
        );
        info!(repository = %repository, interval = ?interval, "task scheduled");

        tasks.insert(
            repository.clone(),
            TaskEntry {
                cancel,
                stopped,
                commands,
                snapshots: snapshots.clone(),
            },
        );
        Ok(TaskHandle {
            repository,
            snapshots,
        })
    }

    /// Stops and forgets the task for `repository`.
    ///
    /// Idempotent. A commit already in the pipeline finishes before the loop
    /// exits; [`Self::shutdown`] waits for that, and re-adding the same
    /// repository waits for it too.
    pub fn remove_task(&self, repository: &RepositoryRef) {
        let removed = self
            .tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(repository);
        if let Some(entry) = removed {
            entry.cancel.cancel();
            let mut draining = self.draining.lock().unwrap_or_else(PoisonError::into_inner);
            draining.retain(|_, stopped| !stopped.is_cancelled());
            if !entry.stopped.is_cancelled() {
                draining.insert(repository.clone(), entry.stopped);
            }
            info!(repository = %repository, "task removed");
        }
    }

    /// Asks the task to run on its next wake regardless of interval.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRegistryError::NotScheduled`] for unknown repositories.
    pub fn trigger(&self, repository: &RepositoryRef) -> TaskRegistryResult<()> {
        self.send(repository, TaskCommand::RunNow)
    }

    /// Re-enables a task disabled by an authorization failure.
    ///
    /// # Errors
    ///
    /// Returns [`TaskRegistryError::NotScheduled`] for unknown repositories.
    pub fn reauthorize(&self, repository: &RepositoryRef) -> TaskRegistryResult<()> {
        self.send(repository, TaskCommand::Reauthorize)
    }

    /// Returns the latest snapshot for `repository`.
    #[must_use]
    pub fn snapshot(&self, repository: &RepositoryRef) -> Option<TaskSnapshot> {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(repository)
            .map(|entry| entry.snapshots.borrow().clone())
    }

    /// Returns snapshots of every scheduled task, ordered by repository.
    #[must_use]
    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        let mut snapshots = self
            .tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| entry.snapshots.borrow().clone())
            .collect::<Vec<_>>();
        snapshots.sort_by_key(|snapshot| snapshot.repository.to_string());
        snapshots
    }

    /// Returns whether `repository` is scheduled.
    #[must_use]
    pub fn contains(&self, repository: &RepositoryRef) -> bool {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(repository)
    }

    /// Returns the number of scheduled tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns whether no task is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancels every loop and waits for all of them to exit.
    ///
    /// Further [`Self::add_task`] calls fail with
    /// [`TaskRegistryError::ShuttingDown`].
    pub async fn shutdown(&self) {
        let drained = {
            let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
            self.root.cancel();
            self.tracker.close();
            self.draining
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            tasks.drain().count()
        };
        info!(tasks = drained, "shutting down task registry");
        self.tracker.wait().await;
        info!("task registry stopped");
    }

    fn ensure_schedulable(&self, repository: &RepositoryRef) -> TaskRegistryResult<()> {
        if self.root.is_cancelled() {
            return Err(TaskRegistryError::ShuttingDown);
        }
        if self.contains(repository) {
            return Err(TaskRegistryError::AlreadyScheduled(repository.clone()));
        }
        Ok(())
    }

    async fn wait_for_drain(&self, repository: &RepositoryRef) {
        let previous = self
            .draining
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(repository)
            .cloned();
        if let Some(stopped) = previous {
            debug!(repository = %repository, "waiting for the removed loop to stop");
            stopped.cancelled().await;
            self.draining
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|_, pending| !pending.is_cancelled());
        }
    }

    fn send(&self, repository: &RepositoryRef, command: TaskCommand) -> TaskRegistryResult<()> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        let entry = tasks
            .get(repository)
            .ok_or_else(|| TaskRegistryError::NotScheduled(repository.clone()))?;
        entry
            .commands
            .send(command)
            .map_err(|_| TaskRegistryError::NotScheduled(repository.clone()))
    }
}
