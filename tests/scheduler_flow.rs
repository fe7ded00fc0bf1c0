//! End-to-end scheduler flows over the in-memory adapters.
//!
//! Tasks run on a paused Tokio clock so every interval elapses instantly
//! while keeping the real polling loops, pipeline and registry in play.

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};
use chronicler::scheduler::{
    adapters::memory::{InMemoryEmbeddingIndex, InMemorySourceControl},
    domain::{CommitAuthor, CommitRecord, CommitSha, RepositoryRef, TaskSnapshot},
    ports::{ContentGenerator, GenerationError, GenerationResult},
    services::{AddTaskRequest, SchedulerConfig, TaskHandle, TaskRegistry},
};
use mockable::Clock;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const MINUTE: Duration = Duration::from_secs(60);

/// Clock pinned to Tokio's paused timer.
#[derive(Debug, Clone)]
struct TokioClock {
    origin: tokio::time::Instant,
    start: DateTime<Utc>,
}

impl TokioClock {
    fn new() -> eyre::Result<Self> {
        let start = Utc
            .with_ymd_and_hms(2024, 5, 1, 9, 0, 0)
            .single()
            .ok_or_else(|| eyre::eyre!("invalid start time"))?;
        Ok(Self {
            origin: tokio::time::Instant::now(),
            start,
        })
    }
}

impl Clock for TokioClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        self.start + TimeDelta::from_std(self.origin.elapsed()).unwrap_or(TimeDelta::MAX)
    }
}

/// Generator that fails selected topics once and remembers the references
/// each topic was written with.
#[derive(Debug, Default)]
struct EditorialDesk {
    fail_once: Mutex<HashSet<String>>,
    references: Mutex<HashMap<String, Vec<String>>>,
    delay: Option<Duration>,
}

impl EditorialDesk {
    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    fn fail_once(&self, topic: &str) {
        self.fail_once
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(topic.to_owned());
    }

    fn references_for(&self, topic: &str) -> Option<Vec<String>> {
        self.references
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(topic)
            .cloned()
    }
}

#[async_trait]
impl ContentGenerator for EditorialDesk {
    async fn embed(&self, _text: &str) -> GenerationResult<Vec<f32>> {
        Ok(vec![0.5, 0.5])
    }

    async fn generate(&self, topic: &str, references: &[String]) -> GenerationResult<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .fail_once
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(topic);
        if failing {
            return Err(GenerationError::Rejected(format!("draft of {topic} refused")));
        }
        self.references
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(topic.to_owned(), references.to_vec());
        Ok(format!("# {topic}\n\nWritten from {} references.", references.len()))
    }
}

type FlowRegistry =
    TaskRegistry<InMemorySourceControl, EditorialDesk, InMemoryEmbeddingIndex, TokioClock>;

struct Flow {
    source_control: Arc<InMemorySourceControl>,
    desk: Arc<EditorialDesk>,
    index: Arc<InMemoryEmbeddingIndex>,
    registry: FlowRegistry,
}

impl Flow {
    fn new(desk: EditorialDesk) -> eyre::Result<Self> {
        let source_control = Arc::new(InMemorySourceControl::new());
        let desk_handle = Arc::new(desk);
        let index = Arc::new(InMemoryEmbeddingIndex::new());
        let registry = TaskRegistry::new(
            Arc::clone(&source_control),
            Arc::clone(&desk_handle),
            Arc::clone(&index),
            Arc::new(TokioClock::new()?),
            SchedulerConfig::default().with_tick(MINUTE),
        );
        Ok(Self {
            source_control,
            desk: desk_handle,
            index,
            registry,
        })
    }

    fn push(&self, repository: &RepositoryRef, sha: &str, message: &str) -> eyre::Result<()> {
        let record = CommitRecord::new(
            CommitSha::new(sha)?,
            message,
            CommitAuthor::named("Grace").with_email("grace@example.com"),
            Utc::now(),
        );
        self.source_control.push_commit(repository, record);
        Ok(())
    }
}

async fn wait_for(
    handle: &mut TaskHandle,
    done: impl Fn(&TaskSnapshot) -> bool,
) -> eyre::Result<TaskSnapshot> {
    let waited = tokio::time::timeout(Duration::from_secs(24 * 3600), async {
        loop {
            let snapshot = handle.snapshot();
            if done(&snapshot) {
                return Ok(snapshot);
            }
            if !handle.changed().await {
                return Err(eyre::eyre!("polling loop for {} exited", handle.repository()));
            }
        }
    })
    .await;
    waited.map_err(|_| eyre::eyre!("timed out waiting for {}", handle.repository()))?
}

#[tokio::test(start_paused = true)]
async fn commits_across_repositories_become_articles() -> eyre::Result<()> {
    let widgets = RepositoryRef::parse("acme/widgets")?;
    let docs = RepositoryRef::parse("acme/docs@gh-pages")?;
    let flow = Flow::new(EditorialDesk::default())?;
    flow.desk.fail_once("Flaky uploads");

    let mut widgets_task = flow
        .registry
        .add_task(AddTaskRequest::new(widgets.clone(), 5 * MINUTE))
        .await?;
    let mut docs_task = flow
        .registry
        .add_task(AddTaskRequest::new(docs.clone(), MINUTE))
        .await?;
    flow.push(&docs, "d1", "docs: Explain retries")?;
    flow.push(&widgets, "a1", "feat(feeds): Add streaming feeds (#7)")?;
    flow.push(&widgets, "a2", "fix: Flaky uploads")?;

    let docs_done = wait_for(&mut docs_task, |snapshot| snapshot.counters.processed == 1).await?;
    let widgets_done =
        wait_for(&mut widgets_task, |snapshot| snapshot.counters.processed == 2).await?;

    assert_eq!(docs_done.watermark, Some(CommitSha::new("d1")?));
    assert_eq!(widgets_done.watermark, Some(CommitSha::new("a2")?));
    assert_eq!(widgets_done.last_processed_commit, Some(CommitSha::new("a2")?));
    assert_eq!(widgets_done.counters.failed_attempts, 1);
    assert_eq!(widgets_done.pending_retries, 0);
    assert_eq!(
        flow.source_control.file_paths(&widgets),
        vec![
            "posts/add-streaming-feeds.md".to_owned(),
            "posts/flaky-uploads.md".to_owned(),
        ]
    );
    assert_eq!(
        flow.source_control.file_paths(&docs),
        vec!["posts/explain-retries.md".to_owned()]
    );
    assert_eq!(flow.desk.references_for("Explain retries"), Some(Vec::new()));
    assert!(
        flow.desk
            .references_for("Add streaming feeds")
            .is_some_and(|references| !references.is_empty())
    );
    assert_eq!(flow.index.texts("articles").len(), 3);

    flow.registry.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn shutdown_lets_the_inflight_commit_finish() -> eyre::Result<()> {
    let widgets = RepositoryRef::parse("acme/widgets")?;
    let flow = Flow::new(EditorialDesk::slow(Duration::from_secs(30)))?;
    let task = flow
        .registry
        .add_task(AddTaskRequest::new(widgets.clone(), Duration::from_secs(3600)))
        .await?;
    flow.push(&widgets, "a1", "Add streaming feeds")?;
    flow.push(&widgets, "a2", "Flaky uploads")?;

    flow.registry.trigger(&widgets)?;
    tokio::time::sleep(MINUTE + Duration::from_secs(1)).await;
    flow.registry.shutdown().await;

    assert_eq!(
        flow.source_control.file_paths(&widgets),
        vec!["posts/add-streaming-feeds.md".to_owned()]
    );
    let snapshot = task.snapshot();
    assert_eq!(snapshot.watermark, Some(CommitSha::new("a1")?));
    assert!(!snapshot.running);
    assert!(!flow.registry.contains(&widgets));
    Ok(())
}
