//! Registry tests on a paused Tokio clock.

use super::support::{ScriptedGenerator, TokioClock, commit, repository, sha};
use crate::scheduler::{
    adapters::memory::{InMemoryEmbeddingIndex, InMemorySourceControl},
    domain::{RepositoryRef, TaskSnapshot, TaskStatus},
    ports::SourceControlError,
    services::{
        AddTaskRequest, SchedulerConfig, TaskHandle, TaskRegistry, TaskRegistryError,
    },
};
use rstest::{fixture, rstest};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};

const MINUTE: Duration = Duration::from_secs(60);
const FIVE_MINUTES: Duration = Duration::from_secs(300);

type TestRegistry =
    TaskRegistry<InMemorySourceControl, ScriptedGenerator, InMemoryEmbeddingIndex, TokioClock>;

struct Harness {
    source_control: Arc<InMemorySourceControl>,
    generator: Arc<ScriptedGenerator>,
    registry: TestRegistry,
}

#[fixture]
fn harness() -> Harness {
    harness_with(SchedulerConfig::default().with_tick(MINUTE))
}

fn harness_with(config: SchedulerConfig) -> Harness {
    let source_control = Arc::new(InMemorySourceControl::new());
    let generator = Arc::new(ScriptedGenerator::new());
    let registry = TaskRegistry::new(
        Arc::clone(&source_control),
        Arc::clone(&generator),
        Arc::new(InMemoryEmbeddingIndex::new()),
        Arc::new(TokioClock::new()),
        config,
    );
    Harness {
        source_control,
        generator,
        registry,
    }
}

fn other_repository() -> RepositoryRef {
    RepositoryRef::on_default_branch("acme", "gadgets").expect("valid repository")
}

async fn schedule(harness: &Harness, repository: &RepositoryRef, interval: Duration) -> TaskHandle {
    harness
        .registry
        .add_task(AddTaskRequest::new(repository.clone(), interval))
        .await
        .expect("task should be scheduled")
}

/// Waits on published snapshots until `done` holds.
async fn wait_until(
    handle: &mut TaskHandle,
    done: impl Fn(&TaskSnapshot) -> bool,
) -> TaskSnapshot {
    let waited = tokio::time::timeout(Duration::from_secs(6 * 3600), async {
        loop {
            let snapshot = handle.snapshot();
            if done(&snapshot) {
                return snapshot;
            }
            assert!(handle.changed().await, "polling loop exited early");
        }
    })
    .await;
    waited.expect("condition should be reached")
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn duplicate_repositories_are_rejected(harness: Harness, repository: RepositoryRef) {
    schedule(&harness, &repository, FIVE_MINUTES).await;

    let duplicate = harness
        .registry
        .add_task(AddTaskRequest::new(repository.clone(), MINUTE))
        .await;

    assert!(matches!(
        duplicate,
        Err(TaskRegistryError::AlreadyScheduled(existing)) if existing == repository
    ));
    assert_eq!(harness.registry.len(), 1);
    harness.registry.shutdown().await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn head_lookup_sets_the_starting_marker(harness: Harness, repository: RepositoryRef) {
    harness
        .source_control
        .push_commit(&repository, commit("c1", "Initial import"));
    let mut handle = schedule(&harness, &repository, FIVE_MINUTES).await;

    let initial = handle.snapshot();
    assert_eq!(initial.watermark, Some(sha("c1")));
    assert_eq!(initial.last_processed_commit, Some(sha("c1")));

    harness
        .source_control
        .push_commit(&repository, commit("c2", "Add feeds"));
    wait_until(&mut handle, |snapshot| {
        snapshot.last_processed_commit == Some(sha("c2"))
    })
    .await;

    assert_eq!(harness.generator.generated_topics(), vec!["Add feeds"]);
    harness.registry.shutdown().await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn explicit_known_head_skips_the_lookup(harness: Harness, repository: RepositoryRef) {
    harness
        .source_control
        .push_commit(&repository, commit("c1", "Initial import"));

    let handle = harness
        .registry
        .add_task(AddTaskRequest::new(repository.clone(), FIVE_MINUTES).with_known_head(sha("c9")))
        .await
        .expect("task should be scheduled");

    assert_eq!(handle.snapshot().watermark, Some(sha("c9")));
    assert_eq!(handle.repository(), &repository);
    harness.registry.shutdown().await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn tasks_wait_for_their_interval(harness: Harness, repository: RepositoryRef) {
    let mut handle = schedule(&harness, &repository, FIVE_MINUTES).await;
    harness
        .source_control
        .push_commit(&repository, commit("c1", "Improve caching"));
    let started = Instant::now();

    sleep(Duration::from_secs(270)).await;
    assert!(harness.generator.generated_topics().is_empty());

    let snapshot = wait_until(&mut handle, |snapshot| snapshot.counters.processed == 1).await;
    assert_eq!(started.elapsed(), FIVE_MINUTES);
    assert_eq!(snapshot.last_processed_commit, Some(sha("c1")));
    harness.registry.shutdown().await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn intervals_are_honoured_independently(harness: Harness, repository: RepositoryRef) {
    let slow = schedule(&harness, &repository, FIVE_MINUTES).await;
    let fast = schedule(&harness, &other_repository(), MINUTE).await;

    sleep(Duration::from_secs(630)).await;

    assert_eq!(slow.snapshot().counters.runs, 2);
    assert_eq!(fast.snapshot().counters.runs, 10);
    harness.registry.shutdown().await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn runs_of_one_task_never_overlap(harness: Harness, repository: RepositoryRef) {
    harness.generator.slow_down(Duration::from_secs(600));
    let mut handle = schedule(&harness, &repository, MINUTE).await;
    for (value, topic) in [("c1", "Alpha"), ("c2", "Bravo"), ("c3", "Charlie")] {
        harness
            .source_control
            .push_commit(&repository, commit(value, topic));
    }

    let snapshot = wait_until(&mut handle, |snapshot| snapshot.counters.processed == 3).await;

    assert_eq!(harness.generator.peak_concurrency(), 1);
    assert!(snapshot.running);
    assert_eq!(
        harness.generator.generated_topics(),
        vec!["Alpha", "Bravo", "Charlie"]
    );
    harness.registry.shutdown().await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn triggered_tasks_run_before_their_interval(harness: Harness, repository: RepositoryRef) {
    let mut handle = schedule(&harness, &repository, Duration::from_secs(3600)).await;
    harness
        .source_control
        .push_commit(&repository, commit("c1", "Improve caching"));
    let started = Instant::now();

    harness.registry.trigger(&repository).expect("trigger should be delivered");
    wait_until(&mut handle, |snapshot| snapshot.counters.processed == 1).await;

    assert!(started.elapsed() <= MINUTE);
    harness.registry.shutdown().await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn commands_for_unknown_repositories_fail(harness: Harness, repository: RepositoryRef) {
    assert!(matches!(
        harness.registry.trigger(&repository),
        Err(TaskRegistryError::NotScheduled(_))
    ));
    assert!(matches!(
        harness.registry.reauthorize(&repository),
        Err(TaskRegistryError::NotScheduled(_))
    ));
    assert!(harness.registry.snapshot(&repository).is_none());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn removing_one_task_leaves_the_others_running(harness: Harness, repository: RepositoryRef) {
    let other = other_repository();
    schedule(&harness, &repository, MINUTE).await;
    let mut remaining = schedule(&harness, &other, MINUTE).await;

    harness.registry.remove_task(&repository);
    harness.registry.remove_task(&repository);
    harness
        .source_control
        .push_commit(&repository, commit("c1", "Alpha"));
    harness
        .source_control
        .push_commit(&other, commit("c2", "Bravo"));
    wait_until(&mut remaining, |snapshot| snapshot.counters.processed == 1).await;

    assert!(!harness.registry.contains(&repository));
    assert_eq!(harness.registry.len(), 1);
    assert_eq!(harness.generator.generated_topics(), vec!["Bravo"]);
    assert_eq!(
        harness
            .registry
            .snapshots()
            .into_iter()
            .map(|snapshot| snapshot.repository)
            .collect::<Vec<_>>(),
        vec![other]
    );
    harness.registry.shutdown().await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn auth_failures_disable_until_reauthorized(harness: Harness, repository: RepositoryRef) {
    harness
        .source_control
        .push_commit(&repository, commit("c1", "Initial import"));
    let mut handle = schedule(&harness, &repository, MINUTE).await;
    harness
        .source_control
        .push_commit(&repository, commit("c2", "Add feeds"));
    harness
        .source_control
        .fail_next_listing(&repository, SourceControlError::auth("bad credentials"));

    wait_until(&mut handle, |snapshot| {
        matches!(snapshot.status, TaskStatus::Disabled { .. })
    })
    .await;
    sleep(Duration::from_secs(600)).await;
    assert!(harness.generator.generated_topics().is_empty());

    harness
        .registry
        .reauthorize(&repository)
        .expect("reauthorization should be delivered");
    let snapshot = wait_until(&mut handle, |snapshot| snapshot.counters.processed == 1).await;

    assert_eq!(snapshot.status, TaskStatus::Active);
    assert_eq!(snapshot.last_processed_commit, Some(sha("c2")));
    harness.registry.shutdown().await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn shutdown_stops_every_loop_and_rejects_new_tasks(
    harness: Harness,
    repository: RepositoryRef,
) {
    let mut handle = schedule(&harness, &repository, MINUTE).await;

    harness.registry.shutdown().await;

    assert!(harness.registry.is_empty());
    assert!(!handle.changed().await);
    assert!(matches!(
        harness
            .registry
            .add_task(AddTaskRequest::new(other_repository(), MINUTE))
            .await,
        Err(TaskRegistryError::ShuttingDown)
    ));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_the_inflight_commit(harness: Harness, repository: RepositoryRef) {
    harness.generator.slow_down(Duration::from_secs(600));
    let mut handle = schedule(&harness, &repository, MINUTE).await;
    harness
        .source_control
        .push_commit(&repository, commit("c1", "Alpha"));
    harness
        .source_control
        .push_commit(&repository, commit("c2", "Bravo"));
    wait_until(&mut handle, |snapshot| snapshot.running).await;
    let started = Instant::now();

    harness.registry.shutdown().await;

    assert_eq!(started.elapsed(), Duration::from_secs(600));
    assert_eq!(
        harness.source_control.file_paths(&repository),
        vec!["posts/alpha.md".to_owned()]
    );
    assert_eq!(harness.generator.generated_topics(), vec!["Alpha"]);
    let snapshot = handle.snapshot();
    assert_eq!(snapshot.watermark, Some(sha("c1")));
    assert_eq!(snapshot.counters.processed, 1);
    assert!(!snapshot.running);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn re_adding_a_removed_repository_waits_for_its_inflight_commit(
    harness: Harness,
    repository: RepositoryRef,
) {
    harness.generator.slow_down(Duration::from_secs(600));
    let mut removed = schedule(&harness, &repository, MINUTE).await;
    harness
        .source_control
        .push_commit(&repository, commit("c1", "Alpha"));
    harness
        .source_control
        .push_commit(&repository, commit("c2", "Bravo"));
    wait_until(&mut removed, |snapshot| snapshot.running).await;

    harness.registry.remove_task(&repository);
    let removed_at = Instant::now();
    let mut readded = harness
        .registry
        .add_task(AddTaskRequest::new(repository.clone(), MINUTE).with_known_head(sha("c1")))
        .await
        .expect("task should be scheduled again");

    assert_eq!(removed_at.elapsed(), Duration::from_secs(600));
    assert_eq!(harness.generator.generated_topics(), vec!["Alpha"]);

    wait_until(&mut readded, |snapshot| snapshot.counters.processed == 1).await;
    assert_eq!(harness.generator.peak_concurrency(), 1);
    assert_eq!(harness.generator.generated_topics(), vec!["Alpha", "Bravo"]);
    harness.registry.shutdown().await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn repositories_can_publish_under_their_own_directory(
    harness: Harness,
    repository: RepositoryRef,
) {
    let other = other_repository();
    let mut custom = harness
        .registry
        .add_task(AddTaskRequest::new(repository.clone(), MINUTE).with_posts_dir("content/posts"))
        .await
        .expect("task should be scheduled");
    let mut fallback = schedule(&harness, &other, MINUTE).await;
    harness
        .source_control
        .push_commit(&repository, commit("c1", "Alpha"));
    harness
        .source_control
        .push_commit(&other, commit("c2", "Bravo"));

    wait_until(&mut custom, |snapshot| snapshot.counters.processed == 1).await;
    wait_until(&mut fallback, |snapshot| snapshot.counters.processed == 1).await;

    assert_eq!(
        harness.source_control.file_paths(&repository),
        vec!["content/posts/alpha.md".to_owned()]
    );
    assert_eq!(
        harness.source_control.file_paths(&other),
        vec!["posts/bravo.md".to_owned()]
    );
    harness.registry.shutdown().await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn oversized_ticks_fall_back_to_the_longest_supported_tick(repository: RepositoryRef) {
    let harness = harness_with(SchedulerConfig {
        tick: Duration::from_secs(u64::MAX),
        ..SchedulerConfig::default()
    });
    let mut handle = schedule(&harness, &repository, MINUTE).await;
    harness
        .source_control
        .push_commit(&repository, commit("c1", "Improve caching"));
    let started = Instant::now();

    let snapshot = wait_until(&mut handle, |snapshot| snapshot.counters.processed == 1).await;

    assert_eq!(started.elapsed(), SchedulerConfig::MAX_TICK);
    assert_eq!(snapshot.last_processed_commit, Some(sha("c1")));
    assert!(harness.registry.contains(&repository));
    harness.registry.shutdown().await;
}
