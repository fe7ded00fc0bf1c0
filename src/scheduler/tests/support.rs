//! Shared fixtures for scheduler unit tests.

use crate::scheduler::{
    domain::{CommitAuthor, CommitRecord, CommitSha, RepositoryRef},
    ports::{ContentGenerator, GenerationError, GenerationResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};
use mockable::Clock;
use rstest::fixture;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Fixed start of every test timeline.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += TimeDelta::from_std(by).expect("duration in range");
    }
}

impl Clock for ManualClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }
}

/// Clock that follows Tokio's (possibly paused) timer.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: tokio::time::Instant,
    start: DateTime<Utc>,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
            start: epoch(),
        }
    }
}

impl Clock for TokioClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        self.start + TimeDelta::from_std(self.origin.elapsed()).expect("elapsed in range")
    }
}

/// Generator with scripted failures, a call log and a concurrency gauge.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    failing_topics: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes generation fail for `topic` until [`Self::heal`] is called.
    pub fn fail_topic(&self, topic: &str) {
        self.failing_topics
            .lock()
            .expect("failing topics lock")
            .insert(topic.to_owned());
    }

    pub fn heal(&self, topic: &str) {
        self.failing_topics
            .lock()
            .expect("failing topics lock")
            .remove(topic);
    }

    /// Makes every generation take `delay`.
    pub fn slow_down(&self, delay: Duration) {
        *self.delay.lock().expect("delay lock") = Some(delay);
    }

    /// Returns `embed:<text>` and `generate:<topic>` entries in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn generated_topics(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| call.strip_prefix("generate:").map(str::to_owned))
            .collect()
    }

    /// Highest number of generations observed in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

/// Article text produced by [`ScriptedGenerator`] for `topic`.
pub fn article_for(topic: &str) -> String {
    format!("# {topic}\n\nGenerated article.")
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn embed(&self, text: &str) -> GenerationResult<Vec<f32>> {
        self.record(format!("embed:{text}"));
        Ok(vec![1.0, 0.0, 0.5])
    }

    async fn generate(&self, topic: &str, _references: &[String]) -> GenerationResult<String> {
        self.record(format!("generate:{topic}"));
        let in_flight = self.active.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        self.peak.fetch_max(in_flight, Ordering::SeqCst);
        let delay = *self.delay.lock().expect("delay lock");
        if let Some(pause) = delay {
            tokio::time::sleep(pause).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let failing = self
            .failing_topics
            .lock()
            .expect("failing topics lock")
            .contains(topic);
        if failing {
            return Err(GenerationError::Rejected(format!("refused: {topic}")));
        }
        Ok(article_for(topic))
    }
}

#[fixture]
pub fn repository() -> RepositoryRef {
    RepositoryRef::on_default_branch("acme", "widgets").expect("valid repository")
}

pub fn sha(value: &str) -> CommitSha {
    CommitSha::new(value).expect("valid sha")
}

/// Commit `value` whose message is `message`.
pub fn commit(value: &str, message: &str) -> CommitRecord {
    CommitRecord::new(sha(value), message, CommitAuthor::named("Ada"), epoch())
}

pub fn shas(values: &[&str]) -> Vec<CommitSha> {
    values.iter().map(|value| sha(value)).collect()
}
