//! Tunables for the polling loops and the commit pipeline.

use std::time::Duration;

/// Configuration for the commit pipeline.
///
/// # Examples
///
/// ```
/// use chronicler::scheduler::services::PipelineConfig;
///
/// let config = PipelineConfig::default();
/// assert_eq!(config.collection, "articles");
/// assert_eq!(config.top_k, 5);
/// assert_eq!(config.article_path("release-notes"), "posts/release-notes.md");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Embedding index collection holding published articles.
    pub collection: String,
    /// Number of reference texts retrieved per commit.
    pub top_k: usize,
    /// Repository directory articles are published under.
    pub posts_dir: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            collection: "articles".to_owned(),
            top_k: 5,
            posts_dir: "posts".to_owned(),
        }
    }
}

impl PipelineConfig {
    /// Sets the index collection.
    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Sets the number of retrieved references.
    #[must_use]
    pub const fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Sets the publishing directory.
    #[must_use]
    pub fn with_posts_dir(mut self, posts_dir: impl Into<String>) -> Self {
        self.posts_dir = posts_dir.into();
        self
    }

    /// Returns the repository path of the article for `slug`.
    #[must_use]
    pub fn article_path(&self, slug: &str) -> String {
        let dir = self.posts_dir.trim_matches('/');
        if dir.is_empty() {
            format!("{slug}.md")
        } else {
            format!("{dir}/{slug}.md")
        }
    }
}

/// Configuration for the task registry and its polling loops.
///
/// # Examples
///
/// ```
/// use chronicler::scheduler::services::SchedulerConfig;
/// use std::time::Duration;
///
/// let config = SchedulerConfig::default();
/// assert_eq!(config.tick, Duration::from_secs(60));
/// assert_eq!(config.max_commit_attempts, 3);
///
/// let clamped = config.with_tick(Duration::from_secs(u64::MAX));
/// assert_eq!(clamped.tick, SchedulerConfig::MAX_TICK);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Wake resolution shared by every polling loop.
    pub tick: Duration,
    /// Failed attempts after which a commit is abandoned.
    pub max_commit_attempts: u32,
    /// Commit pipeline configuration.
    pub pipeline: PipelineConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(60),
            max_commit_attempts: 3,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Shortest accepted wake resolution.
    pub const MIN_TICK: Duration = Duration::from_millis(1);

    /// Longest accepted wake resolution.
    pub const MAX_TICK: Duration = Duration::from_secs(3600);

    /// Sets the wake resolution, clamped to [`Self::MIN_TICK`] and
    /// [`Self::MAX_TICK`].
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.clamp(Self::MIN_TICK, Self::MAX_TICK);
        self
    }

    /// Returns the wake resolution the polling loops actually use.
    ///
    /// The `tick` field is public, so it is clamped again here.
    #[must_use]
    pub fn effective_tick(&self) -> Duration {
        self.tick.clamp(Self::MIN_TICK, Self::MAX_TICK)
    }

    /// Sets the retry budget per commit.
    #[must_use]
    pub const fn with_max_commit_attempts(mut self, attempts: u32) -> Self {
        self.max_commit_attempts = attempts;
        self
    }

    /// Sets the pipeline configuration.
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }
}
