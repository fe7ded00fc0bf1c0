//! Application configuration loaded from the environment.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `CHRONICLER_GITHUB_TOKEN` | required |
//! | `CHRONICLER_GEMINI_API_KEY` | required |
//! | `CHRONICLER_REPOSITORIES` | required, `owner/name[@branch][=posts_dir]` comma list |
//! | `CHRONICLER_POLL_INTERVAL_SECS` | `3600` |
//! | `CHRONICLER_TICK_SECS` | `60`, at most `3600` |
//! | `CHRONICLER_POSTS_DIR` | `posts`, overridden per repository by `=posts_dir` |
//! | `CHRONICLER_MAX_ATTEMPTS` | `3` |
//! | `CHRONICLER_GITHUB_API_URL` | `https://api.github.com` |
//! | `CHRONICLER_GEMINI_API_URL` | `https://generativelanguage.googleapis.com/v1beta` |
//! | `CHRONICLER_HTTP_TIMEOUT_SECS` | `30` |

use crate::scheduler::{
    adapters::{gemini::GeminiConfig, github::GitHubConfig},
    domain::RepositoryRef,
    services::{PipelineConfig, SchedulerConfig},
};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const GITHUB_TOKEN: &str = "CHRONICLER_GITHUB_TOKEN";
const GEMINI_API_KEY: &str = "CHRONICLER_GEMINI_API_KEY";
const REPOSITORIES: &str = "CHRONICLER_REPOSITORIES";
const POLL_INTERVAL_SECS: &str = "CHRONICLER_POLL_INTERVAL_SECS";
const TICK_SECS: &str = "CHRONICLER_TICK_SECS";
const POSTS_DIR: &str = "CHRONICLER_POSTS_DIR";
const MAX_ATTEMPTS: &str = "CHRONICLER_MAX_ATTEMPTS";
const GITHUB_API_URL: &str = "CHRONICLER_GITHUB_API_URL";
const GEMINI_API_URL: &str = "CHRONICLER_GEMINI_API_URL";
const HTTP_TIMEOUT_SECS: &str = "CHRONICLER_HTTP_TIMEOUT_SECS";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3600);
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised while loading [`AppConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required variable is unset or blank.
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    /// A variable holds a value that cannot be used.
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// Offending value.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            value: value.to_owned(),
            reason: reason.into(),
        }
    }
}

/// One configured repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryEntry {
    /// Repository to schedule.
    pub repository: RepositoryRef,
    /// Publishing directory overriding the global one.
    pub posts_dir: Option<String>,
}

/// Everything the binary needs to wire the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// GitHub connection settings.
    pub github: GitHubConfig,
    /// Gemini connection settings.
    pub gemini: GeminiConfig,
    /// Repositories to schedule, in configuration order.
    pub repositories: Vec<RepositoryEntry>,
    /// Minimum time between runs of each repository.
    pub poll_interval: Duration,
    /// Registry and pipeline settings.
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    /// Loads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required variable is missing or a value
    /// is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through `lookup`, which maps a variable name
    /// to its value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required variable is missing or a value
    /// is malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        let require = |key: &'static str| read(key).ok_or(ConfigError::Missing(key));

        let http_timeout = parse_seconds(HTTP_TIMEOUT_SECS, read(HTTP_TIMEOUT_SECS))?
            .unwrap_or(DEFAULT_HTTP_TIMEOUT);

        let mut github = GitHubConfig::new(require(GITHUB_TOKEN)?).with_timeout(http_timeout);
        if let Some(url) = read(GITHUB_API_URL) {
            github = github.with_api_url(url);
        }
        let mut gemini = GeminiConfig::new(require(GEMINI_API_KEY)?).with_timeout(http_timeout);
        if let Some(url) = read(GEMINI_API_URL) {
            gemini = gemini.with_api_url(url);
        }

        let repositories = parse_repositories(&require(REPOSITORIES)?)?;
        let poll_interval = parse_seconds(POLL_INTERVAL_SECS, read(POLL_INTERVAL_SECS))?
            .unwrap_or(DEFAULT_POLL_INTERVAL);

        let mut pipeline = PipelineConfig::default();
        if let Some(dir) = read(POSTS_DIR) {
            pipeline = pipeline.with_posts_dir(dir);
        }
        let mut scheduler = SchedulerConfig::default().with_pipeline(pipeline);
        if let Some(tick) = parse_seconds(TICK_SECS, read(TICK_SECS))? {
            if tick > SchedulerConfig::MAX_TICK {
                return Err(ConfigError::invalid(
                    TICK_SECS,
                    &tick.as_secs().to_string(),
                    format!("must be at most {}", SchedulerConfig::MAX_TICK.as_secs()),
                ));
            }
            scheduler = scheduler.with_tick(tick);
        }
        if let Some(attempts) = parse_positive::<u32>(MAX_ATTEMPTS, read(MAX_ATTEMPTS))? {
            scheduler = scheduler.with_max_commit_attempts(attempts);
        }

        Ok(Self {
            github,
            gemini,
            repositories,
            poll_interval,
            scheduler,
        })
    }
}

fn parse_positive<T>(key: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
{
    let Some(value) = raw else {
        return Ok(None);
    };
    let parsed = value
        .parse::<T>()
        .map_err(|err| ConfigError::invalid(key, &value, err.to_string()))?;
    if parsed == T::default() {
        return Err(ConfigError::invalid(key, &value, "must be greater than zero"));
    }
    Ok(Some(parsed))
}

fn parse_seconds(key: &'static str, raw: Option<String>) -> Result<Option<Duration>, ConfigError> {
    Ok(parse_positive::<u64>(key, raw)?.map(Duration::from_secs))
}

fn parse_repositories(raw: &str) -> Result<Vec<RepositoryEntry>, ConfigError> {
    let mut repositories: Vec<RepositoryEntry> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let (reference, posts_dir) = entry
            .split_once('=')
            .map_or((entry, None), |(reference, dir)| {
                (reference.trim(), Some(dir.trim()))
            });
        if posts_dir.is_some_and(str::is_empty) {
            return Err(ConfigError::invalid(
                REPOSITORIES,
                entry,
                "posts directory after '=' is empty",
            ));
        }
        let repository = RepositoryRef::parse(reference)
            .map_err(|err| ConfigError::invalid(REPOSITORIES, entry, err.to_string()))?;
        if repositories.iter().any(|known| known.repository == repository) {
            return Err(ConfigError::invalid(
                REPOSITORIES,
                entry,
                "repository listed twice",
            ));
        }
        repositories.push(RepositoryEntry {
            repository,
            posts_dir: posts_dir.map(str::to_owned),
        });
    }
    if repositories.is_empty() {
        return Err(ConfigError::Missing(REPOSITORIES));
    }
    Ok(repositories)
}
