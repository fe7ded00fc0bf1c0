//! Runs the commit-to-article scheduler until interrupted.
//!
//! Usage:
//!
//! ```text
//! CHRONICLER_GITHUB_TOKEN=... \
//! CHRONICLER_GEMINI_API_KEY=... \
//! CHRONICLER_REPOSITORIES=acme/widgets,acme/docs@gh-pages \
//! chronicler
//! ```
//!
//! See [`chronicler::config`] for every recognised variable. Log output is
//! controlled through `RUST_LOG` and defaults to `chronicler=info`.

use chronicler::config::{AppConfig, ConfigError};
use chronicler::scheduler::{
    adapters::{
        HttpClientError,
        gemini::GeminiContentGenerator,
        github::GitHubSourceControl,
        memory::InMemoryEmbeddingIndex,
    },
    services::{AddTaskRequest, TaskRegistry},
};
use mockable::DefaultClock;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that stop the scheduler from starting.
#[derive(Debug, Error)]
enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] HttpClientError),
    #[error("failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("failed to listen for shutdown signal: {0}")]
    Signal(#[source] std::io::Error),
    #[error("no repository could be scheduled")]
    NothingScheduled,
}

fn main() -> Result<(), BoxError> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chronicler=info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(StartupError::Runtime)?;
    runtime.block_on(run()).map_err(Into::into)
}

async fn run() -> Result<(), StartupError> {
    let config = AppConfig::from_env()?;
    let source_control = Arc::new(GitHubSourceControl::new(config.github.clone())?);
    let generator = Arc::new(GeminiContentGenerator::new(config.gemini.clone())?);
    let registry = TaskRegistry::new(
        source_control,
        generator,
        Arc::new(InMemoryEmbeddingIndex::new()),
        Arc::new(DefaultClock),
        config.scheduler.clone(),
    );

    for entry in &config.repositories {
        let mut request = AddTaskRequest::new(entry.repository.clone(), config.poll_interval);
        if let Some(dir) = &entry.posts_dir {
            request = request.with_posts_dir(dir.clone());
        }
        if let Err(err) = registry.add_task(request).await {
            error!(repository = %entry.repository, error = %err, "failed to schedule repository");
        }
    }
    if registry.is_empty() {
        return Err(StartupError::NothingScheduled);
    }
    info!(
        tasks = registry.len(),
        interval = ?config.poll_interval,
        "scheduler running; press Ctrl-C to stop"
    );

    let signal = tokio::signal::ctrl_c().await.map_err(StartupError::Signal);
    info!("shutdown requested");
    registry.shutdown().await;
    signal
}
