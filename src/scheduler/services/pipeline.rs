//! Six-stage commit pipeline: topic, embed, retrieve, generate, publish,
//! index.

use crate::scheduler::{
    domain::{CommitRecord, CommitSha, PipelineStage, PipelineState, RepositoryRef, Topic},
    ports::{
        ContentGenerator, EmbeddingIndex, GenerationError, IndexError, PutFileRequest,
        SourceControlClient, SourceControlError,
    },
    services::PipelineConfig,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Cause of a pipeline failure.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Embedding or generation failed.
    #[error(transparent)]
    Generation(#[from] GenerationError),
    /// Reference retrieval or indexing failed.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// The article could not be published.
    #[error(transparent)]
    Publish(#[from] SourceControlError),
}

impl PipelineError {
    /// Returns whether source control rejected the credentials.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Publish(err) if err.is_auth())
    }
}

/// A commit that stopped at `stage`.
#[derive(Debug, Clone, Error)]
#[error("commit {commit} failed while {stage}: {error}")]
pub struct PipelineFailure {
    /// Commit being processed.
    pub commit: CommitSha,
    /// Stage that failed.
    pub stage: PipelineStage,
    /// Underlying cause.
    #[source]
    pub error: PipelineError,
}

impl PipelineFailure {
    /// Returns the terminal pipeline state for this failure.
    #[must_use]
    pub const fn state(&self) -> PipelineState {
        PipelineState::Failed(self.stage)
    }

    /// Returns whether source control rejected the credentials.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        self.error.is_auth()
    }
}

/// Article published for a commit.
#[derive(Debug, Clone)]
pub struct PublishedArticle {
    /// Commit the article was generated from.
    pub commit: CommitSha,
    /// Extracted topic.
    pub topic: Topic,
    /// Normalized slug used for the file name.
    pub slug: String,
    /// Repository path of the article.
    pub path: String,
    /// Content hash after publishing.
    pub content_hash: String,
    /// Whether an existing article was replaced.
    pub updated_existing: bool,
    /// Number of reference texts the article was grounded on.
    pub reference_count: usize,
    /// Indexing failure, if any. The article is published regardless.
    pub index_error: Option<PipelineError>,
}

impl PublishedArticle {
    /// Returns whether the article was added to the embedding index.
    #[must_use]
    pub const fn is_indexed(&self) -> bool {
        self.index_error.is_none()
    }
}

/// Outcome of processing one commit.
pub type PipelineResult = Result<PublishedArticle, PipelineFailure>;

/// Carries commits through the pipeline stages.
pub struct PipelineExecutor<S, G, I>
where
    S: SourceControlClient,
    G: ContentGenerator,
    I: EmbeddingIndex,
{
    source_control: Arc<S>,
    generator: Arc<G>,
    index: Arc<I>,
    config: PipelineConfig,
}

impl<S, G, I> Clone for PipelineExecutor<S, G, I>
where
    S: SourceControlClient,
    G: ContentGenerator,
    I: EmbeddingIndex,
{
    fn clone(&self) -> Self {
        Self {
            source_control: Arc::clone(&self.source_control),
            generator: Arc::clone(&self.generator),
            index: Arc::clone(&self.index),
            config: self.config.clone(),
        }
    }
}

/// Tracks the state machine for one commit and tags failures with the
/// stage they occurred in.
struct StageTracker<'a> {
    commit: &'a CommitSha,
    state: PipelineState,
}

impl<'a> StageTracker<'a> {
    const fn new(commit: &'a CommitSha) -> Self {
        Self {
            commit,
            state: PipelineState::Pending,
        }
    }

    fn advance(&mut self) {
        self.state = self.state.advance();
        debug!(commit = %self.commit, state = %self.state, "pipeline stage");
    }

    fn current_stage(&self) -> PipelineStage {
        self.state.stage().unwrap_or(PipelineStage::ExtractingTopic)
    }

    fn fail(&mut self, error: impl Into<PipelineError>) -> PipelineFailure {
        let stage = self.current_stage();
        self.state = self.state.fail();
        PipelineFailure {
            commit: self.commit.clone(),
            stage,
            error: error.into(),
        }
    }
}

impl<S, G, I> PipelineExecutor<S, G, I>
where
    S: SourceControlClient,
    G: ContentGenerator,
    I: EmbeddingIndex,
{
    /// Creates a pipeline executor.
    #[must_use]
    pub const fn new(
        source_control: Arc<S>,
        generator: Arc<G>,
        index: Arc<I>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source_control,
            generator,
            index,
            config,
        }
    }

    /// Returns a copy that publishes under `posts_dir`.
    #[must_use]
    pub fn with_posts_dir(mut self, posts_dir: impl Into<String>) -> Self {
        self.config = self.config.with_posts_dir(posts_dir);
        self
    }

    /// Returns the pipeline configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs every stage for `commit`.
    ///
    /// Stages are attempted once each, in order. A failure in stages 2 to 5
    /// stops the commit; an indexing failure is recorded on the returned
    /// article instead.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineFailure`] naming the failed stage.
    pub async fn process(
        &self,
        repository: &RepositoryRef,
        commit: &CommitRecord,
    ) -> PipelineResult {
        let mut tracker = StageTracker::new(commit.sha());

        tracker.advance();
        let topic = Topic::from_commit(commit);

        tracker.advance();
        let topic_vector = self
            .generator
            .embed(topic.as_str())
            .await
            .map_err(|err| tracker.fail(err))?;

        tracker.advance();
        let references = self
            .index
            .query(&self.config.collection, &topic_vector, self.config.top_k)
            .await
            .map_err(|err| tracker.fail(err))?
            .into_iter()
            .map(|scored| scored.text)
            .collect::<Vec<_>>();

        tracker.advance();
        let article = self
            .generator
            .generate(topic.as_str(), &references)
            .await
            .map_err(|err| tracker.fail(err))?;

        tracker.advance();
        let slug = topic.slug();
        let path = self.config.article_path(&slug);
        let (content_hash, updated_existing) = self
            .publish(repository, &topic, &path, &article)
            .await
            .map_err(|err| tracker.fail(err))?;
        info!(
            repository = %repository,
            commit = %commit.sha(),
            path = %path,
            updated_existing,
            "article published"
        );

        tracker.advance();
        let index_error = self.index_article(&article).await.err();
        if let Some(err) = &index_error {
            warn!(
                repository = %repository,
                commit = %commit.sha(),
                error = %err,
                "article published but not indexed"
            );
        }

        tracker.advance();
        Ok(PublishedArticle {
            commit: commit.sha().clone(),
            topic,
            slug,
            path,
            content_hash,
            updated_existing,
            reference_count: references.len(),
            index_error,
        })
    }

    async fn publish(
        &self,
        repository: &RepositoryRef,
        topic: &Topic,
        path: &str,
        article: &str,
    ) -> Result<(String, bool), SourceControlError> {
        let existing_hash = self.source_control.file_hash(repository, path).await?;
        let updated_existing = existing_hash.is_some();
        let verb = if updated_existing { "Update" } else { "Add" };
        let request = PutFileRequest {
            path: path.to_owned(),
            content: article.to_owned(),
            message: format!("{verb} article: {topic}"),
            existing_hash,
        };
        let content_hash = self.source_control.put_file(repository, request).await?;
        Ok((content_hash, updated_existing))
    }

    async fn index_article(&self, article: &str) -> Result<(), PipelineError> {
        let vector = self.generator.embed(article).await?;
        self.index
            .insert(&self.config.collection, article, &vector)
            .await?;
        Ok(())
    }
}
