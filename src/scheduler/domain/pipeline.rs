//! Per-commit pipeline state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the six ordered pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Deriving the article topic from the commit message.
    ExtractingTopic,
    /// Embedding the topic.
    Embedding,
    /// Retrieving reference texts nearest to the topic embedding.
    Retrieving,
    /// Generating the article text.
    Generating,
    /// Publishing the article into the repository.
    Publishing,
    /// Indexing the published article for future retrieval.
    Indexing,
}

impl PipelineStage {
    /// Stages in execution order.
    pub const ALL: [Self; 6] = [
        Self::ExtractingTopic,
        Self::Embedding,
        Self::Retrieving,
        Self::Generating,
        Self::Publishing,
        Self::Indexing,
    ];

    /// Returns the canonical string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExtractingTopic => "extracting_topic",
            Self::Embedding => "embedding",
            Self::Retrieving => "retrieving",
            Self::Generating => "generating",
            Self::Publishing => "publishing",
            Self::Indexing => "indexing",
        }
    }

    /// Returns the stage that follows this one, if any.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::ExtractingTopic => Some(Self::Embedding),
            Self::Embedding => Some(Self::Retrieving),
            Self::Retrieving => Some(Self::Generating),
            Self::Generating => Some(Self::Publishing),
            Self::Publishing => Some(Self::Indexing),
            Self::Indexing => None,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a single commit through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum PipelineState {
    /// The commit has not entered the pipeline.
    Pending,
    /// The commit is executing the given stage.
    Running(PipelineStage),
    /// Every stage completed.
    Done,
    /// The given stage failed; no later stage ran.
    Failed(PipelineStage),
}

impl PipelineState {
    /// Moves to the next stage, or to [`PipelineState::Done`] after indexing.
    ///
    /// Terminal states are returned unchanged.
    #[must_use]
    pub const fn advance(self) -> Self {
        match self {
            Self::Pending => Self::Running(PipelineStage::ExtractingTopic),
            Self::Running(stage) => match stage.next() {
                Some(next) => Self::Running(next),
                None => Self::Done,
            },
            Self::Done | Self::Failed(_) => self,
        }
    }

    /// Marks the current stage as failed.
    ///
    /// Only a running state can fail; other states are returned unchanged.
    #[must_use]
    pub const fn fail(self) -> Self {
        match self {
            Self::Running(stage) => Self::Failed(stage),
            Self::Pending | Self::Done | Self::Failed(_) => self,
        }
    }

    /// Returns the stage currently executing, if any.
    #[must_use]
    pub const fn stage(self) -> Option<PipelineStage> {
        match self {
            Self::Running(stage) => Some(stage),
            Self::Pending | Self::Done | Self::Failed(_) => None,
        }
    }

    /// Returns whether the state is `Done` or `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Running(stage) => write!(f, "{stage}"),
            Self::Done => f.write_str("done"),
            Self::Failed(stage) => write!(f, "failed({stage})"),
        }
    }
}
