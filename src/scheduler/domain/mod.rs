//! Domain model for repository polling and commit processing.
//!
//! The scheduler domain models supervised repositories, the commits they
//! produce, and the per-commit pipeline state machine, keeping every
//! collaborator concern outside of the domain boundary.

mod commit;
mod error;
mod ids;
mod pipeline;
mod task;
mod topic;

pub use commit::{CommitAuthor, CommitRecord};
pub use error::SchedulerDomainError;
pub use ids::{CommitSha, DEFAULT_BRANCH, RepositoryRef};
pub use pipeline::{PipelineStage, PipelineState};
pub use task::{
    CommitProgress, FailureDisposition, Task, TaskCounters, TaskSnapshot, TaskStatus,
};
pub use topic::Topic;
