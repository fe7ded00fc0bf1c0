//! Application services: the commit pipeline, per-task polling loops and the
//! registry that supervises them.

mod config;
mod pipeline;
mod polling;
mod registry;

pub use config::{PipelineConfig, SchedulerConfig};
pub use pipeline::{
    PipelineError, PipelineExecutor, PipelineFailure, PipelineResult, PublishedArticle,
};
pub use polling::{PollingLoop, RunEnd, RunReport, TaskCommand, WakeOutcome};
pub use registry::{
    AddTaskRequest, TaskHandle, TaskRegistry, TaskRegistryError, TaskRegistryResult,
};
