//! Per-repository commit polling and article generation.
//!
//! A [`services::TaskRegistry`] supervises one polling loop per repository.
//! Each loop wakes on a fixed tick, and once its task's interval has elapsed
//! it lists the commits newer than the task's watermark and carries each one,
//! oldest first, through the six-stage pipeline: topic extraction,
//! embedding, reference retrieval, generation, publishing and indexing.
//!
//! The module follows hexagonal architecture:
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Orchestration services in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
