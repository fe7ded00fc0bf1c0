//! Unit tests for the scheduler module.
//!
//! Domain rules are tested directly; services run against the in-memory
//! adapters with a scripted generator and a controllable clock.

mod registry_tests;
mod support;
