//! Chronicler: turns repository commits into published articles.
//!
//! Chronicler watches a set of source repositories. For every new commit it
//! derives a topic, retrieves related earlier articles from an embedding
//! index, asks a generative backend for a new article, publishes it back to
//! the repository, and indexes it for future retrieval.
//!
//! # Architecture
//!
//! Chronicler follows hexagonal architecture principles:
//!
//! - **Domain**: Pure business logic with no infrastructure dependencies
//! - **Ports**: Abstract trait interfaces for external interactions
//! - **Adapters**: Concrete implementations of ports (in-memory, GitHub, Gemini)
//!
//! # Modules
//!
//! - [`scheduler`]: Task registry, polling loops and the commit pipeline
//! - [`config`]: Environment-driven application configuration

pub mod config;
pub mod scheduler;
