//! In-memory embedding index with brute-force L2 search.

use crate::scheduler::ports::{EmbeddingIndex, IndexError, IndexResult, ScoredText};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Thread-safe in-memory vector index.
///
/// Every collection fixes its dimension with the first inserted vector.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEmbeddingIndex {
    state: Arc<RwLock<InMemoryIndexState>>,
}

#[derive(Debug, Default)]
struct InMemoryIndexState {
    collections: HashMap<String, Vec<Entry>>,
    query_failure: Option<IndexError>,
    insert_failure: Option<IndexError>,
}

#[derive(Debug, Clone)]
struct Entry {
    text: String,
    vector: Vec<f32>,
}

#[expect(
    clippy::float_arithmetic,
    reason = "L2 distance is computed over embedding vectors"
)]
fn l2_distance(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right)
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f32>()
        .sqrt()
}

fn lock_error(err: &impl ToString) -> IndexError {
    IndexError::backend(std::io::Error::other(err.to_string()))
}

fn check_dimension(collection: &str, entries: &[Entry], vector: &[f32]) -> IndexResult<()> {
    match entries.first() {
        Some(entry) if entry.vector.len() != vector.len() => Err(IndexError::DimensionMismatch {
            collection: collection.to_owned(),
            expected: entry.vector.len(),
            actual: vector.len(),
        }),
        _ => Ok(()),
    }
}

impl InMemoryEmbeddingIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next query fail with `error`.
    pub fn fail_next_query(&self, error: IndexError) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .query_failure = Some(error);
    }

    /// Makes the next insert fail with `error`.
    pub fn fail_next_insert(&self, error: IndexError) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert_failure = Some(error);
    }

    /// Returns the texts stored in `collection`, in insertion order.
    #[must_use]
    pub fn texts(&self, collection: &str) -> Vec<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .collections
            .get(collection)
            .map(|entries| entries.iter().map(|entry| entry.text.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EmbeddingIndex for InMemoryEmbeddingIndex {
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> IndexResult<Vec<ScoredText>> {
        let mut state = self.state.write().map_err(|err| lock_error(&err))?;
        if let Some(error) = state.query_failure.take() {
            return Err(error);
        }
        let Some(entries) = state.collections.get(collection) else {
            return Ok(Vec::new());
        };
        check_dimension(collection, entries, vector)?;

        let mut scored = entries
            .iter()
            .map(|entry| ScoredText {
                text: entry.text.clone(),
                distance: l2_distance(&entry.vector, vector),
            })
            .collect::<Vec<_>>();
        scored.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn insert(&self, collection: &str, text: &str, vector: &[f32]) -> IndexResult<()> {
        let mut state = self.state.write().map_err(|err| lock_error(&err))?;
        if let Some(error) = state.insert_failure.take() {
            return Err(error);
        }
        let entries = state.collections.entry(collection.to_owned()).or_default();
        check_dimension(collection, entries, vector)?;
        entries.push(Entry {
            text: text.to_owned(),
            vector: vector.to_vec(),
        });
        Ok(())
    }
}
