//! Trait definitions for the external collaborators of the engine.
//!
//! Implementations live in `conceptcheck-sources`; the engine only ever sees
//! these traits, which keeps tests free of network access.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::model::ReferenceContent;

/// A page returned by an external reference source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalPage {
    pub title: String,
    /// Full plain-text content, section headings as `== Heading ==` lines.
    pub text: String,
    /// Introductory summary.
    pub summary: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// Result of looking up a single page title.
#[derive(Debug, Clone)]
pub enum PageLookup {
    Page(ExternalPage),
    /// The title is ambiguous; options are in source order.
    Disambiguation(Vec<String>),
}

/// A searchable source of reference text (e.g. an encyclopedia API).
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    /// Short provider name recorded on fetched content.
    fn name(&self) -> &str;

    /// Search for page titles matching a query, best match first.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>, FetchError>;

    /// Fetch a page by exact title.
    async fn fetch_page(&self, title: &str) -> Result<PageLookup, FetchError>;
}

/// A dense text-representation model.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, FetchError>;
}

/// Storage for resolved reference content, keyed by normalized topic.
///
/// Implementations must tolerate concurrent readers and writers; an insert for
/// an existing key replaces the value. `get` and `insert` sit on the resolve
/// path and must not block the runtime; `clear` and `len` are for tooling.
#[async_trait]
pub trait ReferenceCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Arc<ReferenceContent>>;
    async fn insert(&self, key: &str, content: Arc<ReferenceContent>);
    fn clear(&self);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cosine similarity of two dense vectors; 0.0 for empty or mismatched input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let value = dot / (norm_a.sqrt() * norm_b.sqrt());
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
