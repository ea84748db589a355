//! Mock reference source and embedding model for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use conceptcheck_core::error::FetchError;
use conceptcheck_core::traits::{EmbeddingModel, ExternalPage, PageLookup, ReferenceSource};

/// A scripted reference source for exercising the engine without network access.
///
/// Searches match registered queries case-insensitively; every registered
/// page is also findable by its own title.
#[derive(Default)]
pub struct MockSource {
    searches: HashMap<String, Vec<String>>,
    pages: HashMap<String, PageLookup>,
    delay: Duration,
    /// Transient failures still to inject, shared by search and fetch.
    failures_left: AtomicU32,
    search_count: AtomicU32,
    fetch_count: AtomicU32,
    queries: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a page findable by its title.
    pub fn with_page(mut self, title: &str, text: &str) -> Self {
        let summary = text.split("\n\n").next().unwrap_or_default().trim().to_string();
        self.searches
            .entry(title.to_lowercase())
            .or_default()
            .push(title.to_string());
        self.pages.insert(
            title.to_string(),
            PageLookup::Page(ExternalPage {
                title: title.to_string(),
                text: text.to_string(),
                summary,
                url: Some(format!(
                    "https://example.org/wiki/{}",
                    title.replace(' ', "_")
                )),
            }),
        );
        self
    }

    /// Make `query` return exactly `titles`.
    pub fn with_search(mut self, query: &str, titles: &[&str]) -> Self {
        self.searches.insert(
            query.to_lowercase(),
            titles.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    pub fn with_disambiguation(mut self, title: &str, options: &[&str]) -> Self {
        self.pages.insert(
            title.to_string(),
            PageLookup::Disambiguation(options.iter().map(|o| o.to_string()).collect()),
        );
        self
    }

    /// Fail the next `n` calls with a network error.
    pub fn failing_transiently(self, n: u32) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Delay every call, to widen race windows in concurrency tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn search_count(&self) -> u32 {
        self.search_count.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Total calls of any kind.
    pub fn call_count(&self) -> u32 {
        self.search_count() + self.fetch_count()
    }

    /// Every search query received, in order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }

    async fn pause_or_fail(&self) -> Result<(), FetchError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(FetchError::Network("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ReferenceSource for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<String>, FetchError> {
        self.search_count.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().push(query.to_string());
        self.pause_or_fail().await?;
        Ok(self
            .searches
            .get(&query.to_lowercase())
            .map(|titles| titles.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn fetch_page(&self, title: &str) -> Result<PageLookup, FetchError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.pause_or_fail().await?;
        self.pages
            .get(title)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(title.to_string()))
    }
}

const EMBEDDING_DIMS: usize = 64;

/// Deterministic bag-of-words embedding: each lowercase word is hashed into
/// one of 64 buckets.
pub struct MockEmbedder {
    available: bool,
    call_count: AtomicU32,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self {
            available: true,
            call_count: AtomicU32::new(0),
        }
    }

    /// An embedder whose every call fails, to exercise the lexical fallback.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            call_count: AtomicU32::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

fn bucket(word: &str) -> usize {
    // FNV-1a
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in word.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % EMBEDDING_DIMS as u64) as usize
}

#[async_trait]
impl EmbeddingModel for MockEmbedder {
    fn name(&self) -> &str {
        "mock"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, FetchError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if !self.available {
            return Err(FetchError::Network("mock embedder is offline".into()));
        }
        let mut vector = vec![0.0f32; EMBEDDING_DIMS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            vector[bucket(&word.to_lowercase())] += 1.0;
        }
        Ok(vector)
    }
}
