//! Reference Resolver: cache-or-fetch of ground-truth content for a topic.
//!
//! Resolution walks an ordered list of strategies (external source first,
//! then the knowledge store). Each strategy either finds content or says why
//! the next one should be tried. Under contention at most one resolution per
//! topic runs; resolution happens on a spawned task so a caller that gives up
//! does not cancel a fetch other callers will benefit from.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::{AnalysisError, FetchError};
use crate::knowledge::{concept_key, KnowledgeStore};
use crate::model::{ReferenceContent, ReferenceSourceKind};
use crate::traits::{ExternalPage, PageLookup, ReferenceCache, ReferenceSource};

/// Longest page text kept as reference content, in characters.
pub const MAX_REFERENCE_CHARS: usize = 8000;

const BORING_SECTIONS: &[&str] = &[
    "see also",
    "references",
    "external links",
    "notes",
    "further reading",
    "bibliography",
    "sources",
];

/// What to do when a candidate page is a disambiguation page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisambiguationPolicy {
    /// Follow the first listed option.
    #[default]
    First,
    /// Move on to the next search candidate.
    Skip,
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Upper bound on one external lookup, searches, fetches and retries
    /// included.
    pub timeout: Duration,
    /// Search hits to try before giving up on the external source.
    pub max_candidates: usize,
    /// Titles requested per search.
    pub search_limit: usize,
    pub disambiguation: DisambiguationPolicy,
    /// Pause before the single retry of a transient failure.
    pub retry_delay: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_candidates: 3,
            search_limit: 5,
            disambiguation: DisambiguationPolicy::First,
            retry_delay: Duration::from_millis(200),
        }
    }
}

/// Why a strategy declined to produce content.
#[derive(Debug, Clone)]
pub struct SkipReason {
    pub message: String,
    /// The failure might go away on retry.
    pub transient: bool,
}

impl SkipReason {
    fn definitive(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

#[derive(Debug)]
pub enum StepOutcome {
    Found(ReferenceContent),
    TryNext(SkipReason),
}

/// One step of the resolution chain.
#[async_trait]
pub trait ResolveStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn attempt(&self, topic: &str, subject_hint: Option<&str>) -> StepOutcome;
}

/// Looks the topic up in an external reference source.
pub struct ExternalStrategy {
    source: Arc<dyn ReferenceSource>,
    config: ResolverConfig,
}

impl ExternalStrategy {
    pub fn new(source: Arc<dyn ReferenceSource>, config: ResolverConfig) -> Self {
        Self { source, config }
    }

    /// One retry on transient failure. The caller bounds the total time.
    async fn call<T, F, Fut>(&self, what: &str, op: F) -> Result<T, FetchError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        match op().await {
            Err(e) if e.is_transient() => {
                let delay = e
                    .retry_after_ms()
                    .map(Duration::from_millis)
                    .unwrap_or(self.config.retry_delay)
                    .min(Duration::from_secs(5));
                tracing::warn!(source = self.source.name(), what, error = %e, "transient failure, retrying once");
                tokio::time::sleep(delay).await;
                op().await
            }
            other => other,
        }
    }

    async fn search(&self, topic: &str, hint: Option<&str>) -> Result<Vec<String>, FetchError> {
        let mut queries = Vec::new();
        if let Some(hint) = hint.map(str::trim).filter(|h| !h.is_empty()) {
            queries.push(format!("{topic} {hint}"));
        }
        queries.push(topic.to_string());

        let mut failure = None;
        for query in &queries {
            match self
                .call("search", || self.source.search(query, self.config.search_limit))
                .await
            {
                Ok(titles) if !titles.is_empty() => return Ok(titles),
                Ok(_) => tracing::debug!(query = %query, "search returned nothing"),
                Err(e) => {
                    tracing::debug!(query = %query, error = %e, "search failed");
                    failure = Some(e);
                }
            }
        }
        failure.map_or(Ok(Vec::new()), Err)
    }

    async fn fetch(&self, title: &str) -> Result<PageLookup, FetchError> {
        self.call("fetch", || self.source.fetch_page(title)).await
    }

    fn build(&self, page: ExternalPage, titles: &[String]) -> ReferenceContent {
        let sections = extract_sections(&page.text);
        let text = truncate_chars(&page.text, MAX_REFERENCE_CHARS);
        let summary = if page.summary.trim().is_empty() {
            first_paragraph(&text)
        } else {
            page.summary
        };
        let related_titles = titles
            .iter()
            .filter(|t| **t != page.title)
            .cloned()
            .collect();
        ReferenceContent {
            source: ReferenceSourceKind::External {
                provider: self.source.name().to_string(),
            },
            title: page.title,
            text,
            summary,
            retrieved_at: Utc::now(),
            url: page.url,
            sections,
            related_titles,
            concept_id: None,
        }
    }

    async fn lookup(&self, topic: &str, subject_hint: Option<&str>) -> StepOutcome {
        let titles = match self.search(topic, subject_hint).await {
            Ok(titles) if titles.is_empty() => {
                return StepOutcome::TryNext(SkipReason::definitive("no search results"))
            }
            Ok(titles) => titles,
            Err(e) => {
                return StepOutcome::TryNext(SkipReason {
                    message: format!("search failed: {e}"),
                    transient: e.is_transient(),
                })
            }
        };

        let mut saw_transient = false;
        let mut last_error = String::from("no usable page among candidates");
        for title in titles.iter().take(self.config.max_candidates) {
            let lookup = match self.fetch(title).await {
                Ok(lookup) => lookup,
                Err(e) => {
                    saw_transient |= e.is_transient();
                    last_error = format!("fetching '{title}' failed: {e}");
                    continue;
                }
            };
            let page = match lookup {
                PageLookup::Page(page) => page,
                PageLookup::Disambiguation(options) => {
                    let follow = match self.config.disambiguation {
                        DisambiguationPolicy::First => options.first(),
                        DisambiguationPolicy::Skip => None,
                    };
                    let Some(option) = follow else {
                        tracing::debug!(title = %title, "skipping disambiguation page");
                        continue;
                    };
                    tracing::debug!(title = %title, option = %option, "following first disambiguation option");
                    match self.fetch(option).await {
                        Ok(PageLookup::Page(page)) => page,
                        Ok(PageLookup::Disambiguation(_)) => continue,
                        Err(e) => {
                            saw_transient |= e.is_transient();
                            last_error = format!("fetching '{option}' failed: {e}");
                            continue;
                        }
                    }
                }
            };
            if usable(&page) {
                return StepOutcome::Found(self.build(page, &titles));
            }
        }

        StepOutcome::TryNext(SkipReason {
            message: last_error,
            transient: saw_transient,
        })
    }
}

fn usable(page: &ExternalPage) -> bool {
    !page.text.trim().is_empty() || !page.summary.trim().is_empty()
}

#[async_trait]
impl ResolveStrategy for ExternalStrategy {
    fn name(&self) -> &str {
        self.source.name()
    }

    #[instrument(skip(self), fields(source = %self.source.name()))]
    async fn attempt(&self, topic: &str, subject_hint: Option<&str>) -> StepOutcome {
        let deadline = tokio::time::Instant::now() + self.config.timeout;
        match tokio::time::timeout_at(deadline, self.lookup(topic, subject_hint)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let e = FetchError::Timeout(self.config.timeout.as_secs());
                tracing::warn!(topic, error = %e, "external lookup ran out of time");
                StepOutcome::TryNext(SkipReason {
                    message: e.to_string(),
                    transient: true,
                })
            }
        }
    }
}

/// Synthesizes reference content from a knowledge entry.
pub struct KnowledgeStoreStrategy {
    store: Arc<KnowledgeStore>,
}

impl KnowledgeStoreStrategy {
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ResolveStrategy for KnowledgeStoreStrategy {
    fn name(&self) -> &str {
        "knowledge base"
    }

    async fn attempt(&self, topic: &str, _subject_hint: Option<&str>) -> StepOutcome {
        let Some(entry) = self.store.get(topic) else {
            return StepOutcome::TryNext(SkipReason::definitive("no knowledge base entry"));
        };
        StepOutcome::Found(ReferenceContent {
            source: ReferenceSourceKind::KnowledgeBase,
            title: entry.name.clone(),
            text: format!("{}\n\nKey terms: {}.", entry.definition, entry.key_terms.join(", ")),
            summary: entry.definition.clone(),
            retrieved_at: Utc::now(),
            url: None,
            sections: Vec::new(),
            related_titles: self.store.related(&entry.name),
            concept_id: Some(entry.id.clone()),
        })
    }
}

struct ResolverInner {
    strategies: Vec<Box<dyn ResolveStrategy>>,
    cache: Arc<dyn ReferenceCache>,
    locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Cheaply cloneable handle; clones share cache and locks.
#[derive(Clone)]
pub struct ReferenceResolver {
    inner: Arc<ResolverInner>,
}

impl ReferenceResolver {
    pub fn new(strategies: Vec<Box<dyn ResolveStrategy>>, cache: Arc<dyn ReferenceCache>) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                strategies,
                cache,
                locks: parking_lot::Mutex::new(HashMap::new()),
            }),
        }
    }

    /// External source (if any) first, knowledge store second.
    pub fn standard(
        source: Option<Arc<dyn ReferenceSource>>,
        store: Arc<KnowledgeStore>,
        cache: Arc<dyn ReferenceCache>,
        config: ResolverConfig,
    ) -> Self {
        let mut strategies: Vec<Box<dyn ResolveStrategy>> = Vec::new();
        if let Some(source) = source {
            strategies.push(Box::new(ExternalStrategy::new(source, config)));
        }
        strategies.push(Box::new(KnowledgeStoreStrategy::new(store)));
        Self::new(strategies, cache)
    }

    pub fn cache(&self) -> &Arc<dyn ReferenceCache> {
        &self.inner.cache
    }

    pub async fn resolve(
        &self,
        topic: &str,
        subject_hint: Option<&str>,
    ) -> Result<Arc<ReferenceContent>, AnalysisError> {
        let key = concept_key(topic);
        if key.is_empty() {
            return Err(AnalysisError::InvalidInput(
                "topic must contain letters or digits".to_string(),
            ));
        }
        if let Some(hit) = self.inner.cache.get(&key).await {
            tracing::debug!(topic, "reference cache hit");
            return checked(hit);
        }

        let inner = Arc::clone(&self.inner);
        let topic = topic.trim().to_string();
        let hint = subject_hint.map(str::to_string);
        let task = tokio::spawn(async move { inner.resolve_uncached(key, topic, hint).await });
        match task.await {
            Ok(result) => result,
            Err(e) => Err(AnalysisError::internal(format!("resolution task failed: {e}"))),
        }
    }
}

impl ResolverInner {
    async fn resolve_uncached(
        &self,
        key: String,
        topic: String,
        hint: Option<String>,
    ) -> Result<Arc<ReferenceContent>, AnalysisError> {
        let lock = Arc::clone(self.locks.lock().entry(key.clone()).or_default());
        let _guard = lock.lock().await;

        let result = self.run_strategies(&key, &topic, hint.as_deref()).await;

        let mut locks = self.locks.lock();
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(&key);
        }
        result
    }

    async fn run_strategies(
        &self,
        key: &str,
        topic: &str,
        hint: Option<&str>,
    ) -> Result<Arc<ReferenceContent>, AnalysisError> {
        // another caller may have finished while we waited for the lock
        if let Some(hit) = self.cache.get(key).await {
            tracing::debug!(topic, "reference cache hit after wait");
            return checked(hit);
        }

        let mut reasons = Vec::new();
        let mut transient = false;
        for strategy in &self.strategies {
            match strategy.attempt(topic, hint).await {
                StepOutcome::Found(content) if content.text.trim().is_empty() => {
                    reasons.push(format!("{}: empty content", strategy.name()));
                }
                StepOutcome::Found(content) => {
                    tracing::info!(topic, strategy = strategy.name(), title = %content.title, "reference resolved");
                    let content = Arc::new(content);
                    self.cache.insert(key, Arc::clone(&content)).await;
                    return Ok(content);
                }
                StepOutcome::TryNext(reason) => {
                    tracing::debug!(topic, strategy = strategy.name(), reason = %reason.message, "trying next strategy");
                    transient |= reason.transient;
                    reasons.push(format!("{}: {}", strategy.name(), reason.message));
                }
            }
        }

        if transient {
            tracing::warn!(topic, reasons = %reasons.join("; "), "reference temporarily unavailable");
            Err(AnalysisError::ReferenceUnavailable {
                topic: topic.to_string(),
                reason: reasons.join("; "),
            })
        } else {
            tracing::info!(topic, "topic could not be resolved");
            Err(AnalysisError::UnresolvedTopic {
                topic: topic.to_string(),
            })
        }
    }
}

fn checked(hit: Arc<ReferenceContent>) -> Result<Arc<ReferenceContent>, AnalysisError> {
    if hit.text.trim().is_empty() {
        return Err(AnalysisError::internal(format!(
            "cached reference '{}' has empty text",
            hit.title
        )));
    }
    Ok(hit)
}

/// Headings written as `== Heading ==` lines, minus boilerplate sections.
pub fn extract_sections(text: &str) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if !(line.starts_with("==") && line.ends_with("==")) || line.len() < 5 {
            continue;
        }
        let heading = line.trim_matches('=').trim();
        if heading.is_empty() || BORING_SECTIONS.contains(&heading.to_lowercase().as_str()) {
            continue;
        }
        if !sections.iter().any(|s| s == heading) {
            sections.push(heading.to_string());
        }
    }
    sections
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

fn first_paragraph(text: &str) -> String {
    text.split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty() && !p.starts_with("=="))
        .unwrap_or("")
        .to_string()
}
