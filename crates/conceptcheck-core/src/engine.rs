//! The two public operations: `analyze` and `resolve_overview`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::cache::InMemoryCache;
use crate::compare::Comparator;
use crate::error::AnalysisError;
use crate::feedback::{FeedbackComposer, FeedbackContext};
use crate::knowledge::{concept_key, KnowledgeStore};
use crate::model::{
    AnalysisResult, ConceptEntry, QualityFlag, ReferenceContent, ReferenceSourceKind,
    ReferenceSummary, StudentSummary, TopicOverview,
};
use crate::normalize::TextNormalizer;
use crate::resolver::{ReferenceResolver, ResolverConfig};
use crate::scoring::{classify, Scorer, ScoringWeights};
use crate::traits::{EmbeddingModel, ReferenceCache, ReferenceSource};

/// Key concepts listed in an overview.
const OVERVIEW_CONCEPTS: usize = 10;
/// Sections listed in an overview.
const OVERVIEW_SECTIONS: usize = 8;
/// Characters of reference summary carried in an analysis result.
const SUMMARY_PREVIEW_CHARS: usize = 500;
/// Key terms of the student text carried in an analysis result.
const STUDENT_KEY_TERMS: usize = 10;

/// Accepted input sizes, in characters after trimming.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputLimits {
    pub min_explanation_chars: usize,
    pub max_explanation_chars: usize,
    pub min_topic_chars: usize,
    pub max_topic_chars: usize,
}

impl Default for InputLimits {
    fn default() -> Self {
        Self {
            min_explanation_chars: 10,
            max_explanation_chars: 5000,
            min_topic_chars: 2,
            max_topic_chars: 200,
        }
    }
}

impl InputLimits {
    pub fn check_topic<'a>(&self, topic: &'a str) -> Result<&'a str, AnalysisError> {
        let topic = topic.trim();
        let chars = topic.chars().count();
        if chars < self.min_topic_chars {
            return Err(AnalysisError::InvalidInput(format!(
                "topic is too short ({chars} characters, minimum {})",
                self.min_topic_chars
            )));
        }
        if chars > self.max_topic_chars {
            return Err(AnalysisError::InvalidInput(format!(
                "topic is too long ({chars} characters, maximum {})",
                self.max_topic_chars
            )));
        }
        if concept_key(topic).is_empty() {
            return Err(AnalysisError::InvalidInput(
                "topic must contain letters or digits".to_string(),
            ));
        }
        Ok(topic)
    }

    pub fn check_explanation<'a>(&self, explanation: &'a str) -> Result<&'a str, AnalysisError> {
        let explanation = explanation.trim();
        if explanation.is_empty() {
            return Err(AnalysisError::InvalidInput("explanation is empty".to_string()));
        }
        let chars = explanation.chars().count();
        if chars < self.min_explanation_chars {
            return Err(AnalysisError::InvalidInput(format!(
                "explanation is too short ({chars} characters, minimum {})",
                self.min_explanation_chars
            )));
        }
        if chars > self.max_explanation_chars {
            return Err(AnalysisError::InvalidInput(format!(
                "explanation is too long ({chars} characters, maximum {})",
                self.max_explanation_chars
            )));
        }
        Ok(explanation)
    }
}

/// Assembles a [`ConceptEngine`] from its collaborators.
pub struct EngineBuilder {
    knowledge: Arc<KnowledgeStore>,
    source: Option<Arc<dyn ReferenceSource>>,
    embedder: Option<Arc<dyn EmbeddingModel>>,
    cache: Option<Arc<dyn ReferenceCache>>,
    resolver_config: ResolverConfig,
    weights: ScoringWeights,
    limits: InputLimits,
}

impl EngineBuilder {
    pub fn source(mut self, source: Arc<dyn ReferenceSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingModel>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn ReferenceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn resolver_config(mut self, config: ResolverConfig) -> Self {
        self.resolver_config = config;
        self
    }

    pub fn weights(mut self, weights: ScoringWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn limits(mut self, limits: InputLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn build(self) -> ConceptEngine {
        let normalizer = Arc::new(TextNormalizer::new(self.knowledge.vocabulary()));
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(InMemoryCache::new()));
        let resolver = ReferenceResolver::standard(
            self.source,
            Arc::clone(&self.knowledge),
            cache,
            self.resolver_config,
        );
        ConceptEngine {
            comparator: Comparator::new(Arc::clone(&normalizer), self.embedder),
            normalizer,
            knowledge: self.knowledge,
            scorer: Scorer::new(self.weights),
            composer: FeedbackComposer::new(),
            resolver,
            limits: self.limits,
        }
    }
}

/// Shared, read-only analysis engine. Cheap to clone.
#[derive(Clone)]
pub struct ConceptEngine {
    knowledge: Arc<KnowledgeStore>,
    normalizer: Arc<TextNormalizer>,
    comparator: Comparator,
    scorer: Scorer,
    composer: FeedbackComposer,
    resolver: ReferenceResolver,
    limits: InputLimits,
}

impl ConceptEngine {
    pub fn builder(knowledge: Arc<KnowledgeStore>) -> EngineBuilder {
        EngineBuilder {
            knowledge,
            source: None,
            embedder: None,
            cache: None,
            resolver_config: ResolverConfig::default(),
            weights: ScoringWeights::default(),
            limits: InputLimits::default(),
        }
    }

    pub fn knowledge(&self) -> &KnowledgeStore {
        &self.knowledge
    }

    pub fn cache(&self) -> &Arc<dyn ReferenceCache> {
        self.resolver.cache()
    }

    pub fn limits(&self) -> &InputLimits {
        &self.limits
    }

    /// Knowledge entry for a topic, either by name or by the entry the
    /// reference content was synthesized from.
    fn concept_for(&self, topic: &str, reference: &ReferenceContent) -> Option<&ConceptEntry> {
        self.knowledge.get(topic).or_else(|| {
            reference
                .concept_id
                .as_deref()
                .and_then(|id| self.knowledge.get(id))
        })
    }

    /// Assess a free-text explanation of `topic`.
    ///
    /// Input is validated before any cache or network access.
    #[instrument(skip(self, explanation), fields(chars = explanation.len()))]
    pub async fn analyze(
        &self,
        explanation: &str,
        topic: &str,
        subject_hint: Option<&str>,
    ) -> Result<AnalysisResult, AnalysisError> {
        let topic = self.limits.check_topic(topic)?;
        let explanation = self.limits.check_explanation(explanation)?;
        let hint = subject_hint.map(str::trim).filter(|s| !s.is_empty());

        let reference = self.resolver.resolve(topic, hint).await?;
        let concept = self.concept_for(topic, &reference);

        let student = self.normalizer.normalize(explanation);
        let comparison = self.comparator.compare(&student, &reference, concept).await;
        let score = self.scorer.score(&comparison);
        let level = classify(&score, comparison.misconceptions.len());

        let subject = hint
            .map(str::to_string)
            .or_else(|| concept.map(|c| c.subject.clone()));
        let display_topic = concept.map_or(topic, |c| c.name.as_str());
        let feedback = self.composer.compose(
            &comparison,
            &score,
            &FeedbackContext {
                topic: display_topic,
                subject: subject.as_deref(),
                concept,
                reference: &reference,
            },
        );

        let mut quality_flags = comparison.quality_flags.clone();
        quality_flags.extend(score.flags.iter().copied());
        if reference.source == ReferenceSourceKind::KnowledgeBase {
            quality_flags.push(QualityFlag::KnowledgeBaseReference);
        }
        quality_flags.sort();
        quality_flags.dedup();

        tracing::info!(
            topic,
            level = %level,
            coverage = score.coverage,
            correctness = score.correctness,
            confidence = score.confidence,
            "analysis complete"
        );

        Ok(AnalysisResult {
            topic: topic.to_string(),
            subject,
            student: StudentSummary {
                word_count: student.word_count,
                sentence_count: student.sentence_count,
                key_terms: student
                    .key_terms
                    .iter()
                    .take(STUDENT_KEY_TERMS)
                    .cloned()
                    .collect(),
                complexity_ratio: student.complexity_ratio,
            },
            reference: ReferenceSummary {
                source: reference.source.clone(),
                title: reference.title.clone(),
                summary: preview(&reference.summary, SUMMARY_PREVIEW_CHARS),
                url: reference.url.clone(),
            },
            matched_terms: comparison.matched,
            missing_terms: comparison.missing,
            extra_terms: comparison.extra,
            similarity: comparison.similarity,
            similarity_method: comparison.similarity_method,
            structural_quality: comparison.structural_quality,
            score,
            level,
            misconceptions: comparison.misconceptions,
            feedback,
            quality_flags,
        })
    }

    /// Reference overview of a topic without any student text.
    #[instrument(skip(self))]
    pub async fn resolve_overview(&self, topic: &str) -> Result<TopicOverview, AnalysisError> {
        let topic = self.limits.check_topic(topic)?;
        let reference = self.resolver.resolve(topic, None).await?;
        let concept = self.concept_for(topic, &reference);

        let key_concepts = match concept {
            Some(entry) => entry.key_terms.clone(),
            None => {
                let source = if reference.summary.trim().is_empty() {
                    &reference.text
                } else {
                    &reference.summary
                };
                self.normalizer.normalize(source).key_terms
            }
        };

        Ok(TopicOverview {
            topic: topic.to_string(),
            title: reference.title.clone(),
            source: reference.source.clone(),
            summary: reference.summary.clone(),
            url: reference.url.clone(),
            key_concepts: key_concepts.into_iter().take(OVERVIEW_CONCEPTS).collect(),
            sections: reference
                .sections
                .iter()
                .take(OVERVIEW_SECTIONS)
                .cloned()
                .collect(),
            related_concepts: concept
                .map(|c| self.knowledge.related(&c.name))
                .unwrap_or_default(),
            related_titles: reference.related_titles.clone(),
            difficulty: concept.map(|c| c.difficulty),
        })
    }
}

fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", text[..idx].trim_end()),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::model::UnderstandingLevel;

    fn offline_engine() -> ConceptEngine {
        ConceptEngine::builder(Arc::new(KnowledgeStore::builtin().unwrap())).build()
    }

    #[test]
    fn limits_reject_bad_input() {
        let limits = InputLimits::default();
        assert!(limits.check_explanation("   ").is_err());
        assert!(limits.check_explanation("too short").is_err());
        assert!(limits.check_explanation(&"a".repeat(5001)).is_err());
        assert_eq!(limits.check_explanation("  long enough text  ").unwrap(), "long enough text");
        assert!(limits.check_topic("x").is_err());
        assert!(limits.check_topic("??").is_err());
        assert_eq!(limits.check_topic(" BST ").unwrap(), "BST");
    }

    #[tokio::test]
    async fn empty_explanation_never_touches_cache() {
        let engine = offline_engine();
        let err = engine.analyze("", "Binary Search Tree", None).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Input);
        assert!(engine.cache().is_empty());
    }

    #[tokio::test]
    async fn offline_analysis_uses_knowledge_base() {
        let engine = offline_engine();
        let result = engine
            .analyze(
                "A binary search tree is a tree where every node has a left child with a smaller key and a right child with a larger key, so search is fast.",
                "bst",
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.reference.title, "Binary Search Tree");
        assert_eq!(result.subject.as_deref(), Some("data structures"));
        assert!(result.quality_flags.contains(&QualityFlag::KnowledgeBaseReference));
        assert!(result.matched_terms.contains(&"left child".to_string()));
        assert_ne!(result.level, UnderstandingLevel::Misconception);
        assert_eq!(engine.cache().len(), 1);
    }

    #[tokio::test]
    async fn word_variants_count_as_term_matches() {
        let engine = offline_engine();
        let result = engine
            .analyze(
                "Binary search repeatedly halves a sorted interval by comparing the target with the middle element.",
                "Binary Search",
                None,
            )
            .await
            .unwrap();
        for term in ["half", "sorted", "middle", "interval"] {
            assert!(
                result.matched_terms.contains(&term.to_string()),
                "expected '{term}' in {:?}",
                result.matched_terms
            );
        }
        assert!(result.misconceptions.is_empty());

        let quicksort = engine
            .analyze(
                "Quicksort picks a pivot, keeps partitioning around it and swapping elements, dividing the work recursively.",
                "Quicksort",
                None,
            )
            .await
            .unwrap();
        for term in ["pivot", "partition", "swap", "divide"] {
            assert!(
                quicksort.matched_terms.contains(&term.to_string()),
                "expected '{term}' in {:?}",
                quicksort.matched_terms
            );
        }
    }

    #[tokio::test]
    async fn negated_unsorted_claim_is_not_a_misconception() {
        let engine = offline_engine();
        let result = engine
            .analyze(
                "Binary search halves a sorted interval each step, comparing the target with the middle element; it does not work on an unsorted array.",
                "Binary Search",
                None,
            )
            .await
            .unwrap();
        assert!(result.misconceptions.is_empty(), "{:?}", result.misconceptions);
        assert_ne!(result.level, UnderstandingLevel::Misconception);
    }

    #[tokio::test]
    async fn overview_lists_key_concepts_and_relations() {
        let engine = offline_engine();
        let overview = engine.resolve_overview("Deadlock").await.unwrap();
        assert_eq!(overview.title, "Deadlock");
        assert!(!overview.key_concepts.is_empty());
        assert!(overview.related_concepts.contains(&"Process Scheduling".to_string()));
        assert!(overview.difficulty.is_some());
    }

    #[tokio::test]
    async fn unknown_topic_offline_is_resolution_error() {
        let engine = offline_engine();
        let err = engine
            .analyze("Monads wrap values in a computational context.", "Monads", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Resolution);
        assert!(err.to_string().contains("Monads"));
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        assert_eq!(preview("ééé", 2), "éé...");
        assert_eq!(preview("short", 10), "short");
    }
}
