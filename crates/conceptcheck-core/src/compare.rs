//! Comparator: student text vs. reference content.
//!
//! Produces matched/missing/extra term lists, a similarity score, structural
//! quality signals, and misconception matches for a single explanation.

use std::collections::HashSet;
use std::sync::Arc;

use crate::model::{
    ComparisonResult, ConceptEntry, MisconceptionMatch, NormalizedText, QualityFlag,
    ReferenceContent, Sentence, SimilarityMethod, Span, StructureSignals,
};
use crate::normalize::{term_lemmas, TextNormalizer};
use crate::traits::{cosine_similarity, EmbeddingModel};

/// Below this many words an explanation is penalized for length.
pub const MIN_WORDS: usize = 8;

/// Word count at which the length signal saturates.
const TARGET_WORDS: usize = 30;

const CONNECTIVES: &[&str] = &[
    "because",
    "therefore",
    "since",
    "due to",
    "so that",
    "which means",
    "this means",
    "as a result",
    "thus",
    "hence",
    "in order to",
    "enabling",
    "which allows",
    "allowing",
    "consequently",
];

const CAUSAL_MARKERS: &[&str] = &[
    "because",
    "therefore",
    "since",
    "due to",
    "as a result",
    "which means",
    "consequently",
];

const EXAMPLE_MARKERS: &[&str] = &[
    "example",
    "examples",
    "for instance",
    "such as",
    "e g",
    "like when",
    "in practice",
];

const DEFINITION_MARKERS: &[&str] = &[
    "is a",
    "is an",
    "is the",
    "are a",
    "refers to",
    "is defined as",
    "is called",
    "means that",
];

const PROCESS_MARKERS: &[&str] = &[
    "first",
    "then",
    "finally",
    "step",
    "steps",
    "repeatedly",
    "until",
    "each time",
    "after that",
    "iterate",
    "iterates",
];

/// Words that turn a following misconception phrase into a correct statement.
const NEGATIONS: &[&str] = &["not", "never", "no", "cannot", "nor", "without"];

/// How many tokens before a hit are checked for a negation.
const NEGATION_WINDOW: usize = 3;

const HEDGES: &[&str] = &[
    "i think",
    "maybe",
    "probably",
    "might be",
    "could be",
    "seems like",
    "i believe",
    "i guess",
    "not sure",
    "uncertain",
    "perhaps",
];

/// Find the smallest token range containing every needle lemma, looking only
/// at windows of `needle.len() + 2` tokens. Returns first and last index.
pub(crate) fn find_window(stream: &[&str], needle: &[String]) -> Option<(usize, usize)> {
    let mut wanted: Vec<&str> = needle.iter().map(String::as_str).collect();
    wanted.sort_unstable();
    wanted.dedup();
    if wanted.is_empty() {
        return None;
    }
    let width = wanted.len() + 2;
    for start in 0..stream.len() {
        if !wanted.contains(&stream[start]) {
            continue;
        }
        let end = (start + width).min(stream.len());
        let window = &stream[start..end];
        let mut first = usize::MAX;
        let mut last = 0usize;
        let all_present = wanted.iter().all(|w| match window.iter().position(|t| t == w) {
            Some(p) => {
                first = first.min(start + p);
                last = last.max(start + p);
                true
            }
            None => false,
        });
        if all_present {
            return Some((first, last));
        }
    }
    None
}

/// Whether the lowercase token stream contains `phrase` as contiguous words.
fn contains_phrase(lower: &[&str], phrase: &str) -> bool {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    !words.is_empty() && lower.windows(words.len()).any(|w| w == words.as_slice())
}

fn markers_present(lower: &[&str], markers: &[&str]) -> Vec<String> {
    markers
        .iter()
        .filter(|m| contains_phrase(lower, m))
        .map(|m| m.to_string())
        .collect()
}

/// Shape-of-explanation signals plus the derived structural quality score.
pub fn analyze_structure(
    student: &NormalizedText,
    concept: Option<&ConceptEntry>,
) -> (StructureSignals, f64) {
    let lower: Vec<&str> = student.tokens().map(|t| t.lower.as_str()).collect();
    let lemmas: Vec<&str> = student.tokens().map(|t| t.lemma.as_str()).collect();

    let connectives = markers_present(&lower, CONNECTIVES);
    let has_causal_reasoning = CAUSAL_MARKERS.iter().any(|m| contains_phrase(&lower, m));
    let mentions_application = concept.is_some_and(|c| {
        c.applications
            .iter()
            .any(|a| find_window(&lemmas, &term_lemmas(a)).is_some())
    });
    let has_examples =
        mentions_application || EXAMPLE_MARKERS.iter().any(|m| contains_phrase(&lower, m));
    let has_definition = student.sentences.iter().any(|s| {
        let words: Vec<&str> = s.tokens.iter().map(|t| t.lower.as_str()).collect();
        DEFINITION_MARKERS.iter().any(|m| contains_phrase(&words, m))
    });
    let has_process = PROCESS_MARKERS.iter().any(|m| contains_phrase(&lower, m));
    let hedges = markers_present(&lower, HEDGES);

    let signals = StructureSignals {
        word_count: student.word_count,
        sentence_count: student.sentence_count,
        has_definition,
        has_examples,
        has_causal_reasoning,
        has_process,
        connectives,
        hedges,
    };
    let quality = structural_quality(&signals);
    (signals, quality)
}

fn structural_quality(signals: &StructureSignals) -> f64 {
    if signals.word_count == 0 {
        return 0.0;
    }
    let length = (signals.word_count as f64 / TARGET_WORDS as f64).min(1.0);
    let sentences = match signals.sentence_count {
        0 => 0.0,
        1 => 0.5,
        _ => 1.0,
    };
    let connectives = (signals.connectives.len() as f64 / 2.0).min(1.0);
    let flag = |b: bool| if b { 1.0 } else { 0.0 };

    let mut quality = 0.35 * length
        + 0.15 * sentences
        + 0.2 * connectives
        + 0.2 * flag(signals.has_definition)
        + 0.1 * flag(signals.has_process);
    if signals.word_count < MIN_WORDS {
        quality *= signals.word_count as f64 / MIN_WORDS as f64;
    }
    quality.clamp(0.0, 1.0)
}

/// Lexical cosine of sublinear term-frequency vectors.
pub fn lexical_similarity(a: &[String], b: &[String]) -> f64 {
    use std::collections::BTreeMap;

    fn tf(lemmas: &[String]) -> BTreeMap<&str, f64> {
        let mut counts: BTreeMap<&str, f64> = BTreeMap::new();
        for l in lemmas {
            *counts.entry(l.as_str()).or_insert(0.0) += 1.0;
        }
        for v in counts.values_mut() {
            *v = 1.0 + v.ln();
        }
        counts
    }

    let (ta, tb) = (tf(a), tf(b));
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let dot: f64 = ta
        .iter()
        .filter_map(|(k, va)| tb.get(k).map(|vb| va * vb))
        .sum();
    let norm = |m: &BTreeMap<&str, f64>| m.values().map(|v| v * v).sum::<f64>().sqrt();
    let value = dot / (norm(&ta) * norm(&tb));
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Compares a normalized explanation against reference content.
#[derive(Clone)]
pub struct Comparator {
    normalizer: Arc<TextNormalizer>,
    embedder: Option<Arc<dyn EmbeddingModel>>,
}

impl Comparator {
    pub fn new(normalizer: Arc<TextNormalizer>, embedder: Option<Arc<dyn EmbeddingModel>>) -> Self {
        Self {
            normalizer,
            embedder,
        }
    }

    pub async fn compare(
        &self,
        student: &NormalizedText,
        reference: &ReferenceContent,
        concept: Option<&ConceptEntry>,
    ) -> ComparisonResult {
        let mut flags = Vec::new();

        let reference_text = self.normalizer.normalize(&reference.text);
        let vocabulary: Vec<String> = match concept {
            Some(entry) => entry.key_terms.clone(),
            None => reference_text.key_terms.clone(),
        };
        if vocabulary.is_empty() {
            flags.push(QualityFlag::EmptyVocabulary);
        }

        let (matched, missing) = match_terms(student, &vocabulary);
        let extra = extra_terms(student, &vocabulary);

        let summary_source = if reference.summary.trim().is_empty() {
            &reference.text
        } else {
            &reference.summary
        };
        let (similarity, similarity_method) = self
            .similarity(student, summary_source, &mut flags)
            .await;

        let (structure, structural_quality) = analyze_structure(student, concept);
        if student.word_count > 0 && student.word_count < MIN_WORDS {
            flags.push(QualityFlag::ShortInput);
        }

        let misconceptions = concept
            .map(|c| detect_misconceptions(student, c))
            .unwrap_or_default();

        flags.sort();
        flags.dedup();

        ComparisonResult {
            matched,
            missing,
            extra,
            vocabulary_size: vocabulary.len(),
            similarity,
            similarity_method,
            structural_quality,
            structure,
            misconceptions,
            quality_flags: flags,
        }
    }

    async fn similarity(
        &self,
        student: &NormalizedText,
        summary: &str,
        flags: &mut Vec<QualityFlag>,
    ) -> (f64, SimilarityMethod) {
        if student.is_empty() {
            return (0.0, SimilarityMethod::Lexical);
        }

        if let Some(embedder) = &self.embedder {
            let student_text = student
                .sentences
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            let result = futures::try_join!(embedder.embed(&student_text), embedder.embed(summary));
            match result {
                Ok((a, b)) => {
                    return (cosine_similarity(&a, &b).clamp(0.0, 1.0), SimilarityMethod::Dense);
                }
                Err(e) => {
                    tracing::warn!(model = embedder.name(), error = %e, "embedding failed, using lexical similarity");
                    flags.push(QualityFlag::ModelUnavailable);
                }
            }
        }

        flags.push(QualityFlag::LexicalFallback);
        let reference = self.normalizer.normalize(summary);
        (
            lexical_similarity(&student.content_lemmas, &reference.content_lemmas),
            SimilarityMethod::Lexical,
        )
    }
}

fn match_terms(student: &NormalizedText, vocabulary: &[String]) -> (Vec<String>, Vec<String>) {
    let streams: Vec<Vec<&str>> = student.sentences.iter().map(Sentence::lemmas).collect();
    let mut matched = Vec::new();
    let mut missing = Vec::new();
    for term in vocabulary {
        let lemmas = term_lemmas(term);
        let found = !lemmas.is_empty()
            && streams
                .iter()
                .any(|stream| find_window(stream, &lemmas).is_some());
        if found {
            matched.push(term.clone());
        } else {
            missing.push(term.clone());
        }
    }
    (matched, missing)
}

fn extra_terms(student: &NormalizedText, vocabulary: &[String]) -> Vec<String> {
    let vocabulary_lemmas: HashSet<String> =
        vocabulary.iter().flat_map(|t| term_lemmas(t)).collect();
    student
        .key_terms
        .iter()
        .filter(|kt| {
            !kt.split_whitespace()
                .any(|lemma| vocabulary_lemmas.contains(lemma))
        })
        .cloned()
        .collect()
}

/// Match a concept's own misconception patterns, one hit per pattern per
/// sentence. A hit directly preceded by a negation ("does not work on an
/// unsorted array") does not count.
pub fn detect_misconceptions(
    student: &NormalizedText,
    concept: &ConceptEntry,
) -> Vec<MisconceptionMatch> {
    let mut matches = Vec::new();
    for pattern in &concept.misconceptions {
        let phrase_lemmas: Vec<Vec<String>> =
            pattern.phrases.iter().map(|p| term_lemmas(p)).collect();

        for sentence in &student.sentences {
            let hit = phrase_hit(sentence, &phrase_lemmas).or_else(|| {
                pattern.compiled.iter().find_map(|re| {
                    re.find(&sentence.text).map(|m| Span {
                        start: sentence.span.start + m.start(),
                        end: sentence.span.start + m.end(),
                    })
                })
            });
            let Some(span) = hit else {
                continue;
            };
            if negated(sentence, span.start) {
                tracing::debug!(pattern = %pattern.id, "misconception phrase is negated");
                continue;
            }
            let local = (span.start - sentence.span.start)..(span.end - sentence.span.start);
            matches.push(MisconceptionMatch {
                pattern_id: pattern.id.clone(),
                description: pattern.description.clone(),
                span,
                snippet: sentence.text[local].to_string(),
                correction: pattern.correction.clone(),
            });
        }
    }
    matches.sort_by_key(|m| m.span.start);
    matches
}

fn negated(sentence: &Sentence, hit_start: usize) -> bool {
    let before = sentence
        .tokens
        .iter()
        .take_while(|t| t.span.end <= hit_start)
        .count();
    sentence.tokens[before.saturating_sub(NEGATION_WINDOW)..before]
        .iter()
        .any(|t| NEGATIONS.contains(&t.lower.as_str()) || t.lower.ends_with("n't"))
}

fn phrase_hit(sentence: &Sentence, phrases: &[Vec<String>]) -> Option<Span> {
    let stream = sentence.lemmas();
    phrases.iter().find_map(|lemmas| {
        find_window(&stream, lemmas).map(|(first, last)| Span {
            start: sentence.tokens[first].span.start,
            end: sentence.tokens[last].span.end,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::knowledge::KnowledgeStore;
    use crate::model::ReferenceSourceKind;
    use async_trait::async_trait;
    use chrono::Utc;

    fn setup() -> (KnowledgeStore, Arc<TextNormalizer>) {
        let store = KnowledgeStore::builtin().unwrap();
        let normalizer = Arc::new(TextNormalizer::new(store.vocabulary()));
        (store, normalizer)
    }

    fn kb_reference(entry: &ConceptEntry) -> ReferenceContent {
        ReferenceContent {
            source: ReferenceSourceKind::KnowledgeBase,
            title: entry.name.clone(),
            text: entry.definition.clone(),
            summary: entry.definition.clone(),
            retrieved_at: Utc::now(),
            url: None,
            sections: vec![],
            related_titles: vec![],
            concept_id: Some(entry.id.clone()),
        }
    }

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl EmbeddingModel for FixedEmbedder {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, FetchError> {
            Ok(self.0.clone())
        }
    }

    struct DownEmbedder;

    #[async_trait]
    impl EmbeddingModel for DownEmbedder {
        fn name(&self) -> &str {
            "down"
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, FetchError> {
            Err(FetchError::Network("connection refused".into()))
        }
    }

    #[test]
    fn window_matching_is_order_insensitive_and_bounded() {
        let stream = ["the", "child", "on", "the", "left", "side"];
        let needle = vec!["left".to_string(), "child".to_string()];
        assert_eq!(find_window(&stream, &needle), Some((1, 4)));

        let far = ["left", "a", "b", "c", "d", "child"];
        assert_eq!(find_window(&far, &needle), None);
        assert_eq!(find_window(&stream, &[]), None);
    }

    #[tokio::test]
    async fn bst_scenario_terms() {
        let (store, normalizer) = setup();
        let bst = store.get("Binary Search Tree").unwrap();
        let comparator = Comparator::new(normalizer.clone(), None);
        let student = normalizer.normalize(
            "A binary search tree is a hierarchical structure where left children are smaller and right children are larger, enabling fast search.",
        );
        let result = comparator.compare(&student, &kb_reference(bst), Some(bst)).await;

        for term in ["binary", "tree", "left child", "right child", "search"] {
            assert!(result.matched.contains(&term.to_string()), "missing match {term}");
        }
        assert!(result.missing.contains(&"hierarchy".to_string()));
        assert!(result.misconceptions.is_empty());
        assert_eq!(result.similarity_method, SimilarityMethod::Lexical);
        assert!(result.quality_flags.contains(&QualityFlag::LexicalFallback));
        assert!(result.similarity > 0.7, "similarity {}", result.similarity);
        assert!(result.structure.has_definition);
        assert!(result.extra.contains(&"structure".to_string()));
    }

    #[tokio::test]
    async fn misconceptions_come_only_from_the_concept() {
        let (store, normalizer) = setup();
        let bs = store.get("Binary Search").unwrap();
        let text = "Binary search works on any array and always finds elements in O(1) time.";
        let student = normalizer.normalize(text);

        let ids: Vec<String> = detect_misconceptions(&student, bs)
            .into_iter()
            .map(|m| m.pattern_id)
            .collect();
        assert!(ids.contains(&"unsorted-input".to_string()));
        assert!(ids.contains(&"constant-time".to_string()));
        let known: Vec<&str> = bs.misconceptions.iter().map(|m| m.id.as_str()).collect();
        assert!(ids.iter().all(|id| known.contains(&id.as_str())));

        // Same text against an unrelated concept fires nothing.
        let deadlock = store.get("Deadlock").unwrap();
        assert!(detect_misconceptions(&student, deadlock).is_empty());
    }

    #[test]
    fn negated_misconception_phrases_do_not_fire() {
        let (store, normalizer) = setup();
        let bs = store.get("Binary Search").unwrap();
        for text in [
            "Binary search halves a sorted interval each step; it does not work on an unsorted array.",
            "It doesn't work with unsorted data, so sort first.",
            "Binary search never works on any array that is out of order.",
        ] {
            let matches = detect_misconceptions(&normalizer.normalize(text), bs);
            assert!(matches.is_empty(), "{text:?} flagged {matches:?}");
        }

        let bst = store.get("Binary Search Tree").unwrap();
        let balanced = normalizer.normalize("A plain BST is not always balanced.");
        assert!(detect_misconceptions(&balanced, bst).is_empty());
    }

    #[test]
    fn assertive_unsorted_claims_fire() {
        let (store, normalizer) = setup();
        let bs = store.get("Binary Search").unwrap();
        for text in [
            "Binary search works on unsorted arrays too.",
            "It works with an unsorted list just as well.",
        ] {
            let ids: Vec<String> = detect_misconceptions(&normalizer.normalize(text), bs)
                .into_iter()
                .map(|m| m.pattern_id)
                .collect();
            assert_eq!(ids, vec!["unsorted-input".to_string()], "{text:?}");
        }
    }

    #[test]
    fn misconception_spans_and_snippets() {
        let (store, normalizer) = setup();
        let bs = store.get("Binary Search").unwrap();
        let text = "It is fast. It runs in O( 1 ) time always.";
        let student = normalizer.normalize(text);
        let matches = detect_misconceptions(&student, bs);
        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(&text[m.span.start..m.span.end], m.snippet);
        assert_eq!(m.snippet, "O( 1 )");
    }

    #[tokio::test]
    async fn full_and_zero_coverage() {
        let (store, normalizer) = setup();
        let bst = store.get("BST").unwrap();
        let comparator = Comparator::new(normalizer.clone(), None);

        let all_terms = normalizer.normalize(
            "The binary tree has a root node with a left child and a right child, forming a hierarchy used for search.",
        );
        let full = comparator.compare(&all_terms, &kb_reference(bst), Some(bst)).await;
        assert!(full.missing.is_empty(), "missing {:?}", full.missing);
        assert_eq!(full.matched.len(), full.vocabulary_size);

        let none = normalizer.normalize("Cooking pasta requires boiling salted water for ten minutes.");
        let zero = comparator.compare(&none, &kb_reference(bst), Some(bst)).await;
        assert!(zero.matched.is_empty());
        assert_eq!(zero.missing.len(), zero.vocabulary_size);
    }

    #[tokio::test]
    async fn vocabulary_falls_back_to_reference_terms() {
        let (_, normalizer) = setup();
        let comparator = Comparator::new(normalizer.clone(), None);
        let reference = ReferenceContent {
            source: ReferenceSourceKind::External {
                provider: "test".into(),
            },
            title: "Bloom filter".into(),
            text: "A bloom filter is a probabilistic data structure. A bloom filter uses hash functions and a bit array.".into(),
            summary: "A bloom filter is a probabilistic data structure.".into(),
            retrieved_at: Utc::now(),
            url: None,
            sections: vec![],
            related_titles: vec![],
            concept_id: None,
        };
        let student = normalizer.normalize("A bloom filter sets bits in a bit array.");
        let result = comparator.compare(&student, &reference, None).await;
        assert!(result.vocabulary_size > 0);
        assert!(result.matched.contains(&"bloom filter".to_string()));
        assert!(result.misconceptions.is_empty());
    }

    #[tokio::test]
    async fn dense_similarity_when_model_answers() {
        let (store, normalizer) = setup();
        let bst = store.get("BST").unwrap();
        let comparator = Comparator::new(normalizer.clone(), Some(Arc::new(FixedEmbedder(vec![0.2, 0.4, 0.1]))));
        let student = normalizer.normalize("A tree of nodes.");
        let result = comparator.compare(&student, &kb_reference(bst), Some(bst)).await;
        assert_eq!(result.similarity_method, SimilarityMethod::Dense);
        assert!((result.similarity - 1.0).abs() < 1e-6);
        assert!(!result.quality_flags.contains(&QualityFlag::LexicalFallback));
    }

    #[tokio::test]
    async fn model_failure_falls_back_and_flags() {
        let (store, normalizer) = setup();
        let bst = store.get("BST").unwrap();
        let comparator = Comparator::new(normalizer.clone(), Some(Arc::new(DownEmbedder)));
        let student = normalizer.normalize("A binary search tree keeps smaller keys on the left.");
        let result = comparator.compare(&student, &kb_reference(bst), Some(bst)).await;
        assert_eq!(result.similarity_method, SimilarityMethod::Lexical);
        assert!(result.quality_flags.contains(&QualityFlag::ModelUnavailable));
        assert!(result.quality_flags.contains(&QualityFlag::LexicalFallback));
        assert!((0.0..=1.0).contains(&result.similarity));
    }

    #[test]
    fn structure_signals() {
        let (store, normalizer) = setup();
        let bs = store.get("Binary Search").unwrap();
        let text = "Binary search is an algorithm for sorted arrays. First it checks the middle, then it repeats on one half because the data is ordered. For example, finding elements in a phone book. I think it is fast, maybe.";
        let (signals, quality) = analyze_structure(&normalizer.normalize(text), Some(bs));
        assert!(signals.has_definition);
        assert!(signals.has_process);
        assert!(signals.has_causal_reasoning);
        assert!(signals.has_examples);
        assert_eq!(signals.hedges, vec!["i think".to_string(), "maybe".to_string()]);
        assert!(quality > 0.7 && quality <= 1.0);

        let (_, short) = analyze_structure(&normalizer.normalize("Trees."), None);
        assert!(short < 0.1);
    }

    #[test]
    fn lexical_similarity_bounds() {
        let a: Vec<String> = ["tree", "node"].iter().map(|s| s.to_string()).collect();
        assert!((lexical_similarity(&a, &a) - 1.0).abs() < 1e-9);
        assert_eq!(lexical_similarity(&a, &[]), 0.0);
        let b: Vec<String> = vec!["pasta".into()];
        assert_eq!(lexical_similarity(&a, &b), 0.0);
    }
}
