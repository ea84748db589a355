//! Core data model types for conceptcheck.
//!
//! Knowledge entries, reference content, normalized text, and the result
//! types produced by the comparison/scoring/feedback pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named technical concept with its reference vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptEntry {
    /// Normalized lookup key (e.g. "binary_search_tree").
    pub id: String,
    /// Canonical display name.
    pub name: String,
    /// Subject area (e.g. "data structures").
    pub subject: String,
    /// One or two sentence definition.
    pub definition: String,
    /// Ordered, unique, lowercased key terms.
    pub key_terms: Vec<String>,
    /// Known misconception patterns for this concept only.
    pub misconceptions: Vec<MisconceptionPattern>,
    /// Concept names the student should know first.
    pub prerequisites: Vec<String>,
    /// Real-world uses of the concept.
    pub applications: Vec<String>,
    /// Alternative lookup names (e.g. "BST").
    pub aliases: Vec<String>,
    /// 1 (introductory) to 5 (advanced).
    pub difficulty: u8,
}

/// A known wrong belief about a concept and how to detect it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MisconceptionPattern {
    pub id: String,
    pub description: String,
    /// Phrases matched by base-form containment within a small window.
    #[serde(default)]
    pub phrases: Vec<String>,
    /// Case-insensitive regular expressions matched per sentence.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Message shown to the student when the pattern fires.
    pub correction: String,
    /// `patterns`, compiled when the knowledge store is loaded.
    #[serde(skip)]
    pub compiled: Vec<regex::Regex>,
}

/// Where a piece of reference content came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceSourceKind {
    KnowledgeBase,
    External { provider: String },
}

impl fmt::Display for ReferenceSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceSourceKind::KnowledgeBase => write!(f, "knowledge base"),
            ReferenceSourceKind::External { provider } => write!(f, "{provider}"),
        }
    }
}

/// Ground-truth text for a topic, either fetched or synthesized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceContent {
    pub source: ReferenceSourceKind,
    pub title: String,
    pub text: String,
    pub summary: String,
    pub retrieved_at: DateTime<Utc>,
    #[serde(default)]
    pub url: Option<String>,
    /// Section headings found in the page text.
    #[serde(default)]
    pub sections: Vec<String>,
    /// Other search hits for the same query, in source order.
    #[serde(default)]
    pub related_titles: Vec<String>,
    /// Set when the content was synthesized from a knowledge entry.
    #[serde(default)]
    pub concept_id: Option<String>,
}

/// Byte range into the original text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Coarse part-of-speech tag assigned by the heuristic tagger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PosTag {
    Noun,
    Verb,
    Adjective,
    Adverb,
    Determiner,
    Preposition,
    Pronoun,
    Conjunction,
    Number,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    /// Surface form as written.
    pub text: String,
    pub lower: String,
    /// Base form used for matching.
    pub lemma: String,
    pub pos: PosTag,
    pub span: Span,
    pub is_stopword: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sentence {
    pub text: String,
    pub span: Span,
    pub tokens: Vec<Token>,
}

impl Sentence {
    /// Base forms of every token, stopwords included.
    pub fn lemmas(&self) -> Vec<&str> {
        self.tokens.iter().map(|t| t.lemma.as_str()).collect()
    }
}

/// Output of the text normalizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedText {
    pub sentences: Vec<Sentence>,
    /// Base forms with stopwords removed (technical terms always kept).
    pub content_lemmas: Vec<String>,
    /// Ranked candidate key terms.
    pub key_terms: Vec<String>,
    pub word_count: usize,
    pub sentence_count: usize,
    /// Share of words longer than six characters.
    pub complexity_ratio: f64,
}

impl NormalizedText {
    pub fn is_empty(&self) -> bool {
        self.word_count == 0
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.sentences.iter().flat_map(|s| s.tokens.iter())
    }
}

/// How the similarity score was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMethod {
    Dense,
    Lexical,
}

impl fmt::Display for SimilarityMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimilarityMethod::Dense => write!(f, "dense"),
            SimilarityMethod::Lexical => write!(f, "lexical"),
        }
    }
}

/// Conditions that lower trust in a result without failing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    /// Similarity was computed lexically.
    LexicalFallback,
    /// An embedding model was configured but did not answer.
    ModelUnavailable,
    /// No reference vocabulary was available, coverage is 0.
    EmptyVocabulary,
    /// The explanation contained no words.
    NoEvidence,
    /// The explanation is shorter than the minimum useful length.
    ShortInput,
    /// The reference was synthesized from the knowledge base.
    KnowledgeBaseReference,
}

/// Shape-of-explanation signals found by the comparator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructureSignals {
    pub word_count: usize,
    pub sentence_count: usize,
    pub has_definition: bool,
    pub has_examples: bool,
    pub has_causal_reasoning: bool,
    pub has_process: bool,
    /// Distinct explanatory connectives used ("because", "which means", ...).
    pub connectives: Vec<String>,
    /// Distinct hedging phrases used ("i think", "maybe", ...).
    pub hedges: Vec<String>,
}

/// A misconception pattern that fired, with where it fired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MisconceptionMatch {
    pub pattern_id: String,
    pub description: String,
    pub span: Span,
    pub snippet: String,
    pub correction: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub matched: Vec<String>,
    pub missing: Vec<String>,
    pub extra: Vec<String>,
    pub vocabulary_size: usize,
    pub similarity: f64,
    pub similarity_method: SimilarityMethod,
    pub structural_quality: f64,
    pub structure: StructureSignals,
    pub misconceptions: Vec<MisconceptionMatch>,
    pub quality_flags: Vec<QualityFlag>,
}

impl ComparisonResult {
    /// Number of distinct misconception patterns that fired.
    pub fn distinct_misconceptions(&self) -> usize {
        let mut ids: Vec<&str> = self
            .misconceptions
            .iter()
            .map(|m| m.pattern_id.as_str())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }
}

/// Final scores, each in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisScore {
    pub coverage: f64,
    pub correctness: f64,
    pub confidence: f64,
    pub flags: Vec<QualityFlag>,
}

/// Overall classification of an explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnderstandingLevel {
    High,
    Medium,
    Low,
    Misconception,
}

impl UnderstandingLevel {
    pub const ALL: [UnderstandingLevel; 4] = [
        UnderstandingLevel::High,
        UnderstandingLevel::Medium,
        UnderstandingLevel::Low,
        UnderstandingLevel::Misconception,
    ];
}

impl fmt::Display for UnderstandingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnderstandingLevel::High => write!(f, "high"),
            UnderstandingLevel::Medium => write!(f, "medium"),
            UnderstandingLevel::Low => write!(f, "low"),
            UnderstandingLevel::Misconception => write!(f, "misconception"),
        }
    }
}

impl FromStr for UnderstandingLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(UnderstandingLevel::High),
            "medium" => Ok(UnderstandingLevel::Medium),
            "low" => Ok(UnderstandingLevel::Low),
            "misconception" => Ok(UnderstandingLevel::Misconception),
            other => Err(format!(
                "unknown understanding level: '{other}' (expected high, medium, low, or misconception)"
            )),
        }
    }
}

/// Student-facing feedback text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub what_you_got_right: String,
    pub what_you_missed: String,
    pub where_confusion_is: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentSummary {
    pub word_count: usize,
    pub sentence_count: usize,
    pub key_terms: Vec<String>,
    pub complexity_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceSummary {
    pub source: ReferenceSourceKind,
    pub title: String,
    pub summary: String,
    pub url: Option<String>,
}

/// Successful outcome of `analyze`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub topic: String,
    pub subject: Option<String>,
    pub student: StudentSummary,
    pub reference: ReferenceSummary,
    pub matched_terms: Vec<String>,
    pub missing_terms: Vec<String>,
    pub extra_terms: Vec<String>,
    pub similarity: f64,
    pub similarity_method: SimilarityMethod,
    pub structural_quality: f64,
    pub score: AnalysisScore,
    pub level: UnderstandingLevel,
    pub misconceptions: Vec<MisconceptionMatch>,
    pub feedback: Feedback,
    pub quality_flags: Vec<QualityFlag>,
}

/// Reference overview of a topic, without any student text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicOverview {
    pub topic: String,
    pub title: String,
    pub source: ReferenceSourceKind,
    pub summary: String,
    pub url: Option<String>,
    pub key_concepts: Vec<String>,
    pub sections: Vec<String>,
    pub related_concepts: Vec<String>,
    pub related_titles: Vec<String>,
    pub difficulty: Option<u8>,
}

/// A hand-labelled explanation used by the offline evaluation harness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelledExample {
    pub id: String,
    pub topic: String,
    pub subject: Option<String>,
    pub explanation: String,
    pub expected_level: UnderstandingLevel,
    /// Expected coverage in [0, 1], when the labeller gave one.
    pub expected_coverage: Option<f64>,
    pub expected_correctness: Option<f64>,
    pub tags: Vec<String>,
}

/// A named collection of labelled examples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExampleSet {
    pub id: String,
    pub name: String,
    pub description: String,
    pub examples: Vec<LabelledExample>,
}
