//! Coverage, correctness, and confidence scoring.
//!
//! All formulas are fixed per deployment through `ScoringWeights`; nothing is
//! learned at request time. Every score is clamped to [0, 1] and forced finite.

use serde::{Deserialize, Serialize};

use crate::model::{AnalysisScore, ComparisonResult, QualityFlag, UnderstandingLevel};

/// Words at which the "sufficient detail" quality indicator is earned.
pub const DETAILED_WORDS: usize = 50;

/// Static scoring parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Weight of similarity in correctness.
    pub semantic: f64,
    /// Weight of structural quality in correctness.
    pub structural: f64,
    /// Weight of the misconception penalty in correctness.
    pub misconception: f64,
    /// Each further misconception contributes `decay` times the previous one.
    pub misconception_decay: f64,
    /// Misconceptions beyond this count add nothing.
    pub misconception_cap: usize,
    pub confidence_base: f64,
    /// Bonus per quality indicator.
    pub quality_bonus: f64,
    /// Penalty per distinct hedging phrase.
    pub uncertainty_penalty: f64,
    /// Confidence discount when similarity was lexical.
    pub lexical_discount: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            semantic: 0.6,
            structural: 0.4,
            misconception: 0.25,
            misconception_decay: 0.5,
            misconception_cap: 3,
            confidence_base: 0.7,
            quality_bonus: 0.1,
            uncertainty_penalty: 0.15,
            lexical_discount: 0.05,
        }
    }
}

impl ScoringWeights {
    /// Saturating penalty for `n` distinct misconceptions: 1, 1.5, 1.75, then flat.
    pub fn misconception_penalty(&self, n: usize) -> f64 {
        (0..n.min(self.misconception_cap))
            .map(|i| self.misconception_decay.powi(i as i32))
            .sum()
    }
}

fn unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Turns a comparison into scores.
#[derive(Debug, Clone, Default)]
pub struct Scorer {
    weights: ScoringWeights,
}

impl Scorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn score(&self, comparison: &ComparisonResult) -> AnalysisScore {
        let w = &self.weights;
        let signals = &comparison.structure;
        let mut flags = Vec::new();

        if signals.word_count == 0 {
            return AnalysisScore {
                coverage: 0.0,
                correctness: 0.0,
                confidence: 0.0,
                flags: vec![QualityFlag::NoEvidence],
            };
        }

        let coverage = if comparison.vocabulary_size == 0 {
            flags.push(QualityFlag::EmptyVocabulary);
            0.0
        } else {
            comparison.matched.len() as f64 / comparison.vocabulary_size as f64
        };

        let penalty = w.misconception_penalty(comparison.distinct_misconceptions());
        let correctness = w.semantic * comparison.similarity
            + w.structural * comparison.structural_quality
            - w.misconception * penalty;

        let indicators = [
            signals.has_examples,
            signals.has_causal_reasoning,
            signals.word_count >= DETAILED_WORDS,
        ]
        .iter()
        .filter(|b| **b)
        .count();
        let lexical = comparison
            .quality_flags
            .contains(&QualityFlag::LexicalFallback);
        let confidence = w.confidence_base + w.quality_bonus * indicators as f64
            - w.uncertainty_penalty * signals.hedges.len() as f64
            - if lexical { w.lexical_discount } else { 0.0 };

        AnalysisScore {
            coverage: unit(coverage),
            correctness: unit(correctness),
            confidence: unit(confidence),
            flags,
        }
    }
}

/// Classify an explanation from its scores and detected misconceptions.
pub fn classify(score: &AnalysisScore, misconceptions: usize) -> UnderstandingLevel {
    if misconceptions > 0 {
        UnderstandingLevel::Misconception
    } else if score.coverage >= 0.7 && score.correctness >= 0.7 {
        UnderstandingLevel::High
    } else if score.coverage >= 0.4 && score.correctness >= 0.5 {
        UnderstandingLevel::Medium
    } else {
        UnderstandingLevel::Low
    }
}
