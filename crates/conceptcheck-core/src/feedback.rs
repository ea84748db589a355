//! Deterministic feedback text.
//!
//! Templates are picked by score band and filled with the concrete term and
//! misconception lists, so two explanations in the same band still get
//! different text when they missed different things.

use serde::{Deserialize, Serialize};

use crate::model::{AnalysisScore, ComparisonResult, ConceptEntry, Feedback, ReferenceContent, ReferenceSourceKind};

pub const MAX_SUGGESTIONS: usize = 5;

const SHOWN_MATCHED: usize = 5;
const SHOWN_MISSING: usize = 5;
const SHOWN_EXTRA: usize = 3;

const INTERESTING_SECTIONS: &[&str] = &["example", "application", "implementation", "algorithm", "use"];

/// Coarse score band used for template selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    High,
    Medium,
    Low,
}

impl Band {
    pub fn of(value: f64) -> Self {
        if value >= 0.7 {
            Band::High
        } else if value >= 0.4 {
            Band::Medium
        } else {
            Band::Low
        }
    }
}

/// What the composer knows about the request besides the scores.
#[derive(Debug, Clone, Copy)]
pub struct FeedbackContext<'a> {
    pub topic: &'a str,
    pub subject: Option<&'a str>,
    pub concept: Option<&'a ConceptEntry>,
    pub reference: &'a ReferenceContent,
}

fn list(items: &[String], limit: usize) -> String {
    let shown: Vec<&str> = items.iter().take(limit).map(String::as_str).collect();
    match shown.as_slice() {
        [] => String::new(),
        [one] => format!("\"{one}\""),
        [init @ .., last] => format!(
            "{} and \"{last}\"",
            init.iter()
                .map(|s| format!("\"{s}\""))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeedbackComposer;

impl FeedbackComposer {
    pub fn new() -> Self {
        Self
    }

    pub fn compose(
        &self,
        comparison: &ComparisonResult,
        score: &AnalysisScore,
        ctx: &FeedbackContext<'_>,
    ) -> Feedback {
        Feedback {
            what_you_got_right: self.got_right(comparison, score, ctx),
            what_you_missed: self.missed(comparison, score, ctx),
            where_confusion_is: self.confusion(comparison, score, ctx),
            suggestions: self.suggestions(comparison, ctx),
        }
    }

    fn got_right(&self, c: &ComparisonResult, score: &AnalysisScore, ctx: &FeedbackContext<'_>) -> String {
        let topic = ctx.topic;
        let mut text = if c.matched.is_empty() {
            format!("Your explanation does not yet use the key ideas of {topic}.")
        } else {
            let terms = list(&c.matched, SHOWN_MATCHED);
            match Band::of(score.coverage) {
                Band::High => format!("Strong coverage of {topic}: you correctly discussed {terms}."),
                Band::Medium => {
                    format!("You covered several important ideas of {topic}, including {terms}.")
                }
                Band::Low => format!("You touched on {terms}, which is a good start."),
            }
        };
        text.push(' ');
        text.push_str(match Band::of(score.correctness) {
            Band::High => "Overall the explanation closely matches the reference material.",
            Band::Medium => "Parts of the explanation match the reference, but it could be more precise.",
            Band::Low => "The explanation differs noticeably from the reference material.",
        });
        if c.structure.has_definition && c.structure.has_examples {
            text.push_str(" Opening with a definition and backing it with an example works well.");
        } else if c.structure.has_causal_reasoning {
            text.push_str(" You explained why, not just what.");
        }
        text
    }

    fn missed(&self, c: &ComparisonResult, score: &AnalysisScore, ctx: &FeedbackContext<'_>) -> String {
        let mut text = if c.vocabulary_size == 0 {
            format!("No reference vocabulary was available for {}, so coverage could not be measured.", ctx.topic)
        } else if c.missing.is_empty() {
            format!("You did not miss any of the key terms for {}.", ctx.topic)
        } else {
            let terms = list(&c.missing, SHOWN_MISSING);
            match Band::of(score.coverage) {
                Band::High => format!("To make it complete, also mention {terms}."),
                Band::Medium => format!("Consider discussing {terms}."),
                Band::Low => format!("Several core ideas are missing, most importantly {terms}."),
            }
        };
        if !c.extra.is_empty() {
            text.push_str(&format!(
                " You also mentioned {}, which the reference does not emphasize.",
                list(&c.extra, SHOWN_EXTRA)
            ));
        }
        text
    }

    fn confusion(&self, c: &ComparisonResult, score: &AnalysisScore, ctx: &FeedbackContext<'_>) -> String {
        if !c.misconceptions.is_empty() {
            let mut seen: Vec<&str> = Vec::new();
            let mut parts = Vec::new();
            for m in &c.misconceptions {
                if seen.contains(&m.pattern_id.as_str()) {
                    continue;
                }
                seen.push(&m.pattern_id);
                parts.push(format!("You wrote \"{}\": {}", m.snippet, m.correction));
            }
            return parts.join(" ");
        }

        let mut gaps = Vec::new();
        if !c.structure.has_definition {
            gaps.push(format!("The explanation never states what {} is.", ctx.topic));
        }
        if !c.structure.hedges.is_empty() {
            gaps.push(format!(
                "Phrases like {} suggest you are unsure; state the idea directly once you have checked it.",
                list(&c.structure.hedges, 2)
            ));
        }
        if Band::of(score.correctness) == Band::Low {
            gaps.push("Your wording does not line up closely with the reference; compare it against the definition.".to_string());
        }
        if gaps.is_empty() {
            "No misconceptions detected.".to_string()
        } else {
            gaps.join(" ")
        }
    }

    fn suggestions(&self, c: &ComparisonResult, ctx: &FeedbackContext<'_>) -> Vec<String> {
        let topic = ctx.topic;
        let mut out: Vec<String> = Vec::new();

        if let Some(m) = c.misconceptions.first() {
            out.push(format!("Double-check the claim \"{}\" against the reference.", m.snippet));
        }
        if let Some(first_missing) = c.missing.first() {
            out.push(format!(
                "Review \"{first_missing}\" as it is fundamental to understanding {topic}."
            ));
        }
        if !c.structure.has_definition {
            out.push(format!(
                "Start by clearly defining what {topic} means and its key characteristics."
            ));
        }
        if !c.structure.has_examples {
            out.push(format!(
                "Practice with concrete examples of {topic} to solidify your understanding."
            ));
        }
        if !c.structure.has_process {
            out.push(format!("Study the step-by-step process of how {topic} works."));
        }
        out.push(match c.similarity {
            s if s < 0.3 => format!("Study the basic definition of {topic} first."),
            s if s < 0.6 => format!("Expand on how {topic} works and why it matters."),
            _ => format!("Explore advanced applications of {topic}."),
        });
        if let Some(prereq) = ctx.concept.and_then(|e| e.prerequisites.first()) {
            out.push(format!("Make sure you are comfortable with {prereq} before going deeper."));
        }

        let subject = ctx
            .subject
            .or(ctx.concept.map(|e| e.subject.as_str()))
            .map(|s| s.replace('_', " ").to_lowercase());
        if let Some(subject) = subject {
            match subject.as_str() {
                "algorithms" => out.push(
                    "Practice implementing the algorithm and analyzing its time complexity.".into(),
                ),
                "data structures" => out.push(
                    "Draw diagrams and trace through operations to visualize the structure.".into(),
                ),
                "operating systems" => {
                    out.push("Study real-world examples and system implementations.".into())
                }
                _ => {}
            }
            out.push(format!("Connect {topic} to other {subject} concepts you know."));
        }

        let reference = ctx.reference;
        if let ReferenceSourceKind::External { .. } = reference.source {
            match &reference.url {
                Some(url) => out.push(format!("Read the full article \"{}\" ({url}).", reference.title)),
                None => out.push(format!("Read the full article \"{}\".", reference.title)),
            }
            if let Some(section) = reference.sections.iter().find(|s| {
                let lower = s.to_lowercase();
                INTERESTING_SECTIONS.iter().any(|k| lower.contains(k))
            }) {
                out.push(format!("Look at the \"{section}\" section of the reference."));
            }
        }
        if !reference.related_titles.is_empty() {
            out.push(format!(
                "Explore related topics: {}.",
                reference
                    .related_titles
                    .iter()
                    .take(3)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }

        let mut deduped: Vec<String> = Vec::new();
        for s in out {
            if !deduped.contains(&s) {
                deduped.push(s);
            }
        }
        deduped.truncate(MAX_SUGGESTIONS);
        deduped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MisconceptionMatch, SimilarityMethod, Span, StructureSignals};
    use chrono::{TimeZone, Utc};

    fn reference() -> ReferenceContent {
        ReferenceContent {
            source: ReferenceSourceKind::External {
                provider: "wikipedia".into(),
            },
            title: "Binary search tree".into(),
            text: String::new(),
            summary: String::new(),
            retrieved_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            url: Some("https://en.wikipedia.org/wiki/Binary_search_tree".into()),
            sections: vec!["History".into(), "Applications".into()],
            related_titles: vec!["AVL tree".into(), "Red-black tree".into()],
            concept_id: None,
        }
    }

    fn comparison(matched: &[&str], missing: &[&str]) -> ComparisonResult {
        ComparisonResult {
            matched: matched.iter().map(|s| s.to_string()).collect(),
            missing: missing.iter().map(|s| s.to_string()).collect(),
            extra: vec![],
            vocabulary_size: matched.len() + missing.len(),
            similarity: 0.5,
            similarity_method: SimilarityMethod::Lexical,
            structural_quality: 0.5,
            structure: StructureSignals {
                word_count: 20,
                sentence_count: 1,
                has_definition: true,
                ..Default::default()
            },
            misconceptions: vec![],
            quality_flags: vec![],
        }
    }

    fn score(coverage: f64, correctness: f64) -> AnalysisScore {
        AnalysisScore {
            coverage,
            correctness,
            confidence: 0.7,
            flags: vec![],
        }
    }

    fn ctx(reference: &ReferenceContent) -> FeedbackContext<'_> {
        FeedbackContext {
            topic: "Binary Search Tree",
            subject: None,
            concept: None,
            reference,
        }
    }

    #[test]
    fn band_boundaries() {
        assert_eq!(Band::of(0.7), Band::High);
        assert_eq!(Band::of(0.69), Band::Medium);
        assert_eq!(Band::of(0.4), Band::Medium);
        assert_eq!(Band::of(0.39), Band::Low);
    }

    #[test]
    fn same_band_different_terms_different_text() {
        let r = reference();
        let composer = FeedbackComposer::new();
        let a = composer.compose(&comparison(&["tree"], &["node", "root"]), &score(0.5, 0.5), &ctx(&r));
        let b = composer.compose(&comparison(&["tree"], &["hierarchy", "leaf"]), &score(0.5, 0.5), &ctx(&r));
        assert_ne!(a.what_you_missed, b.what_you_missed);
        assert!(a.what_you_missed.contains("\"node\" and \"root\""));
    }

    #[test]
    fn compose_is_deterministic() {
        let r = reference();
        let composer = FeedbackComposer::new();
        let c = comparison(&["tree", "node"], &["root"]);
        let first = composer.compose(&c, &score(0.66, 0.8), &ctx(&r));
        let second = composer.compose(&c, &score(0.66, 0.8), &ctx(&r));
        assert_eq!(first.what_you_got_right, second.what_you_got_right);
        assert_eq!(first.suggestions, second.suggestions);
    }

    #[test]
    fn misconceptions_drive_confusion_text() {
        let r = reference();
        let mut c = comparison(&["tree"], &[]);
        c.misconceptions = vec![MisconceptionMatch {
            pattern_id: "always-balanced".into(),
            description: String::new(),
            span: Span { start: 0, end: 15 },
            snippet: "always balanced".into(),
            correction: "Plain trees do not rebalance.".into(),
        }];
        let fb = FeedbackComposer::new().compose(&c, &score(1.0, 0.3), &ctx(&r));
        assert_eq!(
            fb.where_confusion_is,
            "You wrote \"always balanced\": Plain trees do not rebalance."
        );
        assert!(fb.suggestions[0].contains("always balanced"));
    }

    #[test]
    fn suggestions_are_capped_and_use_reference() {
        let r = reference();
        let mut c = comparison(&[], &["node"]);
        c.structure.has_definition = false;
        c.similarity = 0.9;
        let fb = FeedbackComposer::new().compose(&c, &score(0.0, 0.2), &ctx(&r));
        assert!(fb.suggestions.len() <= MAX_SUGGESTIONS);
        assert!(fb.suggestions.iter().any(|s| s.contains("Explore advanced applications")));
        assert!(fb.where_confusion_is.contains("never states what Binary Search Tree is"));

        let mut complete = comparison(&["tree"], &[]);
        complete.structure.has_examples = true;
        complete.structure.has_process = true;
        let fb = FeedbackComposer::new().compose(&complete, &score(1.0, 0.9), &ctx(&r));
        assert!(fb.suggestions.iter().any(|s| s.contains("en.wikipedia.org")));
        assert!(fb.suggestions.iter().any(|s| s.contains("\"Applications\" section")));
        assert!(fb.suggestions.iter().any(|s| s.contains("AVL tree, Red-black tree")));
        assert_eq!(fb.where_confusion_is, "No misconceptions detected.");
    }

    #[test]
    fn list_formatting() {
        let items: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(list(&items, 5), "\"a\", \"b\" and \"c\"");
        assert_eq!(list(&items, 1), "\"a\"");
        assert_eq!(list(&[], 3), "");
    }
}
