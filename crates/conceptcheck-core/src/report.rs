//! Evaluation report types with JSON persistence and regression detection.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FailureKind;
use crate::model::UnderstandingLevel;

/// A complete evaluation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub example_set: ExampleSetSummary,
    /// One entry per successfully analyzed example, in set order.
    pub outcomes: Vec<ExampleOutcome>,
    /// Examples the engine refused or failed to analyze.
    pub failures: Vec<ExampleFailure>,
    pub summary: EvaluationSummary,
    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExampleSetSummary {
    pub id: String,
    pub name: String,
    pub example_count: usize,
}

/// Engine output for one labelled example.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExampleOutcome {
    pub example_id: String,
    pub topic: String,
    pub expected_level: UnderstandingLevel,
    pub predicted_level: UnderstandingLevel,
    pub coverage: f64,
    pub correctness: f64,
    pub confidence: f64,
    /// `1 - |predicted - expected|` when the example carries an expected coverage.
    pub coverage_accuracy: Option<f64>,
    pub correctness_accuracy: Option<f64>,
}

impl ExampleOutcome {
    pub fn is_correct(&self) -> bool {
        self.expected_level == self.predicted_level
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExampleFailure {
    pub example_id: String,
    pub topic: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Expected level → predicted level → count.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub counts: BTreeMap<UnderstandingLevel, BTreeMap<UnderstandingLevel, usize>>,
}

impl ConfusionMatrix {
    pub fn record(&mut self, expected: UnderstandingLevel, predicted: UnderstandingLevel) {
        *self
            .counts
            .entry(expected)
            .or_default()
            .entry(predicted)
            .or_insert(0) += 1;
    }

    pub fn get(&self, expected: UnderstandingLevel, predicted: UnderstandingLevel) -> usize {
        self.counts
            .get(&expected)
            .and_then(|row| row.get(&predicted))
            .copied()
            .unwrap_or(0)
    }

    fn expected_total(&self, level: UnderstandingLevel) -> usize {
        self.counts.get(&level).map_or(0, |row| row.values().sum())
    }

    fn predicted_total(&self, level: UnderstandingLevel) -> usize {
        self.counts.values().filter_map(|row| row.get(&level)).sum()
    }
}

/// Precision/recall for one understanding level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelStats {
    pub support: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicStats {
    pub examples: usize,
    pub accuracy: f64,
    pub mean_coverage: f64,
    pub mean_correctness: f64,
}

/// Aggregate statistics across an example set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub total: usize,
    pub evaluated: usize,
    pub failed: usize,
    /// Share of evaluated examples classified at their expected level.
    pub accuracy: f64,
    pub mean_coverage_accuracy: Option<f64>,
    pub mean_correctness_accuracy: Option<f64>,
    pub mean_confidence: f64,
    pub confusion: ConfusionMatrix,
    pub per_level: BTreeMap<UnderstandingLevel, LevelStats>,
    pub per_topic: BTreeMap<String, TopicStats>,
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Aggregate outcomes and failures into a summary.
pub fn summarize(outcomes: &[ExampleOutcome], failures: &[ExampleFailure]) -> EvaluationSummary {
    let mut confusion = ConfusionMatrix::default();
    for o in outcomes {
        confusion.record(o.expected_level, o.predicted_level);
    }
    let correct = outcomes.iter().filter(|o| o.is_correct()).count();

    let per_level = UnderstandingLevel::ALL
        .iter()
        .filter_map(|&level| {
            let support = confusion.expected_total(level);
            let predicted = confusion.predicted_total(level);
            if support == 0 && predicted == 0 {
                return None;
            }
            let tp = confusion.get(level, level);
            let precision = ratio(tp, predicted);
            let recall = ratio(tp, support);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            Some((
                level,
                LevelStats {
                    support,
                    precision,
                    recall,
                    f1,
                },
            ))
        })
        .collect();

    let mut by_topic: BTreeMap<String, Vec<&ExampleOutcome>> = BTreeMap::new();
    for o in outcomes {
        by_topic.entry(o.topic.clone()).or_default().push(o);
    }
    let per_topic = by_topic
        .into_iter()
        .map(|(topic, group)| {
            let n = group.len();
            let stats = TopicStats {
                examples: n,
                accuracy: ratio(group.iter().filter(|o| o.is_correct()).count(), n),
                mean_coverage: mean(group.iter().map(|o| o.coverage)).unwrap_or(0.0),
                mean_correctness: mean(group.iter().map(|o| o.correctness)).unwrap_or(0.0),
            };
            (topic, stats)
        })
        .collect();

    EvaluationSummary {
        total: outcomes.len() + failures.len(),
        evaluated: outcomes.len(),
        failed: failures.len(),
        accuracy: ratio(correct, outcomes.len()),
        mean_coverage_accuracy: mean(outcomes.iter().filter_map(|o| o.coverage_accuracy)),
        mean_correctness_accuracy: mean(outcomes.iter().filter_map(|o| o.correctness_accuracy)),
        mean_confidence: mean(outcomes.iter().map(|o| o.confidence)).unwrap_or(0.0),
        confusion,
        per_level,
        per_topic,
    }
}

impl EvaluationReport {
    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report from {}", path.display()))?;
        let report: EvaluationReport =
            serde_json::from_str(&content).context("failed to parse report JSON")?;
        Ok(report)
    }

    /// Compare per-topic accuracy against a baseline.
    pub fn compare(&self, baseline: &EvaluationReport, threshold: f64) -> RegressionReport {
        let baseline_topics = &baseline.summary.per_topic;
        let current_topics = &self.summary.per_topic;

        let mut regressions = Vec::new();
        let mut improvements = Vec::new();
        let mut unchanged = 0usize;
        let mut new_topics = 0usize;

        for (topic, current) in current_topics {
            let Some(base) = baseline_topics.get(topic) else {
                new_topics += 1;
                continue;
            };
            let delta = current.accuracy - base.accuracy;
            let change = TopicChange {
                topic: topic.clone(),
                baseline_accuracy: base.accuracy,
                current_accuracy: current.accuracy,
                delta,
            };
            if delta < -threshold {
                regressions.push(change);
            } else if delta > threshold {
                improvements.push(change);
            } else {
                unchanged += 1;
            }
        }

        let removed_topics = baseline_topics
            .keys()
            .filter(|k| !current_topics.contains_key(*k))
            .count();

        RegressionReport {
            baseline_accuracy: baseline.summary.accuracy,
            current_accuracy: self.summary.accuracy,
            regressions,
            improvements,
            unchanged,
            new_topics,
            removed_topics,
        }
    }
}

/// Result of comparing two reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionReport {
    pub baseline_accuracy: f64,
    pub current_accuracy: f64,
    /// Topics whose accuracy dropped by more than the threshold.
    pub regressions: Vec<TopicChange>,
    pub improvements: Vec<TopicChange>,
    pub unchanged: usize,
    /// Topics in current but not baseline.
    pub new_topics: usize,
    /// Topics in baseline but not current.
    pub removed_topics: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicChange {
    pub topic: String,
    pub baseline_accuracy: f64,
    pub current_accuracy: f64,
    pub delta: f64,
}

impl RegressionReport {
    /// Format the regression report as markdown.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str(&format!(
            "**Summary:** accuracy {:.1}% -> {:.1}%, {} regressions, {} improvements, {} unchanged\n\n",
            self.baseline_accuracy * 100.0,
            self.current_accuracy * 100.0,
            self.regressions.len(),
            self.improvements.len(),
            self.unchanged
        ));

        for (heading, changes, sign) in [
            ("Regressions", &self.regressions, ""),
            ("Improvements", &self.improvements, "+"),
        ] {
            if changes.is_empty() {
                continue;
            }
            md.push_str(&format!("### {heading}\n\n"));
            md.push_str("| Topic | Baseline | Current | Delta |\n");
            md.push_str("|-------|----------|---------|-------|\n");
            for c in changes {
                md.push_str(&format!(
                    "| {} | {:.1}% | {:.1}% | {sign}{:.1}% |\n",
                    c.topic,
                    c.baseline_accuracy * 100.0,
                    c.current_accuracy * 100.0,
                    c.delta * 100.0
                ));
            }
            md.push('\n');
        }

        md
    }

    pub fn has_regressions(&self) -> bool {
        !self.regressions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use UnderstandingLevel::*;

    fn outcome(id: &str, topic: &str, expected: UnderstandingLevel, predicted: UnderstandingLevel) -> ExampleOutcome {
        ExampleOutcome {
            example_id: id.into(),
            topic: topic.into(),
            expected_level: expected,
            predicted_level: predicted,
            coverage: 0.5,
            correctness: 0.6,
            confidence: 0.7,
            coverage_accuracy: Some(0.9),
            correctness_accuracy: None,
        }
    }

    fn make_report(outcomes: Vec<ExampleOutcome>) -> EvaluationReport {
        let summary = summarize(&outcomes, &[]);
        EvaluationReport {
            id: Uuid::nil(),
            created_at: Utc::now(),
            example_set: ExampleSetSummary {
                id: "test".into(),
                name: "Test".into(),
                example_count: outcomes.len(),
            },
            outcomes,
            failures: vec![],
            summary,
            duration_ms: 0,
        }
    }

    #[test]
    fn summary_statistics() {
        let outcomes = vec![
            outcome("a", "BST", High, High),
            outcome("b", "BST", Medium, High),
            outcome("c", "Deadlock", Misconception, Misconception),
            outcome("d", "Deadlock", Low, Medium),
        ];
        let failures = vec![ExampleFailure {
            example_id: "e".into(),
            topic: "Monads".into(),
            kind: FailureKind::Resolution,
            message: "no reference".into(),
        }];
        let summary = summarize(&outcomes, &failures);

        assert_eq!((summary.total, summary.evaluated, summary.failed), (5, 4, 1));
        assert!((summary.accuracy - 0.5).abs() < 1e-9);
        assert_eq!(summary.confusion.get(Medium, High), 1);
        assert_eq!(summary.mean_coverage_accuracy, Some(0.9));
        assert_eq!(summary.mean_correctness_accuracy, None);

        let high = &summary.per_level[&High];
        assert_eq!(high.support, 1);
        assert!((high.precision - 0.5).abs() < 1e-9);
        assert!((high.recall - 1.0).abs() < 1e-9);
        assert!((summary.per_topic["Deadlock"].accuracy - 0.5).abs() < 1e-9);
    }

    #[test]
    fn empty_summary_is_zero() {
        let summary = summarize(&[], &[]);
        assert_eq!(summary.accuracy, 0.0);
        assert!(summary.per_level.is_empty());
    }

    #[test]
    fn compare_identical_reports() {
        let baseline = make_report(vec![outcome("a", "BST", High, High)]);
        let current = make_report(vec![outcome("a", "BST", High, High)]);
        let report = current.compare(&baseline, 0.05);
        assert!(!report.has_regressions());
        assert!(report.improvements.is_empty());
        assert_eq!(report.unchanged, 1);
    }

    #[test]
    fn compare_with_regression_and_topic_churn() {
        let baseline = make_report(vec![
            outcome("a", "BST", High, High),
            outcome("b", "Heap", Low, Low),
        ]);
        let current = make_report(vec![
            outcome("a", "BST", High, Low),
            outcome("c", "Trie", Low, Low),
        ]);
        let report = current.compare(&baseline, 0.05);
        assert_eq!(report.regressions.len(), 1);
        assert_eq!(report.regressions[0].topic, "BST");
        assert_eq!(report.new_topics, 1);
        assert_eq!(report.removed_topics, 1);

        let md = report.to_markdown();
        assert!(md.contains("### Regressions"));
        assert!(md.contains("| BST |"));
    }

    #[test]
    fn json_roundtrip() {
        let report = make_report(vec![outcome("a", "BST", Medium, High)]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/report.json");

        report.save_json(&path).unwrap();
        let loaded = EvaluationReport::load_json(&path).unwrap();

        assert_eq!(loaded.example_set.id, "test");
        assert_eq!(loaded.summary.confusion.get(Medium, High), 1);
        assert_eq!(loaded.outcomes.len(), 1);
    }
}
