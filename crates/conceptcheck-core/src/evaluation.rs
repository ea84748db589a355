//! Offline evaluation: run labelled examples through `analyze` in parallel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::engine::ConceptEngine;
use crate::error::AnalysisError;
use crate::model::{AnalysisResult, ExampleSet, LabelledExample};
use crate::report::{summarize, EvaluationReport, ExampleFailure, ExampleOutcome, ExampleSetSummary};

#[derive(Debug, Clone)]
pub struct EvaluationConfig {
    /// Maximum concurrent analyses.
    pub parallelism: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self { parallelism: 4 }
    }
}

/// Progress reporting trait.
pub trait ProgressReporter: Send + Sync {
    fn on_example_complete(&self, outcome: &ExampleOutcome);
    fn on_example_error(&self, example_id: &str, error: &AnalysisError);
    fn on_set_complete(&self, total: usize, completed: usize, failed: usize, elapsed: Duration);
}

/// No-op progress reporter.
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_example_complete(&self, _: &ExampleOutcome) {}
    fn on_example_error(&self, _: &str, _: &AnalysisError) {}
    fn on_set_complete(&self, _: usize, _: usize, _: usize, _: Duration) {}
}

fn closeness(predicted: f64, expected: Option<f64>) -> Option<f64> {
    expected.map(|e| (1.0 - (predicted - e).abs()).clamp(0.0, 1.0))
}

fn outcome(example: &LabelledExample, result: &AnalysisResult) -> ExampleOutcome {
    ExampleOutcome {
        example_id: example.id.clone(),
        topic: example.topic.clone(),
        expected_level: example.expected_level,
        predicted_level: result.level,
        coverage: result.score.coverage,
        correctness: result.score.correctness,
        confidence: result.score.confidence,
        coverage_accuracy: closeness(result.score.coverage, example.expected_coverage),
        correctness_accuracy: closeness(result.score.correctness, example.expected_correctness),
    }
}

/// Analyze every example of `set` and aggregate the results.
///
/// Outcomes and failures keep the order of the example set regardless of
/// completion order.
pub async fn run_evaluation(
    engine: &ConceptEngine,
    set: &ExampleSet,
    config: &EvaluationConfig,
    progress: &dyn ProgressReporter,
) -> EvaluationReport {
    let start = Instant::now();
    let semaphore = Arc::new(Semaphore::new(config.parallelism.max(1)));

    let mut futures = FuturesUnordered::new();
    for (index, example) in set.examples.iter().enumerate() {
        let engine = engine.clone();
        let semaphore = Arc::clone(&semaphore);
        let example = example.clone();
        futures.push(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => {
                    engine
                        .analyze(&example.explanation, &example.topic, example.subject.as_deref())
                        .await
                }
                Err(_) => Err(AnalysisError::internal("evaluation semaphore closed")),
            };
            (index, example, result)
        });
    }

    let total = futures.len();
    let mut outcomes = Vec::new();
    let mut failures = Vec::new();
    while let Some((index, example, result)) = futures.next().await {
        match result {
            Ok(analysis) => {
                let o = outcome(&example, &analysis);
                progress.on_example_complete(&o);
                outcomes.push((index, o));
            }
            Err(e) => {
                tracing::warn!(example = %example.id, error = %e, "example failed");
                progress.on_example_error(&example.id, &e);
                failures.push((
                    index,
                    ExampleFailure {
                        example_id: example.id.clone(),
                        topic: example.topic.clone(),
                        kind: e.kind(),
                        message: e.to_string(),
                    },
                ));
            }
        }
    }
    outcomes.sort_by_key(|(i, _)| *i);
    failures.sort_by_key(|(i, _)| *i);
    let outcomes: Vec<ExampleOutcome> = outcomes.into_iter().map(|(_, o)| o).collect();
    let failures: Vec<ExampleFailure> = failures.into_iter().map(|(_, f)| f).collect();

    let elapsed = start.elapsed();
    progress.on_set_complete(total, outcomes.len(), failures.len(), elapsed);
    tracing::info!(
        set = %set.id,
        evaluated = outcomes.len(),
        failed = failures.len(),
        "evaluation complete"
    );

    let summary = summarize(&outcomes, &failures);
    EvaluationReport {
        id: Uuid::new_v4(),
        created_at: chrono::Utc::now(),
        example_set: ExampleSetSummary {
            id: set.id.clone(),
            name: set.name.clone(),
            example_count: set.examples.len(),
        },
        outcomes,
        failures,
        summary,
        duration_ms: elapsed.as_millis() as u64,
    }
}
