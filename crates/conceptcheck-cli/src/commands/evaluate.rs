//! The `conceptcheck evaluate` command.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use conceptcheck_core::error::AnalysisError;
use conceptcheck_core::evaluation::{run_evaluation, EvaluationConfig, ProgressReporter};
use conceptcheck_core::parser;
use conceptcheck_core::report::{EvaluationReport, ExampleOutcome};
use conceptcheck_sources::{build_engine, load_config_from};

/// Console progress reporter.
struct ConsoleReporter;

impl ProgressReporter for ConsoleReporter {
    fn on_example_complete(&self, outcome: &ExampleOutcome) {
        let mark = if outcome.is_correct() { "OK" } else { "MISS" };
        eprintln!(
            "  Done: {} [{}] expected {} got {} (coverage {:.2}, correctness {:.2})",
            outcome.example_id,
            mark,
            outcome.expected_level,
            outcome.predicted_level,
            outcome.coverage,
            outcome.correctness,
        );
    }

    fn on_example_error(&self, example_id: &str, error: &AnalysisError) {
        eprintln!("  ERROR: {example_id} ({}): {error}", error.kind());
    }

    fn on_set_complete(&self, total: usize, completed: usize, failed: usize, elapsed: Duration) {
        eprintln!(
            "\nComplete: {completed}/{total} analyzed, {failed} failed ({:.1}s)",
            elapsed.as_secs_f64()
        );
    }
}

pub async fn execute(
    examples_path: PathBuf,
    parallelism: Option<usize>,
    output: Option<PathBuf>,
    config_path: Option<PathBuf>,
    offline: bool,
) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let parallelism = parallelism.unwrap_or(config.evaluation.parallelism);
    anyhow::ensure!(parallelism >= 1, "parallelism must be at least 1");
    let output = output.unwrap_or_else(|| config.evaluation.output_dir.clone());

    let sets = parser::load_examples(&examples_path)?;
    anyhow::ensure!(
        !sets.is_empty(),
        "no example sets found at {}",
        examples_path.display()
    );

    let engine = build_engine(&config, offline)?;
    let eval_config = EvaluationConfig { parallelism };
    let reporter = ConsoleReporter;

    for set in &sets {
        eprintln!(
            "conceptcheck v{}: evaluating {} examples from '{}'",
            env!("CARGO_PKG_VERSION"),
            set.examples.len(),
            set.name
        );
        eprintln!();

        let report = run_evaluation(&engine, set, &eval_config, &reporter).await;
        print_summary(&report);

        std::fs::create_dir_all(&output)?;
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H%M%S");
        let path = output.join(format!("report-{}-{timestamp}.json", set.id));
        report.save_json(&path)?;
        eprintln!("Results saved to: {}", path.display());
    }

    Ok(())
}

fn print_summary(report: &EvaluationReport) {
    use comfy_table::{Cell, Table};

    let summary = &report.summary;
    let mut table = Table::new();
    table.set_header(vec!["Topic", "Examples", "Accuracy", "Coverage", "Correctness"]);
    for (topic, stats) in &summary.per_topic {
        table.add_row(vec![
            Cell::new(topic),
            Cell::new(stats.examples),
            Cell::new(format!("{:.1}%", stats.accuracy * 100.0)),
            Cell::new(format!("{:.2}", stats.mean_coverage)),
            Cell::new(format!("{:.2}", stats.mean_correctness)),
        ]);
    }
    eprintln!("\n{table}");

    eprintln!(
        "Accuracy: {:.1}% ({} evaluated, {} failed), mean confidence {:.2}",
        summary.accuracy * 100.0,
        summary.evaluated,
        summary.failed,
        summary.mean_confidence
    );
    if let Some(acc) = summary.mean_coverage_accuracy {
        eprintln!("Coverage accuracy: {:.1}%", acc * 100.0);
    }
    if let Some(acc) = summary.mean_correctness_accuracy {
        eprintln!("Correctness accuracy: {:.1}%", acc * 100.0);
    }
}
