//! The `conceptcheck analyze` command.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use comfy_table::{Cell, Table};

use conceptcheck_core::model::AnalysisResult;
use conceptcheck_sources::{build_engine, load_config_from};

fn read_explanation(text: Option<String>, file: Option<PathBuf>) -> Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }
    match file {
        Some(path) if path.as_os_str() == "-" => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read explanation from stdin")?;
            Ok(buf)
        }
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read explanation: {}", path.display())),
        None => anyhow::bail!("either --text or --file is required"),
    }
}

pub async fn execute(
    topic: String,
    subject: Option<String>,
    text: Option<String>,
    file: Option<PathBuf>,
    format: String,
    config_path: Option<PathBuf>,
    offline: bool,
) -> Result<()> {
    let explanation = read_explanation(text, file)?;
    let config = load_config_from(config_path.as_deref())?;
    let engine = build_engine(&config, offline)?;

    let result = engine
        .analyze(&explanation, &topic, subject.as_deref())
        .await
        .with_context(|| format!("analysis of '{topic}' failed"))?;

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text(&result),
    }
    Ok(())
}

fn percent(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

fn print_text(result: &AnalysisResult) {
    println!("Topic: {}", result.topic);
    if let Some(subject) = &result.subject {
        println!("Subject: {subject}");
    }
    println!(
        "Reference: {} ({})",
        result.reference.title, result.reference.source
    );
    println!("Level: {}", result.level);

    let mut table = Table::new();
    table.set_header(vec!["Coverage", "Correctness", "Confidence", "Similarity"]);
    table.add_row(vec![
        Cell::new(percent(result.score.coverage)),
        Cell::new(percent(result.score.correctness)),
        Cell::new(percent(result.score.confidence)),
        Cell::new(format!(
            "{} ({})",
            percent(result.similarity),
            result.similarity_method
        )),
    ]);
    println!("{table}");

    if !result.matched_terms.is_empty() {
        println!("Matched: {}", result.matched_terms.join(", "));
    }
    if !result.missing_terms.is_empty() {
        println!("Missing: {}", result.missing_terms.join(", "));
    }
    for m in &result.misconceptions {
        println!("Misconception: {} (\"{}\")", m.description, m.snippet);
    }

    println!("\nWhat you got right: {}", result.feedback.what_you_got_right);
    println!("What you missed: {}", result.feedback.what_you_missed);
    println!("Where confusion is: {}", result.feedback.where_confusion_is);
    if !result.feedback.suggestions.is_empty() {
        println!("Suggestions:");
        for s in &result.feedback.suggestions {
            println!("  - {s}");
        }
    }
    if !result.quality_flags.is_empty() {
        let flags: Vec<String> = result
            .quality_flags
            .iter()
            .map(|f| format!("{f:?}"))
            .collect();
        println!("\nFlags: {}", flags.join(", "));
    }
}
