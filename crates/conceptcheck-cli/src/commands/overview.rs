//! The `conceptcheck overview` command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use conceptcheck_sources::{build_engine, load_config_from};

pub async fn execute(
    topic: String,
    format: String,
    config_path: Option<PathBuf>,
    offline: bool,
) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let engine = build_engine(&config, offline)?;

    let overview = engine
        .resolve_overview(&topic)
        .await
        .with_context(|| format!("overview of '{topic}' failed"))?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&overview)?);
        return Ok(());
    }

    println!("{} ({})", overview.title, overview.source);
    if let Some(url) = &overview.url {
        println!("{url}");
    }
    if let Some(difficulty) = overview.difficulty {
        println!("Difficulty: {difficulty}/5");
    }
    println!("\n{}", overview.summary);
    if !overview.key_concepts.is_empty() {
        println!("\nKey concepts: {}", overview.key_concepts.join(", "));
    }
    if !overview.sections.is_empty() {
        println!("Sections: {}", overview.sections.join(", "));
    }
    if !overview.related_concepts.is_empty() {
        println!("Related: {}", overview.related_concepts.join(", "));
    }
    if !overview.related_titles.is_empty() {
        println!("See also: {}", overview.related_titles.join(", "));
    }
    Ok(())
}
