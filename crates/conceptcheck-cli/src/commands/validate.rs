//! The `conceptcheck validate` command.

use std::path::PathBuf;

use anyhow::Result;

use conceptcheck_core::knowledge::KnowledgeStore;
use conceptcheck_core::parser;

pub fn execute(knowledge_path: Option<PathBuf>, examples_path: Option<PathBuf>) -> Result<()> {
    let knowledge = KnowledgeStore::load(knowledge_path.as_deref())?;
    println!("Knowledge base: {} concepts", knowledge.len());

    let mut total_warnings = 0;

    for entry in knowledge.iter() {
        if entry.misconceptions.is_empty() {
            println!("  [{}] WARNING: no misconception patterns", entry.id);
            total_warnings += 1;
        }
    }

    if let Some(path) = examples_path {
        for set in &parser::load_examples(&path)? {
            println!("Example set: {} ({} examples)", set.name, set.examples.len());

            let warnings = parser::validate_example_set(set, &knowledge);
            for w in &warnings {
                let prefix = w
                    .example_id
                    .as_ref()
                    .map(|id| format!("  [{id}]"))
                    .unwrap_or_else(|| "  ".to_string());
                println!("{prefix} WARNING: {}", w.message);
            }
            total_warnings += warnings.len();
        }
    }

    if total_warnings == 0 {
        println!("All valid.");
    } else {
        println!("\n{total_warnings} warning(s) found.");
    }

    Ok(())
}
