//! The `conceptcheck init` command.

use anyhow::Result;

pub fn execute() -> Result<()> {
    if std::path::Path::new("conceptcheck.toml").exists() {
        println!("conceptcheck.toml already exists, skipping.");
    } else {
        std::fs::write("conceptcheck.toml", SAMPLE_CONFIG)?;
        println!("Created conceptcheck.toml");
    }

    std::fs::create_dir_all("eval-sets")?;
    let example_path = std::path::Path::new("eval-sets/example.toml");
    if example_path.exists() {
        println!("eval-sets/example.toml already exists, skipping.");
    } else {
        std::fs::write(example_path, EXAMPLE_SET)?;
        println!("Created eval-sets/example.toml");
    }

    println!("\nNext steps:");
    println!("  1. Edit conceptcheck.toml (set [embedding] to use a local Ollama model)");
    println!("  2. Run: conceptcheck validate --examples eval-sets/example.toml");
    println!("  3. Run: conceptcheck evaluate --examples eval-sets/example.toml --offline");

    Ok(())
}

const SAMPLE_CONFIG: &str = r#"# conceptcheck configuration

[source]
type = "wikipedia"
base_url = "https://en.wikipedia.org/w/api.php"
timeout_secs = 5
max_candidates = 3
disambiguation = "first"

[embedding]
type = "none"
# type = "ollama"
# base_url = "http://localhost:11434"
# model = "nomic-embed-text"

[cache]
type = "memory"
# type = "disk"
# dir = "${HOME}/.cache/conceptcheck"
# ttl_secs = 86400

[scoring]
semantic = 0.6
structural = 0.4
misconception = 0.25

[limits]
min_explanation_chars = 10
max_explanation_chars = 5000

[evaluation]
parallelism = 4
output_dir = "./conceptcheck-results"
"#;

const EXAMPLE_SET: &str = r#"[example_set]
id = "example"
name = "Example Set"
description = "A small labelled set to get started"

[[examples]]
id = "bst_basic"
topic = "Binary Search Tree"
explanation = """
A binary search tree stores keys in nodes. Each node has a left child with a smaller key \
and a right child with a larger key, so search walks down from the root.
"""
expected_level = "medium"
tags = ["basics"]

[[examples]]
id = "binary_search_myth"
topic = "Binary Search"
explanation = "Binary search works on any array and always runs in constant time."
expected_level = "misconception"
tags = ["misconception"]
"#;
