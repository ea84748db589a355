//! TOML labelled-example parser.
//!
//! Loads example sets from TOML files and directories, and validates them.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::knowledge::KnowledgeStore;
use crate::model::{ExampleSet, LabelledExample, UnderstandingLevel};

/// Intermediate TOML structure for parsing example set files.
#[derive(Debug, Deserialize)]
struct TomlExampleFile {
    #[serde(default)]
    example_set: Option<TomlExampleSetHeader>,
    #[serde(default)]
    examples: Vec<TomlExample>,
}

#[derive(Debug, Deserialize)]
struct TomlExampleSetHeader {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct TomlExample {
    id: String,
    topic: String,
    #[serde(default)]
    subject: Option<String>,
    explanation: String,
    expected_level: String,
    #[serde(default)]
    expected_coverage: Option<f64>,
    #[serde(default)]
    expected_correctness: Option<f64>,
    #[serde(default)]
    tags: Vec<String>,
}

/// Parse a single TOML file into an `ExampleSet`.
pub fn parse_example_set(path: &Path) -> Result<ExampleSet> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read example set file: {}", path.display()))?;

    parse_example_set_str(&content, path)
}

/// Parse a TOML string into an `ExampleSet` (useful for testing).
///
/// Without an `[example_set]` header the file stem names the set.
pub fn parse_example_set_str(content: &str, source_path: &Path) -> Result<ExampleSet> {
    let parsed: TomlExampleFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    let examples = parsed
        .examples
        .into_iter()
        .map(|e| {
            let expected_level: UnderstandingLevel = e
                .expected_level
                .parse()
                .map_err(|err: String| anyhow::anyhow!("example '{}': {}", e.id, err))?;
            Ok(LabelledExample {
                id: e.id,
                topic: e.topic,
                subject: e.subject,
                explanation: e.explanation,
                expected_level,
                expected_coverage: e.expected_coverage,
                expected_correctness: e.expected_correctness,
                tags: e.tags,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let (id, name, description) = match parsed.example_set {
        Some(header) => (header.id, header.name, header.description),
        None => {
            let stem = source_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "examples".to_string());
            (stem.clone(), stem, String::new())
        }
    };

    Ok(ExampleSet {
        id,
        name,
        description,
        examples,
    })
}

/// Recursively load all `.toml` example set files from a directory.
pub fn load_example_directory(dir: &Path) -> Result<Vec<ExampleSet>> {
    let mut sets = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    let mut paths = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    paths.sort();

    for path in paths {
        if path.is_dir() {
            sets.extend(load_example_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_example_set(&path) {
                Ok(set) => sets.push(set),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    Ok(sets)
}

/// Load example sets from a file or a directory.
pub fn load_examples(path: &Path) -> Result<Vec<ExampleSet>> {
    if path.is_dir() {
        load_example_directory(path)
    } else {
        Ok(vec![parse_example_set(path)?])
    }
}

/// A warning from example set validation.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// The example ID (if applicable).
    pub example_id: Option<String>,
    pub message: String,
}

/// Validate an example set for common issues.
pub fn validate_example_set(set: &ExampleSet, knowledge: &KnowledgeStore) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let warn = |id: &str, message: String| ValidationWarning {
        example_id: Some(id.to_string()),
        message,
    };

    if set.examples.is_empty() {
        warnings.push(ValidationWarning {
            example_id: None,
            message: "example set has no examples".into(),
        });
    }

    let mut seen_ids = HashSet::new();
    for example in &set.examples {
        if !seen_ids.insert(&example.id) {
            warnings.push(warn(&example.id, format!("duplicate example ID: {}", example.id)));
        }
        if example.explanation.trim().is_empty() {
            warnings.push(warn(&example.id, "explanation is empty".into()));
        }
        for (name, value) in [
            ("expected_coverage", example.expected_coverage),
            ("expected_correctness", example.expected_correctness),
        ] {
            if let Some(v) = value {
                if !(0.0..=1.0).contains(&v) {
                    warnings.push(warn(&example.id, format!("{name} {v} is outside [0, 1]")));
                }
            }
        }
        if knowledge.get(&example.topic).is_none() {
            warnings.push(warn(
                &example.id,
                format!(
                    "topic '{}' is not in the knowledge base; it can only be evaluated with an external source",
                    example.topic
                ),
            ));
        }
    }

    warnings
}
