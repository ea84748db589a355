//! Knowledge Store: structured concept definitions loaded from TOML.
//!
//! A built-in set of computer science concepts is embedded in the binary.
//! Deployments can merge in their own definitions; the combined set is
//! validated once at load time and is read-only afterwards.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::Context;
use regex::RegexBuilder;
use serde::Deserialize;

use crate::error::KnowledgeError;
use crate::model::{ConceptEntry, MisconceptionPattern};

const BUILTIN_CONCEPTS: &str = include_str!("../data/concepts.toml");

/// Normalize a concept name into a lookup key.
///
/// Lowercases, drops apostrophes, and collapses every other run of
/// non-alphanumeric characters into a single `_`.
pub fn concept_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c == '\'' || c == '\u{2019}' {
            continue;
        }
        if c.is_alphanumeric() {
            if pending_sep && !key.is_empty() {
                key.push('_');
            }
            pending_sep = false;
            key.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    key
}

#[derive(Debug, Deserialize)]
struct TomlKnowledgeFile {
    #[serde(default)]
    concepts: Vec<TomlConcept>,
}

#[derive(Debug, Deserialize)]
struct TomlConcept {
    name: String,
    #[serde(default = "default_subject")]
    subject: String,
    definition: String,
    #[serde(default)]
    key_terms: Vec<String>,
    #[serde(default)]
    misconceptions: Vec<MisconceptionPattern>,
    #[serde(default)]
    prerequisites: Vec<String>,
    #[serde(default)]
    applications: Vec<String>,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default = "default_difficulty")]
    difficulty: u8,
}

fn default_subject() -> String {
    "general".to_string()
}

fn default_difficulty() -> u8 {
    3
}

/// Immutable collection of concept entries with case-insensitive lookup.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeStore {
    entries: Vec<ConceptEntry>,
    index: HashMap<String, usize>,
}

impl KnowledgeStore {
    /// A store with no concepts. Every lookup misses.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The embedded computer science concept set.
    pub fn builtin() -> Result<Self, KnowledgeError> {
        Self::from_sources(&[("builtin", BUILTIN_CONCEPTS)])
    }

    /// Built-in concepts merged with an optional extra definitions file.
    pub fn load(extra: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = extra else {
            return Ok(Self::builtin()?);
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read knowledge file: {}", path.display()))?;
        let name = path.display().to_string();
        let store = Self::from_sources(&[
            ("builtin", BUILTIN_CONCEPTS),
            (name.as_str(), content.as_str()),
        ])?;
        Ok(store)
    }

    /// Parse a single TOML document (useful for testing).
    pub fn from_toml_str(content: &str, source_name: &str) -> Result<Self, KnowledgeError> {
        Self::from_sources(&[(source_name, content)])
    }

    /// Parse and merge several TOML documents, then validate the whole set.
    pub fn from_sources(sources: &[(&str, &str)]) -> Result<Self, KnowledgeError> {
        let mut store = Self::empty();
        for (source_name, content) in sources {
            let parsed: TomlKnowledgeFile =
                toml::from_str(content).map_err(|e| KnowledgeError::Parse {
                    source_name: source_name.to_string(),
                    message: e.to_string(),
                })?;
            for concept in parsed.concepts {
                store.insert(build_entry(concept)?)?;
            }
        }
        store.check_cycles()?;
        tracing::debug!(concepts = store.entries.len(), "knowledge store loaded");
        Ok(store)
    }

    fn insert(&mut self, entry: ConceptEntry) -> Result<(), KnowledgeError> {
        let position = self.entries.len();
        let keys = std::iter::once(entry.id.clone())
            .chain(entry.aliases.iter().map(|a| concept_key(a)))
            .collect::<BTreeSet<_>>();
        for key in &keys {
            if self.index.contains_key(key) {
                return Err(KnowledgeError::Duplicate {
                    name: entry.name.clone(),
                    key: key.clone(),
                });
            }
        }
        for key in keys {
            self.index.insert(key, position);
        }
        self.entries.push(entry);
        Ok(())
    }

    fn check_cycles(&self) -> Result<(), KnowledgeError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        fn visit(
            store: &KnowledgeStore,
            idx: usize,
            marks: &mut [Mark],
            path: &mut Vec<usize>,
        ) -> Result<(), KnowledgeError> {
            marks[idx] = Mark::InProgress;
            path.push(idx);
            for prereq in &store.entries[idx].prerequisites {
                let Some(&next) = store.index.get(&concept_key(prereq)) else {
                    continue;
                };
                match marks[next] {
                    Mark::InProgress => {
                        let start = path.iter().position(|&p| p == next).unwrap_or(0);
                        let mut cycle: Vec<String> = path[start..]
                            .iter()
                            .map(|&p| store.entries[p].name.clone())
                            .collect();
                        cycle.push(store.entries[next].name.clone());
                        return Err(KnowledgeError::Cycle(cycle));
                    }
                    Mark::Unvisited => visit(store, next, marks, path)?,
                    Mark::Done => {}
                }
            }
            path.pop();
            marks[idx] = Mark::Done;
            Ok(())
        }

        let mut marks = vec![Mark::Unvisited; self.entries.len()];
        let mut path = Vec::new();
        for idx in 0..self.entries.len() {
            if marks[idx] == Mark::Unvisited {
                visit(self, idx, &mut marks, &mut path)?;
            }
        }
        Ok(())
    }

    /// Look up a concept by name, alias, or key, ignoring case and punctuation.
    pub fn get(&self, name: &str) -> Option<&ConceptEntry> {
        self.index
            .get(&concept_key(name))
            .map(|&idx| &self.entries[idx])
    }

    /// Prerequisites of a concept plus the concepts that build on it.
    pub fn related(&self, name: &str) -> Vec<String> {
        let Some(entry) = self.get(name) else {
            return Vec::new();
        };
        let display = |prereq: &str| {
            self.get(prereq)
                .map(|e| e.name.clone())
                .unwrap_or_else(|| prereq.to_string())
        };
        let mut related: BTreeSet<String> =
            entry.prerequisites.iter().map(|p| display(p)).collect();
        for other in &self.entries {
            if other
                .prerequisites
                .iter()
                .any(|p| concept_key(p) == entry.id)
            {
                related.insert(other.name.clone());
            }
        }
        related.into_iter().collect()
    }

    /// Concepts in a subject, in definition order.
    pub fn by_subject(&self, subject: &str) -> Vec<&ConceptEntry> {
        let key = concept_key(subject);
        self.entries
            .iter()
            .filter(|e| concept_key(&e.subject) == key)
            .collect()
    }

    /// Every key term of every concept.
    pub fn vocabulary(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .flat_map(|e| e.key_terms.iter().cloned())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConceptEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn build_entry(concept: TomlConcept) -> Result<ConceptEntry, KnowledgeError> {
    let name = concept.name.trim().to_string();
    if !(1..=5).contains(&concept.difficulty) {
        return Err(KnowledgeError::Difficulty {
            name,
            difficulty: concept.difficulty,
        });
    }

    let mut key_terms: Vec<String> = Vec::new();
    for term in concept.key_terms {
        let term = term.trim().to_lowercase();
        if !term.is_empty() && !key_terms.contains(&term) {
            key_terms.push(term);
        }
    }
    if key_terms.is_empty() {
        return Err(KnowledgeError::EmptyTerms(name));
    }

    let mut seen_ids = BTreeSet::new();
    let mut misconceptions = Vec::with_capacity(concept.misconceptions.len());
    for mut pattern in concept.misconceptions {
        let invalid = |problem: String| KnowledgeError::Misconception {
            concept: name.clone(),
            id: pattern.id.clone(),
            problem,
        };
        if !seen_ids.insert(pattern.id.clone()) {
            return Err(invalid("is defined twice".to_string()));
        }
        if pattern.phrases.is_empty() && pattern.patterns.is_empty() {
            return Err(invalid("has no phrases or patterns".to_string()));
        }
        let compiled = pattern
            .patterns
            .iter()
            .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
            .collect::<Result<Vec<_>, _>>();
        match compiled {
            Ok(compiled) => pattern.compiled = compiled,
            Err(e) => return Err(invalid(format!("has an invalid pattern: {e}"))),
        }
        misconceptions.push(pattern);
    }

    Ok(ConceptEntry {
        id: concept_key(&name),
        name,
        subject: concept.subject,
        definition: concept.definition.trim().to_string(),
        key_terms,
        misconceptions,
        prerequisites: concept.prerequisites,
        applications: concept.applications,
        aliases: concept.aliases,
        difficulty: concept.difficulty,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_normalization() {
        assert_eq!(concept_key("Binary Search Tree"), "binary_search_tree");
        assert_eq!(concept_key("  binary-search   TREE "), "binary_search_tree");
        assert_eq!(concept_key("Dijkstra's Algorithm"), "dijkstras_algorithm");
        assert_eq!(concept_key("TCP/IP"), "tcp_ip");
    }

    #[test]
    fn builtin_set_loads() {
        let store = KnowledgeStore::builtin().unwrap();
        assert_eq!(store.len(), 10);
        for entry in store.iter() {
            assert!(!entry.key_terms.is_empty(), "{} has no terms", entry.name);
            assert!((1..=5).contains(&entry.difficulty));
        }
    }

    #[test]
    fn misconception_patterns_are_compiled_at_load() {
        let store = KnowledgeStore::builtin().unwrap();
        for entry in store.iter() {
            for pattern in &entry.misconceptions {
                assert_eq!(pattern.compiled.len(), pattern.patterns.len(), "{}", pattern.id);
            }
        }
        let bs = store.get("Binary Search").unwrap();
        let constant = bs.misconceptions.iter().find(|m| m.id == "constant-time").unwrap();
        assert!(constant.compiled[0].is_match("it runs in O( 1 ) time"));
    }

    #[test]
    fn lookup_tolerates_case_punctuation_and_aliases() {
        let store = KnowledgeStore::builtin().unwrap();
        let bst = store.get("binary search tree").unwrap();
        assert_eq!(bst.name, "Binary Search Tree");
        assert_eq!(store.get("Binary-Search Tree").unwrap().id, bst.id);
        assert_eq!(store.get("bst").unwrap().id, bst.id);
        assert_eq!(store.get("dijkstras algorithm").unwrap().name, "Dijkstra's Algorithm");
        assert!(store.get("Quantum Basket Weaving").is_none());
    }

    #[test]
    fn related_includes_prerequisites_and_dependents() {
        let store = KnowledgeStore::builtin().unwrap();
        let related = store.related("Binary Search");
        assert!(related.contains(&"Sorting".to_string()));
        assert!(related.contains(&"Quicksort".to_string()));
        assert!(store.related("nothing here").is_empty());
    }

    #[test]
    fn by_subject_keeps_definition_order() {
        let store = KnowledgeStore::builtin().unwrap();
        let names: Vec<&str> = store
            .by_subject("Operating Systems")
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["Process Scheduling", "Deadlock"]);
    }

    #[test]
    fn rejects_duplicate_names() {
        let toml = r#"
[[concepts]]
name = "Stack"
definition = "LIFO"
key_terms = ["push", "pop"]

[[concepts]]
name = "stack"
definition = "again"
key_terms = ["push"]
"#;
        let err = KnowledgeStore::from_toml_str(toml, "test").unwrap_err();
        assert!(matches!(err, KnowledgeError::Duplicate { .. }));
    }

    #[test]
    fn rejects_empty_terms() {
        let toml = r#"
[[concepts]]
name = "Stack"
definition = "LIFO"
key_terms = ["  "]
"#;
        let err = KnowledgeStore::from_toml_str(toml, "test").unwrap_err();
        assert!(matches!(err, KnowledgeError::EmptyTerms(_)));
    }

    #[test]
    fn rejects_bad_difficulty() {
        let toml = r#"
[[concepts]]
name = "Stack"
definition = "LIFO"
key_terms = ["push"]
difficulty = 9
"#;
        let err = KnowledgeStore::from_toml_str(toml, "test").unwrap_err();
        assert!(matches!(err, KnowledgeError::Difficulty { difficulty: 9, .. }));
    }

    #[test]
    fn rejects_prerequisite_cycles() {
        let toml = r#"
[[concepts]]
name = "A"
definition = "a"
key_terms = ["a"]
prerequisites = ["B", "Undefined Thing"]

[[concepts]]
name = "B"
definition = "b"
key_terms = ["b"]
prerequisites = ["C"]

[[concepts]]
name = "C"
definition = "c"
key_terms = ["c"]
prerequisites = ["a"]
"#;
        let err = KnowledgeStore::from_toml_str(toml, "test").unwrap_err();
        match err {
            KnowledgeError::Cycle(path) => assert_eq!(path, vec!["A", "B", "C", "A"]),
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn rejects_self_prerequisite() {
        let toml = r#"
[[concepts]]
name = "Recursion"
definition = "see recursion"
key_terms = ["base case"]
prerequisites = ["recursion"]
"#;
        assert!(matches!(
            KnowledgeStore::from_toml_str(toml, "test").unwrap_err(),
            KnowledgeError::Cycle(_)
        ));
    }

    #[test]
    fn rejects_invalid_misconception_pattern() {
        let toml = r#"
[[concepts]]
name = "Stack"
definition = "LIFO"
key_terms = ["push"]

[[concepts.misconceptions]]
id = "fifo"
description = "thinks it is FIFO"
patterns = ["(unclosed"]
correction = "Stacks are LIFO."
"#;
        let err = KnowledgeStore::from_toml_str(toml, "test").unwrap_err();
        assert!(err.to_string().contains("invalid pattern"));
    }

    #[test]
    fn extra_file_merges_with_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extra.toml");
        std::fs::write(
            &path,
            r#"
[[concepts]]
name = "Stack"
subject = "data structures"
definition = "A stack is a last-in first-out collection."
key_terms = ["push", "pop", "top", "lifo"]
"#,
        )
        .unwrap();
        let store = KnowledgeStore::load(Some(&path)).unwrap();
        assert_eq!(store.len(), 11);
        assert!(store.get("stack").is_some());
        assert!(store.vocabulary().contains("lifo"));
    }
}
