//! conceptcheck-sources: external collaborators and configuration.
//!
//! Implements the core `ReferenceSource` trait for Wikipedia and the
//! `EmbeddingModel` trait for Ollama, ships deterministic mocks for tests, and
//! turns a `conceptcheck.toml` file into a ready-to-use engine.

pub mod config;
pub mod error;
pub mod mock;
pub mod ollama;
pub mod wikipedia;

pub use config::{build_engine, load_config, load_config_from, ConceptcheckConfig};
pub use error::ConfigError;
