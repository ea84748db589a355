//! conceptcheck-core: concept comparison, scoring, and feedback.
//!
//! This crate holds the data model, the Knowledge Store, the text pipeline
//! (normalize, compare, score, compose feedback), the reference resolver with
//! its caches, and the offline evaluation harness. External collaborators
//! plug in through the traits in [`traits`].

pub mod cache;
pub mod compare;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod feedback;
pub mod knowledge;
pub mod model;
pub mod normalize;
pub mod parser;
pub mod report;
pub mod resolver;
pub mod scoring;
pub mod traits;

pub use engine::{ConceptEngine, EngineBuilder, InputLimits};
pub use error::{AnalysisError, FailureKind, FetchError, KnowledgeError};
pub use knowledge::KnowledgeStore;
pub use model::{AnalysisResult, TopicOverview, UnderstandingLevel};
