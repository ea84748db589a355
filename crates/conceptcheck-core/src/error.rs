//! Error types for reference fetching, knowledge loading, and analysis.
//!
//! `FetchError` is produced by external collaborators (reference sources,
//! embedding backends). It lives here so the resolver can classify failures
//! for retry decisions without string matching.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when talking to an external content or model service.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The requested page or resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The service answered 429.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// The service returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    Network(String),

    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl FetchError {
    /// Returns `true` if retrying the same call might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::RateLimited { .. } | FetchError::Timeout(_) | FetchError::Network(_) => {
                true
            }
            FetchError::Api { status, .. } => *status >= 500,
            FetchError::NotFound(_) | FetchError::Decode(_) => false,
        }
    }

    /// Returns the retry-after delay in milliseconds, if applicable.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            FetchError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

/// Coarse failure category exposed to callers of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Malformed or out-of-bounds input.
    Input,
    /// No reference content exists for the topic.
    Resolution,
    /// External content could not be reached; retrying may help.
    Transient,
    /// A bug or broken invariant inside the engine.
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Input => "input",
            FailureKind::Resolution => "resolution",
            FailureKind::Transient => "transient",
            FailureKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Failure outcome of `analyze` and `resolve_overview`.
#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no reference content found for topic '{topic}'")]
    UnresolvedTopic { topic: String },

    #[error("reference content for '{topic}' is temporarily unavailable: {reason}")]
    ReferenceUnavailable { topic: String, reason: String },

    /// Carries a generic message; details go to the log.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AnalysisError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AnalysisError::InvalidInput(_) => FailureKind::Input,
            AnalysisError::UnresolvedTopic { .. } => FailureKind::Resolution,
            AnalysisError::ReferenceUnavailable { .. } => FailureKind::Transient,
            AnalysisError::Internal(_) => FailureKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == FailureKind::Transient
    }

    /// Logs the detail and returns an `Internal` error carrying a generic message.
    pub(crate) fn internal(detail: impl fmt::Display) -> Self {
        tracing::error!(detail = %detail, "internal analysis failure");
        AnalysisError::Internal("the analysis could not be completed".to_string())
    }
}

/// Errors raised while loading and validating knowledge definitions.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("failed to parse knowledge file {source_name}: {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    #[error("duplicate concept '{name}' (key '{key}' already defined)")]
    Duplicate { name: String, key: String },

    #[error("concept '{0}' has no key terms")]
    EmptyTerms(String),

    #[error("concept '{name}' has difficulty {difficulty}, expected 1-5")]
    Difficulty { name: String, difficulty: u8 },

    #[error("concept '{concept}': misconception '{id}' {problem}")]
    Misconception {
        concept: String,
        id: String,
        problem: String,
    },

    #[error("prerequisite cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(FetchError::Timeout(5).is_transient());
        assert!(FetchError::Network("reset".into()).is_transient());
        assert!(FetchError::RateLimited { retry_after_ms: 100 }.is_transient());
        assert!(FetchError::Api {
            status: 503,
            message: String::new()
        }
        .is_transient());
        assert!(!FetchError::Api {
            status: 400,
            message: String::new()
        }
        .is_transient());
        assert!(!FetchError::NotFound("x".into()).is_transient());
    }

    #[test]
    fn analysis_error_kinds() {
        assert_eq!(
            AnalysisError::InvalidInput("empty".into()).kind(),
            FailureKind::Input
        );
        let unresolved = AnalysisError::UnresolvedTopic {
            topic: "Quantum Basket Weaving".into(),
        };
        assert_eq!(unresolved.kind(), FailureKind::Resolution);
        assert!(unresolved.to_string().contains("Quantum Basket Weaving"));
        assert!(!unresolved.is_retryable());

        let unavailable = AnalysisError::ReferenceUnavailable {
            topic: "Deadlock".into(),
            reason: "timeout".into(),
        };
        assert!(unavailable.is_retryable());
    }

    #[test]
    fn cycle_message() {
        let err = KnowledgeError::Cycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "prerequisite cycle: a -> b -> a");
    }
}
