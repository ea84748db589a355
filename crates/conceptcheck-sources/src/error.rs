//! Configuration error types.

use thiserror::Error;

/// A configuration value that parsed but cannot be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },

    /// `[cache] type = "disk"` with no directory and no HOME to default to.
    #[error("disk cache requires [cache] dir or CONCEPTCHECK_CACHE_DIR")]
    MissingCacheDir,

    #[error("embedding model name must not be empty")]
    MissingModel,
}
