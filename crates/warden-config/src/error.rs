//! Configuration error types.

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A config file is not valid TOML or does not match the schema.
    #[error("failed to parse config {path}: {source}")]
    ParseError {
        /// File path, or a placeholder for merged/embedded input.
        path: String,
        /// Underlying error.
        source: toml::de::Error,
    },

    /// A value is out of range or inconsistent.
    #[error("invalid config value for {field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong.
        message: String,
    },

    /// The resolved config could not be rendered.
    #[error("failed to serialize config: {0}")]
    SerializeError(String),

    /// No home directory could be determined.
    #[error("could not determine the home directory")]
    NoHomeDir,
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
