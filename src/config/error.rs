//! Configuration Error Types
//!
//! Errors raised while loading, merging and validating resilience configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Explicitly requested configuration file does not exist
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    /// A source could not be parsed or deserialized into the schema
    #[error("Failed to parse configuration from {source_name}: {reason}")]
    ParseError { source_name: String, reason: String },

    /// A value is syntactically valid but outside its allowed range
    #[error("Invalid value for '{field}': {reason}")]
    ValidationError { field: String, reason: String },
}

impl ConfigurationError {
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    pub fn parse_error<S: Into<String>, E: std::fmt::Display>(source_name: S, error: E) -> Self {
        Self::ParseError {
            source_name: source_name.into(),
            reason: error.to_string(),
        }
    }

    pub fn validation<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Self::ValidationError {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigurationError>;
