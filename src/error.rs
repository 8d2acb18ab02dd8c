//! Custom error types for rustskgc.
//!
//! This module defines all error types used throughout the library.
//! All functions return `Result<T, SkgcError>` instead of using `unwrap()`.

use thiserror::Error;

/// Main error type for rustskgc operations.
///
/// Uses `thiserror` for ergonomic error handling and automatic `Display` implementation.
#[derive(Debug, Error)]
pub enum SkgcError {
    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Model service returned a non-success status
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Error message from API
        message: String,
    },

    /// Model service kept answering 429 Too Many Requests
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// Response body could not be interpreted
    #[error("Parse error: {0}")]
    Parse(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML prompt file error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// CSV output error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// A publication record is missing a required field
    #[error("Input error in record '{id}': {reason}")]
    Input {
        /// Record identifier
        id: String,
        /// What is wrong with it
        reason: String,
    },

    /// A template placeholder had no value
    #[error("Missing value for placeholder(s): {}", .0.join(", "))]
    MissingPlaceholder(Vec<String>),

    /// The format validator gave up on a step
    #[error("Validation failed for {step} after {attempts} attempt(s): {reason}")]
    ValidationExhausted {
        /// Step name (e.g. "literal_extraction")
        step: String,
        /// Number of assistant calls made
        attempts: usize,
        /// Last structural check failure
        reason: String,
        /// Last normalised assistant output
        last_output: String,
    },
}

impl SkgcError {
    /// True for failures talking to the model service.
    ///
    /// These abort the current publication; everything else is contained
    /// at a finer granularity.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SkgcError::Network(_) | SkgcError::Api { .. } | SkgcError::RateLimited(_)
        )
    }

    /// Short machine-readable kind used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            SkgcError::Network(_) | SkgcError::Api { .. } | SkgcError::RateLimited(_) => "transport",
            SkgcError::ValidationExhausted { .. } => "validation_exhausted",
            SkgcError::Input { .. } => "input",
            SkgcError::MissingPlaceholder(_) => "prompt",
            SkgcError::Parse(_) => "parse",
            SkgcError::Config(_) => "config",
            SkgcError::Io(_) | SkgcError::Json(_) | SkgcError::Yaml(_) | SkgcError::Csv(_) => "io",
        }
    }
}

/// Result type alias using `SkgcError`
pub type Result<T> = std::result::Result<T, SkgcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        let api = SkgcError::Api {
            code: 429,
            message: "rate limited".to_string(),
        };
        assert!(api.is_transport());
        assert_eq!(api.kind(), "transport");

        let exhausted = SkgcError::ValidationExhausted {
            step: "self_review".to_string(),
            attempts: 3,
            reason: "empty".to_string(),
            last_output: String::new(),
        };
        assert!(!exhausted.is_transport());
        assert!(SkgcError::RateLimited(5).is_transport());
        assert_eq!(exhausted.kind(), "validation_exhausted");
    }

    #[test]
    fn test_missing_placeholder_message() {
        let err = SkgcError::MissingPlaceholder(vec!["title".to_string(), "abstract".to_string()]);
        assert_eq!(err.to_string(), "Missing value for placeholder(s): title, abstract");
    }
}
