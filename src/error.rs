// src/error.rs

//! Unified error handling for the employment data pipeline.

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered with a non-success HTTP status
    #[error("upstream request failed: HTTP {status}")]
    UpstreamStatus { status: u16 },

    /// Upstream answered but its envelope status was not the success sentinel
    #[error("upstream rejected request ({status}): {message}")]
    UpstreamRejected { status: String, message: String },

    /// None of the requested regions could be mapped to a series id
    #[error("no valid area ids found for {count} requested region(s)")]
    NoResolvableRegions { count: usize },

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Geometry document does not have the expected shape
    #[error("Malformed geometry document: {0}")]
    Geometry(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a geometry shape error.
    pub fn geometry(message: impl Into<String>) -> Self {
        Self::Geometry(message.into())
    }
}
