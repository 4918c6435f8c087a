//! Error types for Dirigent.

use thiserror::Error;

/// Library-level error type for Dirigent operations.
#[derive(Error, Debug)]
pub enum DirigentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Job store error: {0}")]
    Store(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("OpenAI API error: {0}")]
    OpenAI(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for Dirigent operations.
pub type Result<T> = std::result::Result<T, DirigentError>;
