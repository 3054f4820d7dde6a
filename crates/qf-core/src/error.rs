//! Error types for qf-core

use thiserror::Error;

/// Main error type for qf-core
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid phone number: {0}")]
    InvalidPhoneNumber(String),

    #[error("Invalid JID: {0}")]
    InvalidJid(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Auth store error: {0}")]
    AuthStore(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for qf-core
pub type Result<T> = std::result::Result<T, Error>;
