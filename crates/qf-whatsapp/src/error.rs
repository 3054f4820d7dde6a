//! Error types for qf-whatsapp

use thiserror::Error;

/// qf-whatsapp error type
#[derive(Error, Debug)]
pub enum WhatsAppError {
    #[error("Core error: {0}")]
    Core(#[from] qf_core::Error),

    #[error("Request failed: {0}")]
    Api(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Media error: {0}")]
    Media(String),

    #[error("QR rendering failed: {0}")]
    Qr(String),

    #[error("Pairing code expired before the device was linked")]
    PairingTimeout,

    #[error("Session error: {0}")]
    Session(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, WhatsAppError>;
