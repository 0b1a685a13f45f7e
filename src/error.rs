//! Error types for the load broker

use thiserror::Error;

/// Main error type for the load broker
///
/// Negotiation outcomes (counter, accept, fail, pending) are never errors;
/// these variants cover the layers around the engine.
#[derive(Error, Debug)]
pub enum BrokerError {
    // Catalog errors
    #[error("Load not found: {0}")]
    LoadNotFound(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    // Request errors
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    // Transport errors
    #[error("Network connection error: {0}")]
    NetworkConnection(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Remote error {code}: {detail}")]
    Remote { code: u16, detail: String },

    // Configuration errors
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    /// Status code reported to remote callers
    pub fn code(&self) -> u16 {
        match self {
            BrokerError::LoadNotFound(_) => 404,
            BrokerError::Unauthorized => 401,
            BrokerError::InvalidRequest(_) | BrokerError::MalformedFrame(_) => 400,
            BrokerError::Timeout(_) => 504,
            BrokerError::Remote { code, .. } => *code,
            _ => 500,
        }
    }
}

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;
