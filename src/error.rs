//! Error handling for the stream orchestrator

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unauthorized (credential rejected by a collaborator)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Network error (collaborator unreachable)
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Collaborator answered with a non-success status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Telemetry or registry payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Message bus error
    #[error("Message bus error: {0}")]
    MessageBus(String),

    /// External call exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure is a transient remote condition worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) | Error::Timeout(_) | Error::Http(_) => true,
            Error::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Build an `Api` error from a response status and body.
    pub fn api(status: reqwest::StatusCode, body: impl Into<String>) -> Self {
        Error::Api {
            status: status.as_u16(),
            message: body.into(),
        }
    }
}
