//! Error types for agent client operations

use thiserror::Error;

/// Result type alias for agent client operations
pub type Result<T> = std::result::Result<T, AgentClientError>;

/// Errors that can occur while talking to an MTConnect agent
#[derive(Error, Debug)]
pub enum AgentClientError {
    /// HTTP request failed (refused, reset, timed out, ...)
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Agent answered with a non-success status and no MTConnect document
    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// Agent answered with an MTConnectError document
    #[error("Agent error {code}: {message}")]
    AgentError { code: String, message: String },

    /// Response was not a usable MTConnect document
    #[error("Failed to parse document: {0}")]
    ParseError(String),
}

impl AgentClientError {
    /// Create a server error from status code and message
    pub fn server_error(status: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status,
            message: message.into(),
        }
    }

    /// Whether the agent rejected a `sample` request because the requested
    /// sequence has left its buffer
    pub fn is_out_of_range(&self) -> bool {
        matches!(self, Self::AgentError { code, .. } if code == "OUT_OF_RANGE")
    }

    /// Whether this is a transport level failure rather than a bad document
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::HttpError(_) | Self::IoError(_) | Self::ServerError { .. }
        )
    }
}
