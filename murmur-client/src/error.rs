//! # Client Error Types

use reqwest::StatusCode;
use shared::models::ErrorResponse;
use thiserror::Error;

/// Result type alias for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Failures talking to the Murmur backend
#[derive(Error, Debug)]
pub enum ClientError {
    /// The request could not be sent or the connection dropped
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status
    #[error("server responded with {status}: {body}")]
    Status {
        /// HTTP status code.
        status: StatusCode,
        /// Decoded error body.
        body: ErrorResponse,
    },

    /// The response body did not match the expected shape
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// An endpoint path could not be joined onto the base URL
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Reading a streamed body failed midway
    #[error("stream transport error: {message}")]
    Transport {
        /// What went wrong.
        message: String,
    },
}

impl ClientError {
    /// Create a new transport error
    pub fn transport<T: Into<String>>(message: T) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// HTTP status of the failure, if the server produced one
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(err) => err.status(),
            _ => None,
        }
    }
}
