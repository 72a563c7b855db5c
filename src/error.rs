use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use thiserror::Error;
use tracing::error;

/// Errors surfaced to callers of the relay pipeline
#[derive(Debug, Error)]
pub enum RelayError {
    /// Payload could not be decoded or decrypted (bad base64, short payload, bad padding)
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Decryption succeeded but produced no playlist text
    #[error("decryption returned empty content")]
    EmptyContent,

    /// Loopback listener could not be bound
    #[error("failed to bind playlist server on {addr}: {source}")]
    ServerBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn decryption(message: impl Into<String>) -> Self {
        Self::Decryption(message.into())
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        error!("Request failed: {}", self);

        let status = match self {
            RelayError::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, status.canonical_reason().unwrap_or("error")).into_response()
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
