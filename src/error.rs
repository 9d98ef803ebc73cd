//! Error taxonomy for the chat service.
//!
//! Every failure is surfaced to the end user as a readable message; nothing
//! here is retried automatically. The HTTP mapping lives next to the type so
//! handlers can return `Result<_, ChatError>` directly.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Errors raised while provisioning credentials, opening sessions, or
/// exchanging messages with the remote model.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Credential configuration is missing or unusable. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Credential material is not valid base64-encoded UTF-8 JSON.
    #[error("Credential decoding failed: {0}")]
    Decoding(String),

    /// Writing the credential artifact failed.
    #[error("Credential provisioning failed: {0}")]
    Provisioning(#[from] std::io::Error),

    /// Remote auth, network, or quota failure while opening a session.
    /// The session is not memoized; the next user action may retry.
    #[error("Could not start a conversation: {0}")]
    SessionInit(String),

    /// A single message exchange failed. The session stays usable.
    #[error("The model request failed: {0}")]
    RemoteCall(String),

    /// The service answered with no text at all.
    #[error("The model returned an empty reply")]
    EmptyReply,

    /// The submitted text was empty or whitespace.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No session exists under the given identifier.
    #[error("Session not found: {0}")]
    SessionNotFound(String),
}

impl ChatError {
    /// Stable machine-readable kind, used in API error bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Decoding(_) => "decoding",
            Self::Provisioning(_) => "provisioning",
            Self::SessionInit(_) => "session_init",
            Self::RemoteCall(_) => "remote_call",
            Self::EmptyReply => "empty_reply",
            Self::InvalidInput(_) => "invalid_input",
            Self::SessionNotFound(_) => "session_not_found",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::SessionInit(_) | Self::RemoteCall(_) | Self::EmptyReply => {
                StatusCode::BAD_GATEWAY
            }
            Self::Configuration(_) | Self::Decoding(_) | Self::Provisioning(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Wire shape of an error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub kind: &'static str,
    pub message: String,
}

impl From<&ChatError> for ErrorBody {
    fn from(err: &ChatError) -> Self {
        Self {
            error: ErrorDetail {
                kind: err.kind(),
                message: err.to_string(),
            },
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), error = %self, "Request failed");
        } else {
            tracing::warn!(kind = self.kind(), error = %self, "Request rejected");
        }
        (status, Json(ErrorBody::from(&self))).into_response()
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ChatError>;
