use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the Engine layer (C1, C4, C5).
///
/// Mirrors the taxonomy in the protocol's error-handling design: each
/// variant names the handling the session gives it (close with a reason,
/// refuse the handshake, or close only the candidate transport).
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("malformed packet or payload: {0}")]
    Malformed(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("ping timeout")]
    PingTimeout,

    #[error("upgrade failed: {0}")]
    UpgradeFailed(String),

    #[error("invalid transport query: {0}")]
    ConfigInvalid(String),

    #[error("session not found: {0}")]
    UnknownSession(String),

    #[error("session is closed")]
    SessionClosed,
}

impl EngineError {
    /// The close reason a session adopts when this error terminates it, if any.
    pub fn close_reason(&self) -> Option<&'static str> {
        match self {
            EngineError::Malformed(_) => Some("parse error"),
            EngineError::Transport(_) => Some("transport error"),
            EngineError::PingTimeout => Some("ping timeout"),
            // Upgrade failures only ever close the candidate transport, not the session.
            EngineError::UpgradeFailed(_) => None,
            EngineError::ConfigInvalid(_) | EngineError::UnknownSession(_) => None,
            EngineError::SessionClosed => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl ResponseError for EngineError {
    fn status_code(&self) -> StatusCode {
        match self {
            EngineError::ConfigInvalid(_) => StatusCode::BAD_REQUEST,
            EngineError::UnknownSession(_) => StatusCode::BAD_REQUEST,
            EngineError::SessionClosed => StatusCode::GONE,
            EngineError::Malformed(_) => StatusCode::BAD_REQUEST,
            EngineError::Transport(_) | EngineError::PingTimeout | EngineError::UpgradeFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        tracing::warn!(error = %self, "engine request rejected");
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            detail: self.to_string(),
        })
    }
}

/// Errors surfaced by the Messaging layer (C2, C6, C7, C8).
#[derive(Error, Debug, Clone)]
pub enum MessagingError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("unknown namespace: {0}")]
    UnknownNamespace(String),

    #[error("ack id {0} unknown or already fired")]
    BadAckId(u32),
}

pub type EngineResult<T> = Result<T, EngineError>;
pub type MessagingResult<T> = Result<T, MessagingError>;
