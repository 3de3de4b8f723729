use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ConnectionState;

/// Broad error category used for user-facing handling and logging.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid input, unsupported state, or other configuration issue.
    Config,
    /// Missing or rejected credentials.
    Auth,
    /// Realtime connection could not be established or was closed.
    Transport,
    /// Throttled by the backend.
    RateLimited,
    /// Non-success HTTP status or failed HTTP request.
    Fetch,
    /// Serialization/deserialization failure.
    Serialization,
    /// Token or local persistence failure.
    Storage,
    /// Internal bug or invariant break.
    Internal,
}

/// Stable error payload shared by the core, the backend adapters and the shell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ChatError {
    /// High-level error category.
    pub category: ErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ChatError {
    /// Construct a new error.
    pub fn new(
        category: ErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// No access token is available for an authenticated call.
    pub fn auth_missing(action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ErrorCategory::Auth,
            "auth_missing",
            format!("login required to {action}"),
        )
    }

    /// Realtime connection could not be opened.
    pub fn connect_failed(target: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Transport,
            "transport_connect_failed",
            format!("could not connect to {target}: {}", reason.into()),
        )
    }

    /// Realtime connection is gone.
    pub fn transport_closed(reason: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Transport, "transport_closed", reason)
    }

    /// Non-success HTTP status for a request.
    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(classify_http_status(status), "http_status", message)
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: ConnectionState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while connection is {current:?}"),
        )
    }

    /// Whether the shell should alert the user instead of degrading silently.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self.category,
            ErrorCategory::Auth | ErrorCategory::Transport
        )
    }
}

/// Map HTTP status codes to error categories.
pub fn classify_http_status(status: u16) -> ErrorCategory {
    match status {
        401 | 403 => ErrorCategory::Auth,
        408 | 429 => ErrorCategory::RateLimited,
        400..=599 => ErrorCategory::Fetch,
        _ => ErrorCategory::Internal,
    }
}
