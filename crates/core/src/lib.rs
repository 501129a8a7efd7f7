//! Shared primitives for all Rust crates in jitgate.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across jitgate crates.
pub type AppResult<T> = Result<T, AppError>;

/// Common application error categories.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Request failed signature, timestamp, or replay checks.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Caller is authenticated but blocked by approval policy.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Identity provider failed terminally after retries.
    #[error("identity provider error: {0}")]
    Identity(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns true when the error marks a stale-status conditional update.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Chat-side identity of whoever drove a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    chat_user_id: String,
    email: String,
}

impl Actor {
    /// Creates an actor from chat identity data.
    #[must_use]
    pub fn new(chat_user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            chat_user_id: chat_user_id.into(),
            email: email.into(),
        }
    }

    /// Returns the chat user id.
    #[must_use]
    pub fn chat_user_id(&self) -> &str {
        self.chat_user_id.as_str()
    }

    /// Returns the actor email.
    #[must_use]
    pub fn email(&self) -> &str {
        self.email.as_str()
    }
}
