//! Errors raised by the session synchronization layer.
//!
//! Each error carries a category, structured context and a suggestion so the
//! request-handling layer can turn it into a user-visible failure without
//! matching on message text.

use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;

/// Broad classification used by callers to pick a failure response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Per-session lock could not be obtained.
    Lock,
    /// The session attribute backend failed.
    Storage,
    /// The caller used the API incorrectly.
    Usage,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Lock => "lock",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Usage => "usage",
        }
    }
}

/// Failure reported by a `SessionStore` backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Session store unavailable during {operation}: {reason}")]
    Unavailable { operation: String, reason: String },
}

impl StoreError {
    pub fn unavailable(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        StoreError::Unavailable {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from the session value manager, sections and lock registry.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Timed out after {waited:?} waiting for the lock of session {session_id}")]
    LockTimeout {
        session_id: String,
        waited: Duration,
    },
    #[error("Session store error: {0}")]
    Store(#[from] StoreError),
    #[error("Attribute '{attribute}' of session {session_id} does not hold the expected type")]
    TypeMismatch {
        session_id: String,
        attribute: String,
    },
    #[error(
        "Update section for attribute '{attribute}' of session {session_id} closed with uncommitted changes"
    )]
    UncommittedUpdate {
        session_id: String,
        attribute: String,
    },
    #[error("Update section for attribute '{attribute}' of session {session_id} is already closed")]
    SectionClosed {
        session_id: String,
        attribute: String,
    },
}

impl SyncError {
    /// Returns the error category for programmatic handling.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::LockTimeout { .. } => ErrorCategory::Lock,
            SyncError::Store(_) => ErrorCategory::Storage,
            SyncError::TypeMismatch { .. }
            | SyncError::UncommittedUpdate { .. }
            | SyncError::SectionClosed { .. } => ErrorCategory::Usage,
        }
    }

    /// Returns structured context about the error for debugging.
    pub fn context(&self) -> Value {
        match self {
            SyncError::LockTimeout { session_id, waited } => {
                json!({ "session_id": session_id, "waited_ms": waited.as_millis() as u64 })
            }
            SyncError::Store(StoreError::Unavailable { operation, reason }) => {
                json!({ "operation": operation, "reason": reason })
            }
            SyncError::TypeMismatch {
                session_id,
                attribute,
            }
            | SyncError::UncommittedUpdate {
                session_id,
                attribute,
            }
            | SyncError::SectionClosed {
                session_id,
                attribute,
            } => json!({ "session_id": session_id, "attribute": attribute }),
        }
    }

    /// Returns a helpful suggestion for resolving the error.
    pub fn suggestion(&self) -> String {
        match self {
            SyncError::LockTimeout { .. } => {
                "Another request for this session held its lock too long. Retry the request, or raise CART_SYNC_LOCK_TIMEOUT_MS.".to_string()
            }
            SyncError::Store(_) => {
                "The session backend failed. Check its availability and retry.".to_string()
            }
            SyncError::TypeMismatch { attribute, .. } => format!(
                "Attribute '{}' is written with two different types; give each value type its own attribute name.",
                attribute
            ),
            SyncError::UncommittedUpdate { .. } => {
                "Call commit() with the modified value, or discard() to drop it on purpose, before the section closes.".to_string()
            }
            SyncError::SectionClosed { .. } => {
                "The outer update section was closed first. Commit before closing it, or open a new section.".to_string()
            }
        }
    }

    /// Returns whether this error is potentially transient and may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::LockTimeout { .. } | SyncError::Store(_)
        )
    }
}
