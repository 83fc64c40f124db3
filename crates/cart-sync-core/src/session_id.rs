//! Session identifiers.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Longest id accepted from a client.
pub const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionIdError {
    #[error("Session id is empty")]
    Blank,

    #[error("Session id is {len} characters long, at most {MAX_SESSION_ID_LEN} are accepted")]
    TooLong { len: usize },

    #[error("Session id contains whitespace or control characters")]
    InvalidCharacter,
}

/// Opaque key of one user session.
///
/// Never reused for two live sessions at once. Session attributes, the
/// per-session lock and open update sections are all keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an id minted by this process. Ids from clients go through `parse`.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Validate an id presented by a client (cookie, header, URL parameter).
    pub fn parse(raw: &str) -> Result<Self, SessionIdError> {
        if raw.is_empty() {
            return Err(SessionIdError::Blank);
        }
        if raw.len() > MAX_SESSION_ID_LEN {
            return Err(SessionIdError::TooLong { len: raw.len() });
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(SessionIdError::InvalidCharacter);
        }
        Ok(Self(raw.to_string()))
    }

    /// A fresh random id for a session the client did not identify.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
