//! Session attribute storage.
//!
//! The store is the authoritative home of every session value. It knows
//! nothing about locking: callers that read, modify and write back must do so
//! inside a section (see `crate::section`).

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use cart_sync_common::{rwlock_read_or_recover, rwlock_write_or_recover};
use tracing::debug;

use crate::error::StoreError;
use crate::session_id::SessionId;

/// Type-erased attribute value, shared between session and request scope.
pub type AttributeValue = Arc<dyn Any + Send + Sync>;

/// Recover the typed value behind an attribute.
///
/// Returns the untouched attribute back when it holds some other type.
pub fn downcast_attribute<V: Any + Send + Sync>(
    value: AttributeValue,
) -> Result<Arc<V>, AttributeValue> {
    value.downcast::<V>()
}

/// Key/value storage of session attributes.
pub trait SessionStore: Send + Sync {
    /// Get one attribute of a session, `None` when unset or the session is unknown.
    fn get_attribute(
        &self,
        session_id: &SessionId,
        name: &str,
    ) -> Result<Option<AttributeValue>, StoreError>;

    /// Set one attribute, creating the session on first write.
    fn set_attribute(
        &self,
        session_id: &SessionId,
        name: &str,
        value: AttributeValue,
    ) -> Result<(), StoreError>;

    /// Remove one attribute, returning the previous value.
    fn remove_attribute(
        &self,
        session_id: &SessionId,
        name: &str,
    ) -> Result<Option<AttributeValue>, StoreError>;

    /// Drop every attribute of a session.
    fn invalidate(&self, session_id: &SessionId) -> Result<(), StoreError>;
}

/// Process-local session storage.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, HashMap<String, AttributeValue>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions holding at least one attribute.
    pub fn session_count(&self) -> usize {
        rwlock_read_or_recover(&self.sessions, "sessions")
            .values()
            .filter(|attrs| !attrs.is_empty())
            .count()
    }

    /// Sorted attribute names of one session.
    pub fn attribute_names(&self, session_id: &SessionId) -> Vec<String> {
        let sessions = rwlock_read_or_recover(&self.sessions, "sessions");
        let mut names: Vec<String> = sessions
            .get(session_id)
            .map(|attrs| attrs.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl SessionStore for InMemorySessionStore {
    fn get_attribute(
        &self,
        session_id: &SessionId,
        name: &str,
    ) -> Result<Option<AttributeValue>, StoreError> {
        let sessions = rwlock_read_or_recover(&self.sessions, "sessions");
        Ok(sessions
            .get(session_id)
            .and_then(|attrs| attrs.get(name))
            .cloned())
    }

    fn set_attribute(
        &self,
        session_id: &SessionId,
        name: &str,
        value: AttributeValue,
    ) -> Result<(), StoreError> {
        let mut sessions = rwlock_write_or_recover(&self.sessions, "sessions");
        sessions
            .entry(session_id.clone())
            .or_default()
            .insert(name.to_string(), value);
        Ok(())
    }

    fn remove_attribute(
        &self,
        session_id: &SessionId,
        name: &str,
    ) -> Result<Option<AttributeValue>, StoreError> {
        let mut sessions = rwlock_write_or_recover(&self.sessions, "sessions");
        let previous = sessions
            .get_mut(session_id)
            .and_then(|attrs| attrs.remove(name));
        if sessions.get(session_id).is_some_and(|attrs| attrs.is_empty()) {
            sessions.remove(session_id);
        }
        Ok(previous)
    }

    fn invalidate(&self, session_id: &SessionId) -> Result<(), StoreError> {
        let removed = rwlock_write_or_recover(&self.sessions, "sessions").remove(session_id);
        debug!(
            session_id = %session_id,
            attributes = removed.as_ref().map_or(0, |attrs| attrs.len()),
            "session invalidated"
        );
        Ok(())
    }
}
