//! Per-request attribute cache and change flags.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::session_id::SessionId;
use crate::store::AttributeValue;

/// State owned by exactly one in-flight request.
///
/// The context is `Send` but deliberately not `Sync`: it moves with the request
/// to whichever worker thread serves it, but is never read by two threads at
/// once, so its cells need no locking. Last write within the request wins.
pub struct RequestContext {
    session_id: SessionId,
    attributes: RefCell<HashMap<String, AttributeValue>>,
    changed: RefCell<HashSet<String>>,
    new_session: bool,
}

impl RequestContext {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            attributes: RefCell::new(HashMap::new()),
            changed: RefCell::new(HashSet::new()),
            new_session: false,
        }
    }

    /// Context for an incoming request carrying the client's session id, if any.
    ///
    /// A missing or malformed id starts a new session under a generated id.
    pub fn resume(raw_session_id: Option<&str>) -> Self {
        let parsed = raw_session_id.map(SessionId::parse);
        match parsed {
            Some(Ok(session_id)) => Self::new(session_id),
            Some(Err(err)) => {
                let ctx = Self::fresh();
                debug!(error = %err, session_id = %ctx.session_id, "rejected client session id, starting new session");
                ctx
            }
            None => Self::fresh(),
        }
    }

    fn fresh() -> Self {
        Self {
            new_session: true,
            ..Self::new(SessionId::generate())
        }
    }

    /// Whether `resume` started a new session instead of joining the client's.
    pub fn is_new_session(&self) -> bool {
        self.new_session
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn attribute(&self, name: &str) -> Option<AttributeValue> {
        self.attributes.borrow().get(name).cloned()
    }

    pub fn set_attribute(&self, name: &str, value: AttributeValue) {
        self.attributes.borrow_mut().insert(name.to_string(), value);
    }

    pub fn remove_attribute(&self, name: &str) -> Option<AttributeValue> {
        self.attributes.borrow_mut().remove(name)
    }

    /// Record that the session value under `name` was replaced during this request.
    pub fn mark_changed(&self, name: &str) {
        self.changed.borrow_mut().insert(name.to_string());
    }

    pub fn is_changed(&self, name: &str) -> bool {
        self.changed.borrow().contains(name)
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.attributes.borrow().keys().cloned().collect();
        names.sort();
        f.debug_struct("RequestContext")
            .field("session_id", &self.session_id)
            .field("new_session", &self.new_session)
            .field("attributes", &names)
            .field("changed", &self.changed.borrow())
            .finish()
    }
}
