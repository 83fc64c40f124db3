//! Lock-guarded sections over one session's value.
//!
//! An `UpdateSection` is the only sanctioned way to read-modify-write a session
//! value: it locks the session, reads session storage (never the request
//! cache, which may predate another request's commit), hands out working
//! copies and writes back whatever the caller commits. A `SyncSection` only
//! holds the lock.
//!
//! Open update sections are tracked per thread, keyed by session and
//! attribute, so a nested open on the same thread joins the outer section and
//! `SessionValueManager::set` can route session writes through it.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::error::SyncError;
use crate::lock_registry::{LockHandle, SessionLockRegistry};
use crate::manager::SessionValueManager;
use crate::request::RequestContext;
use crate::scope::{ReadPolicy, Scopes};
use crate::session_id::SessionId;

type ActiveKey = (SessionId, String);

thread_local! {
    static ACTIVE_UPDATES: RefCell<HashMap<ActiveKey, Rc<dyn Any>>> = RefCell::new(HashMap::new());
}

struct UpdateState<V> {
    current: Option<Arc<V>>,
    copies_handed_out: usize,
    committed: bool,
    discarded: bool,
    /// Set by the outermost close; later commits through a joined section fail.
    closed: bool,
}

type SharedState<V> = Rc<RefCell<UpdateState<V>>>;

fn active_key(session_id: &SessionId, attribute: &str) -> ActiveKey {
    (session_id.clone(), attribute.to_string())
}

fn active_state<V: 'static>(session_id: &SessionId, attribute: &str) -> Option<SharedState<V>> {
    let key = active_key(session_id, attribute);
    ACTIVE_UPDATES
        .with(|active| active.borrow().get(&key).cloned())
        .and_then(|state| state.downcast::<RefCell<UpdateState<V>>>().ok())
}

fn register<V: 'static>(session_id: &SessionId, attribute: &str, state: &SharedState<V>) {
    let erased: Rc<dyn Any> = state.clone();
    ACTIVE_UPDATES.with(|active| {
        active
            .borrow_mut()
            .insert(active_key(session_id, attribute), erased);
    });
}

fn unregister<V: 'static>(session_id: &SessionId, attribute: &str, state: &SharedState<V>) {
    let key = active_key(session_id, attribute);
    ACTIVE_UPDATES.with(|active| {
        let mut active = active.borrow_mut();
        let ours = active
            .get(&key)
            .cloned()
            .and_then(|entry| entry.downcast::<RefCell<UpdateState<V>>>().ok())
            .is_some_and(|entry| Rc::ptr_eq(&entry, state));
        if ours {
            active.remove(&key);
        }
    });
}

/// Whether this thread has an update section open for the session and attribute.
pub fn has_active_update(session_id: &SessionId, attribute: &str) -> bool {
    let key = active_key(session_id, attribute);
    ACTIVE_UPDATES.with(|active| active.borrow().contains_key(&key))
}

/// Commit `value` through the update section this thread has open for the
/// manager's attribute, if any. `None` means no section is open.
pub(crate) fn commit_through_active<V: Clone + Send + Sync + 'static>(
    manager: &SessionValueManager<V>,
    ctx: &RequestContext,
    value: Option<Arc<V>>,
) -> Option<Result<(), SyncError>> {
    let state = active_state::<V>(ctx.session_id(), manager.attribute())?;
    trace!(session_id = %ctx.session_id(), attribute = manager.attribute(), "session write redirected into open update section");
    Some(commit_state(manager, ctx, &state, value))
}

fn commit_state<V: Clone + Send + Sync + 'static>(
    manager: &SessionValueManager<V>,
    ctx: &RequestContext,
    state: &SharedState<V>,
    value: Option<Arc<V>>,
) -> Result<(), SyncError> {
    if state.borrow().closed {
        return Err(SyncError::SectionClosed {
            session_id: ctx.session_id().to_string(),
            attribute: manager.attribute().to_string(),
        });
    }
    manager.write_scopes(ctx, value.clone(), Scopes::ALL)?;
    let mut state = state.borrow_mut();
    state.current = value;
    state.committed = true;
    Ok(())
}

/// Scoped read-modify-commit block over one session value.
///
/// Lifecycle: opened (lock held, working reference resolved) → zero or more
/// commits → closed (explicitly or on drop). Closing never commits.
///
/// # Hazard
/// Working copies are detached clones. Mutating one and letting the section
/// close without `commit` silently persists nothing. Enable
/// `SyncConfig::strict_commit` to have `close` report it.
pub struct UpdateSection<'a, V: Clone + Send + Sync + 'static> {
    manager: &'a SessionValueManager<V>,
    ctx: &'a RequestContext,
    state: SharedState<V>,
    lock: Option<LockHandle>,
    nested: bool,
    closed: bool,
}

impl<V: Clone + Send + Sync + 'static> std::fmt::Debug for UpdateSection<'_, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateSection")
            .field("nested", &self.nested)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl<'a, V: Clone + Send + Sync + 'static> UpdateSection<'a, V> {
    pub(crate) fn open(
        manager: &'a SessionValueManager<V>,
        ctx: &'a RequestContext,
    ) -> Result<Self, SyncError> {
        let session_id = ctx.session_id();
        if let Some(state) = active_state::<V>(session_id, manager.attribute()) {
            trace!(session_id = %session_id, attribute = manager.attribute(), "joined open update section");
            return Ok(Self {
                manager,
                ctx,
                state,
                lock: None,
                nested: true,
                closed: false,
            });
        }

        let lock = manager.locks().acquire(session_id)?;
        // A missing value is created in memory only; it reaches storage through commit.
        let current = match manager.get(ctx, ReadPolicy::SessionFirst, false, Scopes::ALL)? {
            Some(current) => current,
            None => Arc::new(manager.create_value(ctx)),
        };
        let state = Rc::new(RefCell::new(UpdateState {
            current: Some(current),
            copies_handed_out: 0,
            committed: false,
            discarded: false,
            closed: false,
        }));
        register(session_id, manager.attribute(), &state);
        trace!(session_id = %session_id, attribute = manager.attribute(), "update section opened");

        Ok(Self {
            manager,
            ctx,
            state,
            lock: Some(lock),
            nested: false,
            closed: false,
        })
    }

    pub fn session_id(&self) -> &SessionId {
        self.ctx.session_id()
    }

    /// Whether this section joined an outer section opened earlier on this thread.
    pub fn is_nested(&self) -> bool {
        self.nested
    }

    /// A private copy of the latest working value, for the caller to modify and commit.
    ///
    /// After the value was removed inside the section, a fresh one comes from the factory.
    pub fn get_for_update(&self) -> V {
        let mut state = self.state.borrow_mut();
        state.copies_handed_out += 1;
        match &state.current {
            Some(current) => V::clone(current),
            None => self.manager.create_value(self.ctx),
        }
    }

    /// The latest working value, read-only. `None` once removed inside the section.
    pub fn current(&self) -> Option<Arc<V>> {
        self.state.borrow().current.clone()
    }

    /// Store `value` in session and request scope and make it the working value.
    ///
    /// May be called any number of times; the last commit wins.
    pub fn commit(&self, value: V) -> Result<Arc<V>, SyncError> {
        let value = Arc::new(value);
        commit_state(self.manager, self.ctx, &self.state, Some(Arc::clone(&value)))?;
        Ok(value)
    }

    /// Record that handed-out copies are dropped on purpose.
    pub fn discard(&self) {
        self.state.borrow_mut().discarded = true;
    }

    pub fn is_committed(&self) -> bool {
        self.state.borrow().committed
    }

    /// Release the lock. Safe to call more than once.
    ///
    /// In strict mode, the outermost close reports copies that were handed out
    /// but neither committed nor discarded. The lock is released either way.
    pub fn close(&mut self) -> Result<(), SyncError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.nested {
            return Ok(());
        }

        let session_id = self.ctx.session_id();
        unregister(session_id, self.manager.attribute(), &self.state);
        let outcome = {
            let mut state = self.state.borrow_mut();
            state.closed = true;
            let abandoned = state.copies_handed_out > 0 && !state.committed && !state.discarded;
            if abandoned && self.manager.config().strict_commit {
                Err(SyncError::UncommittedUpdate {
                    session_id: session_id.to_string(),
                    attribute: self.manager.attribute().to_string(),
                })
            } else {
                Ok(())
            }
        };
        if let Some(mut lock) = self.lock.take() {
            lock.release();
        }
        trace!(session_id = %session_id, attribute = self.manager.attribute(), "update section closed");
        outcome
    }
}

impl<V: Clone + Send + Sync + 'static> Drop for UpdateSection<'_, V> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "update section dropped with uncommitted changes");
        }
    }
}

/// Scoped lock-only block for sequences that write through
/// `SessionValueManager::set` or the store directly.
#[derive(Debug)]
pub struct SyncSection {
    lock: LockHandle,
}

impl SyncSection {
    pub(crate) fn open(
        locks: &SessionLockRegistry,
        session_id: &SessionId,
    ) -> Result<Self, SyncError> {
        let lock = locks.acquire(session_id)?;
        Ok(Self { lock })
    }

    pub fn session_id(&self) -> &SessionId {
        self.lock.session_id()
    }

    pub fn is_open(&self) -> bool {
        self.lock.is_held()
    }

    /// Release the lock. Returns `false` if it was already released.
    pub fn close(&mut self) -> bool {
        self.lock.release()
    }
}
