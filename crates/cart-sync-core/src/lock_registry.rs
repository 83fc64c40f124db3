//! Named mutual-exclusion locks, one per session.
//!
//! The table only holds weak references. A lock stays alive exactly as long as
//! some `LockHandle` (or a thread about to wait on it) holds the strong `Arc`,
//! so dormant sessions cost one dead table slot until the next sweep.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use cart_sync_common::mutex_lock_or_recover;
use lock_api::ArcReentrantMutexGuard;
use parking_lot::{RawMutex, RawThreadId, ReentrantMutex};
use tracing::{debug, trace, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::session_id::SessionId;

pub const INITIAL_BACKOFF: Duration = Duration::from_micros(100);
pub const MAX_BACKOFF: Duration = Duration::from_millis(50);

type SessionMutex = ReentrantMutex<()>;
type SessionGuard = ArcReentrantMutexGuard<RawMutex, RawThreadId, ()>;

/// Registry of per-session locks.
///
/// Locks are reentrant: a thread already holding a session's lock may acquire
/// it again (a nested section) without deadlocking. Distinct sessions never
/// contend with each other beyond the brief table lookup.
pub struct SessionLockRegistry {
    locks: Mutex<HashMap<SessionId, Weak<SessionMutex>>>,
    timeout: Option<Duration>,
    prune_threshold: usize,
}

impl SessionLockRegistry {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            timeout: config.lock_timeout,
            prune_threshold: config.lock_prune_threshold.max(1),
        }
    }

    /// Block until the calling thread holds the lock of `session_id`.
    ///
    /// Without a configured timeout this waits indefinitely. With one, it polls
    /// with exponential backoff and gives up with `SyncError::LockTimeout`.
    pub fn acquire(&self, session_id: &SessionId) -> Result<LockHandle, SyncError> {
        let mutex = self.lock_for(session_id);
        let guard = match self.timeout {
            None => mutex.lock_arc(),
            Some(timeout) => match acquire_with_backoff(&mutex, timeout) {
                Some(guard) => guard,
                None => {
                    warn!(session_id = %session_id, timeout_ms = timeout.as_millis() as u64, "session lock timeout");
                    return Err(SyncError::LockTimeout {
                        session_id: session_id.to_string(),
                        waited: timeout,
                    });
                }
            },
        };
        trace!(session_id = %session_id, "session lock acquired");
        Ok(LockHandle {
            session_id: session_id.clone(),
            guard: Some(guard),
        })
    }

    /// Whether any thread currently holds the lock of `session_id`.
    pub fn is_locked(&self, session_id: &SessionId) -> bool {
        mutex_lock_or_recover(&self.locks, "session_locks")
            .get(session_id)
            .and_then(Weak::upgrade)
            .is_some_and(|mutex| mutex.is_locked())
    }

    /// Number of locks still referenced by a holder or waiter.
    pub fn live_lock_count(&self) -> usize {
        mutex_lock_or_recover(&self.locks, "session_locks")
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Number of table slots, dead ones included.
    pub fn table_len(&self) -> usize {
        mutex_lock_or_recover(&self.locks, "session_locks").len()
    }

    /// Drop table slots whose lock is no longer referenced; returns how many.
    pub fn prune(&self) -> usize {
        let mut locks = mutex_lock_or_recover(&self.locks, "session_locks");
        prune_dead(&mut locks)
    }

    fn lock_for(&self, session_id: &SessionId) -> Arc<SessionMutex> {
        let mut locks = mutex_lock_or_recover(&self.locks, "session_locks");
        if let Some(existing) = locks.get(session_id).and_then(Weak::upgrade) {
            return existing;
        }
        if locks.len() >= self.prune_threshold {
            let pruned = prune_dead(&mut locks);
            debug!(pruned, remaining = locks.len(), "swept dormant session locks");
        }
        let mutex = Arc::new(ReentrantMutex::new(()));
        locks.insert(session_id.clone(), Arc::downgrade(&mutex));
        mutex
    }
}

impl Default for SessionLockRegistry {
    fn default() -> Self {
        Self::new(&SyncConfig::default())
    }
}

fn prune_dead(locks: &mut HashMap<SessionId, Weak<SessionMutex>>) -> usize {
    let before = locks.len();
    locks.retain(|_, weak| weak.strong_count() > 0);
    before - locks.len()
}

/// Spread waiters of the same session apart so they do not retry in lockstep.
fn compute_jitter(backoff_micros: u64) -> u64 {
    let jitter_range = backoff_micros / 4;
    if jitter_range == 0 {
        return 0;
    }
    let mut hasher = DefaultHasher::new();
    thread::current().id().hash(&mut hasher);
    (hasher.finish() ^ backoff_micros) % jitter_range
}

fn acquire_with_backoff(mutex: &Arc<SessionMutex>, timeout: Duration) -> Option<SessionGuard> {
    let start = Instant::now();
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if let Some(guard) = mutex.try_lock_arc() {
            return Some(guard);
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return None;
        }
        let jitter = compute_jitter(backoff.as_micros() as u64);
        let sleep = (backoff + Duration::from_micros(jitter)).min(timeout - elapsed);
        thread::sleep(sleep);
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

/// Proof that the current thread holds one level of a session lock.
///
/// Tied to the acquiring thread. Releasing is idempotent and also happens on drop,
/// so every exit path of a section gives the lock back exactly once.
pub struct LockHandle {
    session_id: SessionId,
    guard: Option<SessionGuard>,
}

impl LockHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn is_held(&self) -> bool {
        self.guard.is_some()
    }

    /// Give the lock back. Returns `false` if it was already released.
    pub fn release(&mut self) -> bool {
        match self.guard.take() {
            Some(guard) => {
                drop(guard);
                trace!(session_id = %self.session_id, "session lock released");
                true
            }
            None => false,
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("session_id", &self.session_id)
            .field("held", &self.is_held())
            .finish()
    }
}
