//! Lock helpers that survive poisoning.
//!
//! A panic inside a cart handler must not wedge every later request for the
//! process, so the shared tables recover the inner data and keep going. Each
//! recovery is counted and logged against the table that was poisoned.

use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::error;

static POISON_RECOVERY_COUNT: AtomicU64 = AtomicU64::new(0);

/// Number of poisoned locks recovered since process start.
pub fn poison_recovery_count() -> u64 {
    POISON_RECOVERY_COUNT.load(Ordering::Relaxed)
}

fn record_poison_recovery(table: &str, mode: &str) {
    POISON_RECOVERY_COUNT.fetch_add(1, Ordering::Relaxed);
    error!(
        table,
        mode, "lock poisoned by a panicking holder; recovering possibly inconsistent data"
    );
}

pub fn rwlock_read_or_recover<'a, T>(lock: &'a RwLock<T>, table: &str) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|poisoned| {
        record_poison_recovery(table, "read");
        poisoned.into_inner()
    })
}

pub fn rwlock_write_or_recover<'a, T>(
    lock: &'a RwLock<T>,
    table: &str,
) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| {
        record_poison_recovery(table, "write");
        poisoned.into_inner()
    })
}

pub fn mutex_lock_or_recover<'a, T>(lock: &'a Mutex<T>, table: &str) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        record_poison_recovery(table, "lock");
        poisoned.into_inner()
    })
}
