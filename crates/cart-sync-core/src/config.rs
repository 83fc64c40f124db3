use std::env;
use std::time::Duration;

const DEFAULT_LOCK_PRUNE_THRESHOLD: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// `None` waits for the session lock without bound.
    pub lock_timeout: Option<Duration>,
    /// Report update sections that hand out a working copy but never commit or discard it.
    pub strict_commit: bool,
    /// Lock table size above which dormant per-session locks are swept.
    pub lock_prune_threshold: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lock_timeout: None,
            strict_commit: false,
            lock_prune_threshold: DEFAULT_LOCK_PRUNE_THRESHOLD,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            lock_timeout: lookup("CART_SYNC_LOCK_TIMEOUT_MS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            strict_commit: lookup("CART_SYNC_STRICT_COMMIT")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.strict_commit),
            lock_prune_threshold: lookup("CART_SYNC_LOCK_PRUNE_THRESHOLD")
                .and_then(|v| v.trim().parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.lock_prune_threshold),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn without_lock_timeout(mut self) -> Self {
        self.lock_timeout = None;
        self
    }

    pub fn with_strict_commit(mut self, strict: bool) -> Self {
        self.strict_commit = strict;
        self
    }

    pub fn with_lock_prune_threshold(mut self, threshold: usize) -> Self {
        self.lock_prune_threshold = threshold.max(1);
        self
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
