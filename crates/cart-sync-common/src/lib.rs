#![deny(clippy::all)]

mod sync;
mod telemetry;

pub use sync::mutex_lock_or_recover;
pub use sync::poison_recovery_count;
pub use sync::rwlock_read_or_recover;
pub use sync::rwlock_write_or_recover;
pub use telemetry::LOG_FILE_ENV;
pub use telemetry::TelemetryGuard;
pub use telemetry::default_directives;
pub use telemetry::init_tracing;
