use std::io::IsTerminal;
use std::path::PathBuf;

use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::sync::poison_recovery_count;

/// Environment variable naming a file to append logs to instead of stderr.
pub const LOG_FILE_ENV: &str = "CART_SYNC_LOG";

/// Crates whose events follow the level passed to `init_tracing`.
const CART_SYNC_TARGETS: [&str; 3] = ["cart_sync_common", "cart_sync_core", "cart_sync_cart"];

/// Keeps the non-blocking file writer flushing until dropped.
///
/// Dropping an active guard reports how many poisoned session tables were
/// recovered during the run.
#[derive(Debug)]
pub struct TelemetryGuard {
    worker: Option<WorkerGuard>,
    installed: bool,
}

impl TelemetryGuard {
    fn disabled() -> Self {
        Self {
            worker: None,
            installed: false,
        }
    }

    /// Whether this call installed the global subscriber.
    pub fn is_active(&self) -> bool {
        self.installed
    }

    pub fn writes_to_file(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        let recovered = poison_recovery_count();
        if self.installed && recovered > 0 {
            warn!(recovered, "session tables were recovered from poisoned locks during this run");
        }
    }
}

/// Filter directives: `level` for the cart-sync crates, `warn` for everything else.
pub fn default_directives(level: &str) -> String {
    let mut directives: Vec<String> = CART_SYNC_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect();
    directives.push("warn".to_string());
    directives.join(",")
}

/// Installs the global fmt subscriber.
///
/// `RUST_LOG` overrides `default_directives(default_level)`. Handler spans are
/// reported when they close, so lock waits show up in their timings. Calling
/// this twice is harmless: the second call leaves the first subscriber in place
/// and returns a disabled guard.
pub fn init_tracing(default_level: &str) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(default_level)));

    let (writer, guard) = match log_file_path_from_env() {
        Some(path) => match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
        {
            Ok(file) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(file);
                (BoxMakeWriter::new(non_blocking), Some(guard))
            }
            Err(err) => {
                eprintln!(
                    "Warning: failed to open log file {}: {}",
                    path.display(),
                    err
                );
                (BoxMakeWriter::new(std::io::stderr), None)
            }
        },
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(writer);

    if subscriber.try_init().is_err() {
        return TelemetryGuard::disabled();
    }

    TelemetryGuard {
        worker: guard,
        installed: true,
    }
}

fn log_file_path_from_env() -> Option<PathBuf> {
    std::env::var(LOG_FILE_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}
