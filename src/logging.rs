//! Asynchronous, buffered logging: writes never block the decision loop.
//! `tracing-appender`'s non-blocking writer backs stdout here; the returned
//! guard must be held for the process lifetime or buffered lines are lost
//! on exit.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber. Returns a guard that flushes
/// the non-blocking writer on drop — hold it in `main` until shutdown.
pub fn init() -> WorkerGuard {
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_target(true)
        .init();

    guard
}
