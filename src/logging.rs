//! Logging and tracing configuration
//!
//! The reader logs through the `tracing` crate and never installs a
//! subscriber on its own; applications call [`init`] (or [`init_verbose`])
//! once at startup.
//!
//! # Log Levels
//!
//! - `error` - Resource opens that failed and were swallowed
//! - `warn`  - Substituted data: unresolved map targets, region gaps, empty maps
//! - `info`  - Volume opens and resolver scans
//! - `debug` - Stream, map and index builds (default in debug builds)
//! - `trace` - Per-chunk addressing and segment reads
//!
//! # Environment Variable Control
//!
//! Set `RUST_LOG` to control log levels at runtime:
//! ```bash
//! RUST_LOG=aff4_reader=trace ./my-tool
//! RUST_LOG=aff4_reader::map=debug,aff4_reader::stream=warn ./my-tool
//! ```

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn default_filter() -> EnvFilter {
    if cfg!(feature = "debug-logging") {
        EnvFilter::new("aff4_reader=trace")
    } else if cfg!(debug_assertions) {
        EnvFilter::new("aff4_reader=debug")
    } else {
        EnvFilter::new("aff4_reader=info")
    }
}

/// Initialize the logging/tracing system
///
/// Honours `RUST_LOG`; repeated calls are ignored.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact(),
    );

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Initialize logging with file:line and thread ids
pub fn init_verbose() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trace"));

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .pretty(),
    );

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Check if debug logging is enabled
#[inline]
pub fn is_debug_enabled() -> bool {
    tracing::enabled!(Level::DEBUG)
}

#[inline]
pub fn is_trace_enabled() -> bool {
    tracing::enabled!(Level::TRACE)
}
