//! Logging initialization for binaries and tests that embed the engine
//!
//! The library itself only emits through the `tracing` facade; hosts decide
//! where events go. This helper wires the common case: console output with
//! a `RUST_LOG` filter.

use tracing_subscriber::EnvFilter;

/// Initialize console logging, filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

/// Like [`init`] but with a caller-supplied default filter, for hosts that
/// want quieter or noisier output when `RUST_LOG` is unset.
pub fn init_with_default(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}
