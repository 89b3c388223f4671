//! # Logging Initialization
//!
//! Centralized setup for the `tracing` subscriber. Call
//! [`init_logging`] once at process start; repeated calls are no-ops thanks
//! to a `std::sync::Once`.
//!
//! ## Logging Configuration
//!
//! 1. **Environment Filter**: verbosity comes from `RUST_LOG` when set,
//!    otherwise from the `log_level` argument (with this crate raised to
//!    `debug`).
//! 2. **File Logging (default)**: with `log_to_file = true`, a daily rolling
//!    log file is written to the user cache directory via `tracing_appender`,
//!    with ANSI colors disabled.
//! 3. **Stderr Logging**: with `log_to_file = false`, or whenever the cache
//!    directory is unavailable, logs go to `stderr` with colors enabled.

use anyhow::Result;
use directories::ProjectDirs;
use std::{io::stderr, sync::Once};
use tracing_subscriber::{EnvFilter, fmt::layer, prelude::*};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    init_logging("trace", false).expect("Failed to initialize test logging");
}

/// Initializes the logging system.
///
/// Sets up a global tracing subscriber writing either to stderr or to a daily
/// rolling file in the project's cache directory.
///
/// # Errors
///
/// Currently infallible; the `Result` keeps the signature stable if directory
/// resolution ever needs to report failure.
pub fn init_logging(log_level: &str, log_to_file: bool) -> Result<()> {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},noutaja=debug")));

        if log_to_file {
            if let Some(proj_dirs) = ProjectDirs::from("fi", "Noutaja", "noutaja") {
                let log_dir = proj_dirs.cache_dir();
                let dir_created = std::fs::create_dir_all(log_dir).is_ok();

                // tracing_appender panics on an unwritable directory, so wrap
                // the construction and fall back to stderr.
                let file_appender_result = if dir_created {
                    std::panic::catch_unwind(|| {
                        tracing_appender::rolling::daily(log_dir, "noutaja.log")
                    })
                } else {
                    Err(Box::new("Failed to create log directory")
                        as Box<dyn std::any::Any + Send>)
                };

                match file_appender_result {
                    Ok(file_appender) => {
                        let (non_blocking, _guard) =
                            tracing_appender::non_blocking(file_appender);

                        tracing_subscriber::registry()
                            .with(env_filter)
                            .with(layer().with_writer(non_blocking).with_ansi(false))
                            .init();
                        // The guard is intentionally leaked so logs are
                        // flushed on exit.
                        Box::leak(Box::new(_guard));
                    }
                    Err(_) => {
                        tracing_subscriber::registry()
                            .with(env_filter)
                            .with(layer().with_writer(stderr).with_ansi(true))
                            .init();
                    }
                }
            } else {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer().with_writer(stderr).with_ansi(true))
                    .init();
            }
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer().with_writer(stderr).with_ansi(true))
                .init();
        }
    });

    Ok(())
}
