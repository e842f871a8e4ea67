//! Structured logging setup.
//!
//! Every nimbus binary calls [`init`] once at startup. It installs a
//! `tracing_subscriber` pipeline with an `EnvFilter` driven by
//! `NIMBUS_LOG` (falling back to `info`), human-readable output on a
//! terminal and JSON lines otherwise -- the same split the teacher
//! workspace's tracing setup makes between interactive and production
//! use.

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

const DEFAULT_FILTER: &str = "info";

/// Initializes the global tracing subscriber. Safe to call at most once
/// per process; a second call is a no-op other than logging a warning.
pub fn init(service: &str) {
    let filter =
        EnvFilter::try_from_env("NIMBUS_LOG").unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let is_tty = atty_like_stderr();
    let result = if is_tty {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .try_init()
    };

    if let Err(err) = result {
        eprintln!("{service}: tracing subscriber already initialized: {err}");
    }
}

/// A minimal stand-in for `atty::is(Stream::Stderr)` so this crate does
/// not need to pull in an extra dependency solely for that check.
fn atty_like_stderr() -> bool {
    use std::io::IsTerminal;
    std::io::stderr().is_terminal()
}

/// Test helper that installs a logger suitable for `cargo test` output,
/// swallowing the "already initialized" error when multiple tests in the
/// same binary call it.
pub fn init_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("debug"))
        .with(fmt::layer().with_test_writer())
        .try_init();
}
