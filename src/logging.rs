//! Purpose: Install the process-wide `tracing` subscriber for the CLI.
//! Exports: `init_tracing`, `default_directive`.
//! Role: Diagnostics go to stderr so stdout stays the command's own output.
//! Invariants: `RUST_LOG` wins over `--debug`; without either only warnings show.

use std::io::{self, IsTerminal};

use tracing_subscriber::EnvFilter;

pub fn default_directive(debug: bool) -> &'static str {
    if debug { "debug" } else { "warn" }
}

pub fn init_tracing(debug: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(io::stderr().is_terminal())
        .with_writer(io::stderr)
        .try_init();
}
