//! Purpose: Library crate backing the `redispatch` CLI and its tests.
//! Exports: the init hook (`redispatch`), its inputs, the backend contract, config, logging.
//! Role: Keeps the redispatch decision free of process exits and ambient globals.
//! Invariants: Library code never calls `std::process::exit`.
//! Invariants: Modules prefer explicit inputs/outputs over hidden state.
pub mod annotations;
pub mod backend;
pub mod config;
pub mod core;
pub mod descriptor;
pub mod invocation;
pub mod logging;
pub mod redispatch;

pub use crate::core::error::{Error, ErrorKind, to_exit_code};
