// Core modules shared by the hook, the backend, and the CLI.
pub mod error;
