//! collab-bridge library: Exposes the bridge components for testing.
//!
//! The binary wires these together: configuration, the backend subprocess
//! and the line console that drives the in-memory editor.

pub mod backend;
pub mod config;
pub mod console;

// Re-export key types for convenience
pub use backend::{Backend, BackendError, ConnectionState};
pub use config::{Args, BackendConfig, DEFAULT_PORT};
pub use console::{ConsoleCommand, ConsoleError, Flow};
