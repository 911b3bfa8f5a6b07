//! Skyport remote execution helper
//!
//! Runs commands on the remote endpoint over SSH, polls for reachability and
//! manages the per-tunnel state directory that makes `skyport ssh` and
//! `skyport ip` work from a separate process.

pub mod error;
pub mod shell;
pub mod state_dir;
pub mod wait;

pub use error::RemoteError;
pub use shell::{RemoteExec, RemoteShell};
pub use state_dir::{EndpointRecord, StateDir};
pub use wait::{wait_for_port, BOOT_POLL_INTERVAL};
