//! # mcpparity-client
//!
//! Supervision of candidate MCP server processes.
//!
//! - [`ServerSupervisor`]: one process end to end, from spawn through
//!   handshake and correlated requests to graceful-then-forced shutdown
//! - [`SupervisorSet`]: the active sessions of a run, with a concurrent
//!   best-effort [`stop_all`](SupervisorSet::stop_all)
//! - [`SessionState`] / [`SessionEvent`]: the lifecycle state machine and
//!   what can be observed about it
//!
//! A session's stdin and stdout belong to its supervisor alone. Everything
//! else talks to the server through the supervisor's request operations.

#![deny(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::unwrap_used)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod set;
pub mod state;
pub mod supervisor;

pub use config::SupervisorConfig;
pub use set::SupervisorSet;
pub use state::{SessionEvent, SessionState};
pub use supervisor::ServerSupervisor;
