//! # mcpparity-transport
//!
//! Stdio plumbing between the harness and a candidate server process.
//!
//! - [`spawn`]: launching a process with piped stdio and stopping it with a
//!   graceful signal followed by a forced kill
//! - [`framing`]: newline-delimited message framing in both directions
//!
//! Nothing here understands JSON-RPC beyond serializing outgoing values;
//! classification and correlation of incoming lines live in the client crate.

#![deny(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::unwrap_used)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod framing;
pub mod spawn;

pub use error::TransportError;
pub use framing::{LineFramer, LineReader, LineWriter, MAX_LINE_SIZE};
pub use spawn::{ExitOutcome, ProcessBuilder, ProcessHandle, ProcessStdio, SpawnedProcess};
