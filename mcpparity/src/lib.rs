//! # mcpparity
//!
//! A conformance and parity harness for Model Context Protocol servers.
//!
//! The harness spawns candidate server processes, drives each one through
//! the MCP handshake and a declarative catalog of tool calls, and produces
//! pass/fail results that can be compared across implementations.
//!
//! ## Crate Organization
//!
//! - [`mcpparity_core`]: envelopes, message builder, response validator and
//!   the error taxonomy
//! - [`mcpparity_transport`]: line framing and child process control
//! - [`mcpparity_client`]: the per-process supervisor and its registry
//! - [`mcpparity_runner`]: catalog, scheduler and result model
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mcpparity::prelude::*;
//!
//! # async fn example() -> Result<(), HarnessError> {
//! let config = HarnessConfig::from_path("parity.json")?;
//! let suite = TestRunner::from_config(config).run().await;
//! assert!(suite.is_consistent());
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]

pub use mcpparity_core::*;

pub use mcpparity_transport::{ProcessBuilder, ProcessHandle, TransportError};

pub use mcpparity_client::{
    ServerSupervisor, SessionEvent, SessionState, SupervisorConfig, SupervisorSet,
};

pub use mcpparity_runner::{
    ContentAssertion, Counts, DiscoveryReport, Expectation, HarnessConfig, HookContext,
    ImplementationSpec, ImplementationSummary, Outcome, RunnerConfig, TestResult, TestRunner,
    TestSuiteResult, ToolResponse, ToolTestCase, ToolTestSpec,
};

/// The types most programs need.
pub mod prelude {
    pub use mcpparity_client::{ServerSupervisor, SessionState, SupervisorConfig, SupervisorSet};
    pub use mcpparity_core::{ErrorKind, HarnessError};
    pub use mcpparity_runner::{
        ContentAssertion, Expectation, HarnessConfig, ImplementationSpec, Outcome, RunnerConfig,
        TestRunner, TestSuiteResult, ToolTestCase, ToolTestSpec,
    };
}
