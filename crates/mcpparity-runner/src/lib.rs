//! # mcpparity-runner
//!
//! Runs a declarative tool test catalog against candidate MCP servers and
//! collects comparable results.
//!
//! - [`catalog`]: implementations, tool specs, cases and expectations
//! - [`config`]: scheduling bounds, filters and file loading
//! - [`expectation`]: how a tool response is judged
//! - [`runner`]: the two-level bounded scheduler
//! - [`result`]: per-case records and the rolled-up suite result
//!
//! # Example
//!
//! ```rust,no_run
//! use mcpparity_runner::{
//!     ContentAssertion, Expectation, ImplementationSpec, RunnerConfig, TestRunner, ToolTestCase,
//!     ToolTestSpec,
//! };
//! use serde_json::json;
//!
//! # async fn example() {
//! let runner = TestRunner::new(RunnerConfig::new().max_concurrent_cases(2))
//!     .implementation(ImplementationSpec::new("ts", "node").arg("dist/server.js"))
//!     .tool_spec(
//!         ToolTestSpec::new("echo", "basic").case(
//!             ToolTestCase::new("hello", json!({"text": "Hello, World!"})).expect(
//!                 Expectation::success()
//!                     .content(ContentAssertion::at(0).content_type("text").text_pattern("Hello")),
//!             ),
//!         ),
//!     );
//!
//! let suite = runner.run().await;
//! println!("{} passed, {} failed", suite.totals.passed, suite.totals.failed);
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::unwrap_used)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod config;
pub mod expectation;
pub mod result;
pub mod runner;

pub use catalog::{
    ContentAssertion, Expectation, Hook, HookContext, ImplementationSpec, Predicate, ToolTestCase,
    ToolTestSpec, validate_catalog,
};
pub use config::{HarnessConfig, RunnerConfig};
pub use expectation::ToolResponse;
pub use result::{
    CaseKey, Counts, DiscoveryReport, ImplementationSummary, Outcome, TestResult, TestSuiteResult,
};
pub use runner::{TestRunner, run_case};
