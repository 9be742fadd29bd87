//! The static inputs of a run: implementations and the tool test catalog.
//!
//! Everything here is plain data, loaded once and never mutated during a
//! run. Setup/cleanup hooks and custom predicates cannot be expressed in
//! JSON; they are attached in code with [`ToolTestCase::with_setup`],
//! [`ToolTestCase::with_cleanup`] and [`Expectation::with_predicate`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use mcpparity_core::HarnessError;
use mcpparity_transport::ProcessBuilder;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::expectation::ToolResponse;

const fn default_true() -> bool {
    true
}

const fn default_startup_timeout_ms() -> u64 {
    10_000
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

/// How to launch and judge one candidate server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationSpec {
    /// Unique identity used in results.
    pub id: String,
    /// Language tag, informational.
    #[serde(default)]
    pub language: String,
    /// Program to run.
    pub command: String,
    /// Program arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Environment overrides.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Bound on spawn plus handshake, in milliseconds.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    /// Per-request deadline override, in milliseconds.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    /// Disabled implementations are left out of the run entirely.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Tool categories this implementation claims to cover.
    #[serde(default)]
    pub expected_categories: Vec<String>,
    /// Number of tools this implementation claims to list.
    #[serde(default)]
    pub expected_tool_count: Option<usize>,
}

impl ImplementationSpec {
    /// Create an enabled implementation with default timeouts.
    #[must_use]
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            language: String::new(),
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            startup_timeout_ms: default_startup_timeout_ms(),
            request_timeout_ms: None,
            enabled: true,
            expected_categories: Vec::new(),
            expected_tool_count: None,
        }
    }

    /// Set the language tag.
    #[must_use]
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Add an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set the startup timeout.
    #[must_use]
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Override the per-request deadline.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Enable or disable the implementation.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Declare the categories this implementation covers.
    #[must_use]
    pub fn expected_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_categories = categories.into_iter().map(Into::into).collect();
        self
    }

    /// Declare how many tools this implementation lists.
    #[must_use]
    pub fn expected_tool_count(mut self, count: usize) -> Self {
        self.expected_tool_count = Some(count);
        self
    }

    /// The startup timeout as a duration.
    #[must_use]
    pub fn startup_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// The request deadline, falling back to `default`.
    #[must_use]
    pub fn request_timeout_or(&self, default: Duration) -> Duration {
        self.request_timeout_ms
            .map_or(default, Duration::from_millis)
    }

    /// Whether a tool discovery check should run.
    #[must_use]
    pub fn declares_discovery(&self) -> bool {
        self.expected_tool_count.is_some() || !self.expected_categories.is_empty()
    }

    /// The process launch description.
    #[must_use]
    pub fn process_builder(&self) -> ProcessBuilder {
        let builder = ProcessBuilder::new(&self.command)
            .args(&self.args)
            .envs(&self.env);
        match &self.cwd {
            Some(dir) => builder.working_dir(dir.clone()),
            None => builder,
        }
    }
}

/// Context handed to setup and cleanup hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookContext {
    /// The implementation under test.
    pub implementation: String,
    /// The tool being exercised.
    pub tool: String,
    /// The case name.
    pub case: String,
}

/// An asynchronous setup or cleanup step.
pub type Hook = Arc<dyn Fn(HookContext) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// A custom check over a tool response.
pub type Predicate = Arc<dyn Fn(&ToolResponse) -> Result<(), String> + Send + Sync>;

/// An assertion over one entry of a tool's content list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentAssertion {
    /// Position of the entry to check.
    #[serde(default)]
    pub index: usize,
    /// Required type tag.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Minimum body length, in characters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    /// Maximum body length, in characters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Regular expression the body must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_pattern: Option<String>,
    /// Required MIME type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ContentAssertion {
    /// Assert on the entry at `index`.
    #[must_use]
    pub fn at(index: usize) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    /// Require a type tag.
    #[must_use]
    pub fn content_type(mut self, kind: impl Into<String>) -> Self {
        self.content_type = Some(kind.into());
        self
    }

    /// Require a minimum body length.
    #[must_use]
    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    /// Require a maximum body length.
    #[must_use]
    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    /// Require the body to match a regular expression.
    #[must_use]
    pub fn text_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.text_pattern = Some(pattern.into());
        self
    }

    /// Require a MIME type.
    #[must_use]
    pub fn mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }
}

/// What a case expects the tool to do.
#[derive(Clone, Serialize, Deserialize)]
pub struct Expectation {
    /// Whether the call should succeed.
    #[serde(default = "default_true")]
    pub success: bool,
    /// Regular expression the error text must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_pattern: Option<String>,
    /// Per-entry content assertions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ContentAssertion>,
    /// Custom check, attached in code.
    #[serde(skip)]
    pub predicate: Option<Predicate>,
}

impl Default for Expectation {
    fn default() -> Self {
        Self::success()
    }
}

impl fmt::Debug for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expectation")
            .field("success", &self.success)
            .field("error_pattern", &self.error_pattern)
            .field("content", &self.content)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl Expectation {
    /// Expect the call to succeed.
    #[must_use]
    pub fn success() -> Self {
        Self {
            success: true,
            error_pattern: None,
            content: Vec::new(),
            predicate: None,
        }
    }

    /// Expect the call to fail.
    #[must_use]
    pub fn failure() -> Self {
        Self {
            success: false,
            ..Self::success()
        }
    }

    /// Require the error text to match a regular expression.
    #[must_use]
    pub fn error_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.error_pattern = Some(pattern.into());
        self
    }

    /// Add a content assertion.
    #[must_use]
    pub fn content(mut self, assertion: ContentAssertion) -> Self {
        self.content.push(assertion);
        self
    }

    /// Attach a custom predicate.
    #[must_use]
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ToolResponse) -> Result<(), String> + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    fn patterns(&self) -> impl Iterator<Item = &str> {
        self.error_pattern
            .as_deref()
            .into_iter()
            .chain(self.content.iter().filter_map(|c| c.text_pattern.as_deref()))
    }
}

/// One invocation of a tool and its expected outcome.
#[derive(Clone, Serialize, Deserialize)]
pub struct ToolTestCase {
    /// Case name, unique within its tool spec.
    pub name: String,
    /// Tool arguments.
    #[serde(default = "empty_object")]
    pub input: Value,
    /// The expected outcome.
    #[serde(default)]
    pub expect: Expectation,
    /// Implementations this case is skipped for.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip: Vec<String>,
    /// When set, the only implementations this case runs for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only: Option<Vec<String>>,
    /// Runs before the call.
    #[serde(skip)]
    pub setup: Option<Hook>,
    /// Runs after the call, whatever happened.
    #[serde(skip)]
    pub cleanup: Option<Hook>,
}

impl fmt::Debug for ToolTestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolTestCase")
            .field("name", &self.name)
            .field("input", &self.input)
            .field("expect", &self.expect)
            .field("skip", &self.skip)
            .field("only", &self.only)
            .field("setup", &self.setup.as_ref().map(|_| "<fn>"))
            .field("cleanup", &self.cleanup.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl ToolTestCase {
    /// Create a case expecting success.
    #[must_use]
    pub fn new(name: impl Into<String>, input: Value) -> Self {
        Self {
            name: name.into(),
            input,
            expect: Expectation::success(),
            skip: Vec::new(),
            only: None,
            setup: None,
            cleanup: None,
        }
    }

    /// Set the expectation.
    #[must_use]
    pub fn expect(mut self, expect: Expectation) -> Self {
        self.expect = expect;
        self
    }

    /// Skip this case for an implementation.
    #[must_use]
    pub fn skip_for(mut self, implementation: impl Into<String>) -> Self {
        self.skip.push(implementation.into());
        self
    }

    /// Restrict this case to an implementation (repeatable).
    #[must_use]
    pub fn only_for(mut self, implementation: impl Into<String>) -> Self {
        self.only
            .get_or_insert_with(Vec::new)
            .push(implementation.into());
        self
    }

    /// Attach a setup hook.
    #[must_use]
    pub fn with_setup<F>(mut self, hook: F) -> Self
    where
        F: Fn(HookContext) -> BoxFuture<'static, Result<(), String>> + Send + Sync + 'static,
    {
        self.setup = Some(Arc::new(hook));
        self
    }

    /// Attach a cleanup hook.
    #[must_use]
    pub fn with_cleanup<F>(mut self, hook: F) -> Self
    where
        F: Fn(HookContext) -> BoxFuture<'static, Result<(), String>> + Send + Sync + 'static,
    {
        self.cleanup = Some(Arc::new(hook));
        self
    }

    /// Whether this case runs for `implementation`.
    #[must_use]
    pub fn applies_to(&self, implementation: &str) -> bool {
        if self.skip.iter().any(|id| id == implementation) {
            return false;
        }
        self.only
            .as_ref()
            .is_none_or(|only| only.iter().any(|id| id == implementation))
    }
}

/// A tool and the cases that exercise it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolTestSpec {
    /// Tool name as listed by the server.
    pub name: String,
    /// Category used in rollups.
    pub category: String,
    /// Cases, run in order of declaration.
    #[serde(default)]
    pub cases: Vec<ToolTestCase>,
}

impl ToolTestSpec {
    /// Create a spec without cases.
    #[must_use]
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            cases: Vec::new(),
        }
    }

    /// Add a case.
    #[must_use]
    pub fn case(mut self, case: ToolTestCase) -> Self {
        self.cases.push(case);
        self
    }
}

/// Check that every regular expression in the catalog compiles.
pub fn validate_catalog(catalog: &[ToolTestSpec]) -> Result<(), HarnessError> {
    for spec in catalog {
        for case in &spec.cases {
            for pattern in case.expect.patterns() {
                Regex::new(pattern).map_err(|e| {
                    HarnessError::config(format!(
                        "{}/{}: invalid pattern {pattern:?}: {e}",
                        spec.name, case.name
                    ))
                })?;
            }
        }
    }
    Ok(())
}
