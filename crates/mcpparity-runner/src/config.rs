//! Runner and harness configuration.

use std::path::Path;
use std::time::Duration;

use mcpparity_client::SupervisorConfig;
use mcpparity_client::config::{DEFAULT_REQUEST_TIMEOUT, DEFAULT_SHUTDOWN_GRACE};
use mcpparity_core::HarnessError;
use serde::{Deserialize, Serialize};

use crate::catalog::{ImplementationSpec, ToolTestSpec, validate_catalog};

/// Default number of implementations exercised at once.
pub const DEFAULT_MAX_CONCURRENT_IMPLEMENTATIONS: usize = 2;

/// Default number of cases run at once within one implementation.
pub const DEFAULT_MAX_CONCURRENT_CASES: usize = 4;

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

fn default_max_implementations() -> usize {
    DEFAULT_MAX_CONCURRENT_IMPLEMENTATIONS
}

fn default_max_cases() -> usize {
    DEFAULT_MAX_CONCURRENT_CASES
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_shutdown_grace() -> Duration {
    DEFAULT_SHUTDOWN_GRACE
}

/// Scheduling configuration for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Implementations started and exercised at once.
    #[serde(default = "default_max_implementations")]
    pub max_concurrent_implementations: usize,
    /// Cases in flight at once within one implementation.
    #[serde(default = "default_max_cases")]
    pub max_concurrent_cases: usize,
    /// Default per-request deadline.
    #[serde(rename = "request_timeout_ms", with = "millis", default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// Grace period between the termination signal and a forced kill.
    #[serde(rename = "shutdown_grace_ms", with = "millis", default = "default_shutdown_grace")]
    pub shutdown_grace: Duration,
    /// When set, only these implementation ids run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation_filter: Option<Vec<String>>,
    /// When set, only tool specs in these categories run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_filter: Option<Vec<String>>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_implementations: DEFAULT_MAX_CONCURRENT_IMPLEMENTATIONS,
            max_concurrent_cases: DEFAULT_MAX_CONCURRENT_CASES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            implementation_filter: None,
            category_filter: None,
        }
    }
}

impl RunnerConfig {
    /// Create a new runner configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the implementation concurrency bound. Zero is treated as one.
    #[must_use]
    pub fn max_concurrent_implementations(mut self, max: usize) -> Self {
        self.max_concurrent_implementations = max.max(1);
        self
    }

    /// Set the per-implementation case concurrency bound. Zero is treated as one.
    #[must_use]
    pub fn max_concurrent_cases(mut self, max: usize) -> Self {
        self.max_concurrent_cases = max.max(1);
        self
    }

    /// Set the default per-request deadline.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the shutdown grace period.
    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Run only the given implementations.
    #[must_use]
    pub fn only_implementations<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.implementation_filter = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Run only tool specs in the given categories.
    #[must_use]
    pub fn only_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.category_filter = Some(categories.into_iter().map(Into::into).collect());
        self
    }

    /// The effective implementation bound.
    #[must_use]
    pub fn implementation_permits(&self) -> usize {
        self.max_concurrent_implementations.max(1)
    }

    /// The effective case bound.
    #[must_use]
    pub fn case_permits(&self) -> usize {
        self.max_concurrent_cases.max(1)
    }

    /// Whether an implementation passes the implementation filter.
    #[must_use]
    pub fn selects_implementation(&self, id: &str) -> bool {
        self.implementation_filter
            .as_ref()
            .is_none_or(|ids| ids.iter().any(|i| i == id))
    }

    /// Whether a category passes the category filter.
    #[must_use]
    pub fn selects_category(&self, category: &str) -> bool {
        self.category_filter
            .as_ref()
            .is_none_or(|cats| cats.iter().any(|c| c == category))
    }

    /// The supervisor configuration for one implementation.
    #[must_use]
    pub fn supervisor_config(&self, spec: &ImplementationSpec) -> SupervisorConfig {
        SupervisorConfig::new()
            .request_timeout(spec.request_timeout_or(self.request_timeout))
            .startup_timeout(spec.startup_timeout_duration())
            .shutdown_grace(self.shutdown_grace)
            .client_info("mcpparity", env!("CARGO_PKG_VERSION"))
    }
}

/// Everything a run needs, as loaded from a configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Scheduling configuration.
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Candidate servers.
    #[serde(default)]
    pub implementations: Vec<ImplementationSpec>,
    /// Tool test catalog.
    #[serde(default)]
    pub catalog: Vec<ToolTestSpec>,
}

impl HarnessConfig {
    /// Load and validate a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, HarnessError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| HarnessError::Config {
            message: format!("cannot read {}: {e}", path.display()),
            source: Some(Box::new(e)),
        })?;
        Self::from_json(&text).map_err(|e| match e {
            HarnessError::Config { message, source } => HarnessError::Config {
                message: format!("{}: {message}", path.display()),
                source,
            },
            other => other,
        })
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self, HarnessError> {
        let config: Self = serde_json::from_str(text).map_err(|e| HarnessError::Config {
            message: e.to_string(),
            source: Some(Box::new(e)),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check for duplicate ids and invalid patterns.
    pub fn validate(&self) -> Result<(), HarnessError> {
        let mut seen = std::collections::HashSet::new();
        for spec in &self.implementations {
            if spec.id.is_empty() {
                return Err(HarnessError::config("implementation with empty id"));
            }
            if !seen.insert(spec.id.as_str()) {
                return Err(HarnessError::config(format!(
                    "duplicate implementation id '{}'",
                    spec.id
                )));
            }
            if spec.command.is_empty() {
                return Err(HarnessError::config(format!(
                    "implementation '{}' has an empty command",
                    spec.id
                )));
            }
        }

        for tool in &self.catalog {
            let mut cases = std::collections::HashSet::new();
            for case in &tool.cases {
                if !cases.insert(case.name.as_str()) {
                    return Err(HarnessError::config(format!(
                        "duplicate case '{}' for tool '{}'",
                        case.name, tool.name
                    )));
                }
            }
        }

        validate_catalog(&self.catalog)
    }
}
