//! The result model.
//!
//! The runner is the only writer. Every [`TestResult`] is folded into three
//! levels of [`Counts`] at once (global, per implementation, per category),
//! so the levels always agree.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mcpparity_core::{ErrorKind, HarnessError};
use serde::{Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// The outcome of one case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Every declared check held.
    Pass,
    /// A check failed or the attempt raised an error.
    Fail,
    /// The case was not attempted for this implementation.
    Skip,
}

/// The record of one (implementation, category, tool, case).
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    /// Implementation id.
    pub implementation: String,
    /// Tool category.
    pub category: String,
    /// Tool name.
    pub tool: String,
    /// Case name.
    pub case: String,
    /// The outcome.
    pub outcome: Outcome,
    /// Wall-clock time spent on the case.
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    /// Failure message, captured verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Classification of the failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// The raw response, for diagnostics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

/// Identifies a case within the matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseKey {
    /// Implementation id.
    pub implementation: String,
    /// Tool category.
    pub category: String,
    /// Tool name.
    pub tool: String,
    /// Case name.
    pub case: String,
}

impl TestResult {
    fn new(key: CaseKey, outcome: Outcome, duration: Duration) -> Self {
        Self {
            implementation: key.implementation,
            category: key.category,
            tool: key.tool,
            case: key.case,
            outcome,
            duration,
            error: None,
            error_kind: None,
            response: None,
        }
    }

    /// A passing result.
    #[must_use]
    pub fn pass(key: CaseKey, duration: Duration, response: Option<Value>) -> Self {
        Self {
            response,
            ..Self::new(key, Outcome::Pass, duration)
        }
    }

    /// A failing result carrying the error's message verbatim.
    #[must_use]
    pub fn fail(key: CaseKey, duration: Duration, error: &HarnessError, response: Option<Value>) -> Self {
        Self {
            error: Some(error.failure_message()),
            error_kind: Some(error.kind()),
            response,
            ..Self::new(key, Outcome::Fail, duration)
        }
    }

    /// A skipped result.
    #[must_use]
    pub fn skip(key: CaseKey) -> Self {
        Self::new(key, Outcome::Skip, Duration::ZERO)
    }
}

/// Outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    /// Cases recorded.
    pub total: usize,
    /// Cases that passed.
    pub passed: usize,
    /// Cases that failed.
    pub failed: usize,
    /// Cases that were skipped.
    pub skipped: usize,
}

impl Counts {
    /// Count one outcome.
    pub fn record(&mut self, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Pass => self.passed += 1,
            Outcome::Fail => self.failed += 1,
            Outcome::Skip => self.skipped += 1,
        }
    }

    /// Add another set of counters.
    pub fn add(&mut self, other: &Self) {
        self.total += other.total;
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }

    /// Whether `passed + failed + skipped == total`.
    #[must_use]
    pub const fn is_balanced(&self) -> bool {
        self.passed + self.failed + self.skipped == self.total
    }
}

/// The tool discovery check for one implementation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    /// Number of tools the server listed.
    pub listed: usize,
    /// Number of tools the implementation claims to list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_count: Option<usize>,
    /// Catalog tools in the expected categories that were not listed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_tools: Vec<String>,
    /// Why the listing failed, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DiscoveryReport {
    /// Whether the listing matched every declared expectation.
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        self.error.is_none()
            && self.missing_tools.is_empty()
            && self.expected_count.is_none_or(|n| n == self.listed)
    }
}

/// Rollup for one implementation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImplementationSummary {
    /// Counters over every case of this implementation.
    #[serde(flatten)]
    pub counts: Counts,
    /// Counters per tool category.
    pub categories: BTreeMap<String, Counts>,
    /// Why the implementation never became ready, if it didn't.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Tool discovery check, when one was declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoveryReport>,
}

/// The aggregate of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct TestSuiteResult {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration of the run.
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
    /// Counters over every recorded case.
    #[serde(flatten)]
    pub totals: Counts,
    /// Rollups keyed by implementation id.
    pub implementations: BTreeMap<String, ImplementationSummary>,
    /// Every case result, in recording order.
    pub results: Vec<TestResult>,
}

impl Default for TestSuiteResult {
    fn default() -> Self {
        Self::new()
    }
}

impl TestSuiteResult {
    /// Start an empty suite result stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            duration: Duration::ZERO,
            totals: Counts::default(),
            implementations: BTreeMap::new(),
            results: Vec::new(),
        }
    }

    /// Fold one case result into every level of counters.
    pub fn record(&mut self, result: TestResult) {
        self.totals.record(result.outcome);
        let summary = self
            .implementations
            .entry(result.implementation.clone())
            .or_default();
        summary.counts.record(result.outcome);
        summary
            .categories
            .entry(result.category.clone())
            .or_default()
            .record(result.outcome);
        self.results.push(result);
    }

    /// Register an implementation that was attempted, even with no cases.
    pub fn register(&mut self, implementation: &str) {
        self.implementations
            .entry(implementation.to_string())
            .or_default();
    }

    /// Mark an implementation as errored.
    pub fn record_errored(&mut self, implementation: &str, error: impl Into<String>) {
        self.implementations
            .entry(implementation.to_string())
            .or_default()
            .error = Some(error.into());
    }

    /// Attach a discovery report to an implementation.
    pub fn record_discovery(&mut self, implementation: &str, report: DiscoveryReport) {
        self.implementations
            .entry(implementation.to_string())
            .or_default()
            .discovery = Some(report);
    }

    /// Stamp the run duration.
    pub fn finish(&mut self, duration: Duration) {
        self.duration = duration;
    }

    /// Whether the three levels of counters agree.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let mut from_implementations = Counts::default();
        for summary in self.implementations.values() {
            let mut from_categories = Counts::default();
            for counts in summary.categories.values() {
                if !counts.is_balanced() {
                    return false;
                }
                from_categories.add(counts);
            }
            if from_categories != summary.counts || !summary.counts.is_balanced() {
                return false;
            }
            from_implementations.add(&summary.counts);
        }
        self.totals.is_balanced()
            && from_implementations == self.totals
            && self.results.len() == self.totals.total
    }

    /// Ids of implementations that never became ready.
    pub fn errored_implementations(&self) -> impl Iterator<Item = (&str, &str)> {
        self.implementations
            .iter()
            .filter_map(|(id, s)| s.error.as_deref().map(|e| (id.as_str(), e)))
    }

    /// Whether no case failed and no implementation errored.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.totals.failed == 0 && self.errored_implementations().next().is_none()
    }

    /// Results for one implementation.
    pub fn results_for<'a>(&'a self, implementation: &'a str) -> impl Iterator<Item = &'a TestResult> {
        self.results
            .iter()
            .filter(move |r| r.implementation == implementation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(implementation: &str, category: &str, case: &str) -> CaseKey {
        CaseKey {
            implementation: implementation.into(),
            category: category.into(),
            tool: "tool".into(),
            case: case.into(),
        }
    }

    #[test]
    fn test_rollups_sum_consistently() {
        let mut suite = TestSuiteResult::new();
        let timeout = HarnessError::assertion("nope");
        suite.record(TestResult::pass(key("a", "fs", "1"), Duration::from_millis(3), None));
        suite.record(TestResult::fail(key("a", "fs", "2"), Duration::from_millis(4), &timeout, None));
        suite.record(TestResult::skip(key("a", "shell", "3")));
        suite.record(TestResult::pass(key("b", "shell", "1"), Duration::from_millis(1), None));
        suite.record_errored("c", "Failed to spawn 'c'");

        assert!(suite.is_consistent());
        assert_eq!(
            suite.totals,
            Counts {
                total: 4,
                passed: 2,
                failed: 1,
                skipped: 1
            }
        );
        assert_eq!(suite.implementations["a"].counts.total, 3);
        assert_eq!(suite.implementations["a"].categories["fs"].failed, 1);
        assert_eq!(suite.implementations["c"].counts, Counts::default());
        assert!(!suite.all_passed());
        assert_eq!(suite.errored_implementations().count(), 1);
        assert_eq!(suite.results_for("a").count(), 3);
    }

    #[test]
    fn test_failure_records_kind_and_verbatim_message() {
        let err = HarnessError::Tool {
            tool: "echo".into(),
            message: "boom".into(),
        };
        let result = TestResult::fail(key("a", "x", "1"), Duration::ZERO, &err, None);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(result.error_kind, Some(ErrorKind::Tool));
    }

    #[test]
    fn test_serialized_shape() {
        let mut suite = TestSuiteResult::new();
        suite.record(TestResult::pass(key("a", "x", "1"), Duration::from_millis(12), None));
        suite.finish(Duration::from_millis(40));

        let value = serde_json::to_value(&suite).unwrap();
        assert_eq!(value["total"], 1);
        assert_eq!(value["passed"], 1);
        assert_eq!(value["duration_ms"], 40);
        assert_eq!(value["implementations"]["a"]["categories"]["x"]["passed"], 1);
        assert_eq!(value["results"][0]["outcome"], "pass");
        assert_eq!(value["results"][0]["duration_ms"], 12);
    }

    #[test]
    fn test_discovery_satisfaction() {
        let report = DiscoveryReport {
            listed: 3,
            expected_count: Some(3),
            ..DiscoveryReport::default()
        };
        assert!(report.is_satisfied());

        let report = DiscoveryReport {
            listed: 2,
            expected_count: Some(3),
            ..DiscoveryReport::default()
        };
        assert!(!report.is_satisfied());
    }
}
