//! The test scheduler.
//!
//! A run walks the matrix implementation × tool spec × case under two
//! nested bounds, each a counting [`Semaphore`]:
//!
//! - at most `max_concurrent_implementations` implementations are started
//!   and exercised at once
//! - within one implementation, at most `max_concurrent_cases` cases are in
//!   flight at once
//!
//! Permits are held by RAII guards, so a failing or panicking task always
//! gives its slot back. Results are collected per implementation and folded
//! into the [`TestSuiteResult`] in declaration order once everything has
//! settled.

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use mcpparity_client::{ServerSupervisor, SupervisorSet};
use mcpparity_core::HarnessError;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::catalog::{Hook, HookContext, ImplementationSpec, ToolTestCase, ToolTestSpec};
use crate::config::{HarnessConfig, RunnerConfig};
use crate::expectation::{ToolResponse, panic_message};
use crate::result::{CaseKey, DiscoveryReport, Outcome, TestResult, TestSuiteResult};

/// Runs a tool test catalog against a set of implementations.
pub struct TestRunner {
    config: RunnerConfig,
    implementations: Vec<ImplementationSpec>,
    catalog: Vec<ToolTestSpec>,
    sessions: Arc<SupervisorSet>,
}

impl std::fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRunner")
            .field("config", &self.config)
            .field("implementations", &self.implementations.len())
            .field("catalog", &self.catalog.len())
            .finish_non_exhaustive()
    }
}

/// Everything one implementation task needs.
#[derive(Clone)]
struct RunContext {
    config: RunnerConfig,
    catalog: Arc<Vec<ToolTestSpec>>,
    sessions: Arc<SupervisorSet>,
}

/// What one implementation task hands back.
struct ImplementationOutcome {
    order: usize,
    id: String,
    error: Option<String>,
    discovery: Option<DiscoveryReport>,
    results: Vec<TestResult>,
}

impl ImplementationOutcome {
    fn new(order: usize, id: &str) -> Self {
        Self {
            order,
            id: id.to_string(),
            error: None,
            discovery: None,
            results: Vec::new(),
        }
    }
}

impl TestRunner {
    /// Create a runner with no implementations and an empty catalog.
    #[must_use]
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            implementations: Vec::new(),
            catalog: Vec::new(),
            sessions: Arc::new(SupervisorSet::new()),
        }
    }

    /// Create a runner from a loaded configuration.
    #[must_use]
    pub fn from_config(config: HarnessConfig) -> Self {
        Self::new(config.runner)
            .implementations(config.implementations)
            .catalog(config.catalog)
    }

    /// Add an implementation.
    #[must_use]
    pub fn implementation(mut self, spec: ImplementationSpec) -> Self {
        self.implementations.push(spec);
        self
    }

    /// Add several implementations.
    #[must_use]
    pub fn implementations(mut self, specs: impl IntoIterator<Item = ImplementationSpec>) -> Self {
        self.implementations.extend(specs);
        self
    }

    /// Add a tool spec to the catalog.
    #[must_use]
    pub fn tool_spec(mut self, spec: ToolTestSpec) -> Self {
        self.catalog.push(spec);
        self
    }

    /// Add several tool specs to the catalog.
    #[must_use]
    pub fn catalog(mut self, specs: impl IntoIterator<Item = ToolTestSpec>) -> Self {
        self.catalog.extend(specs);
        self
    }

    /// The scheduling configuration.
    #[must_use]
    pub const fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// The sessions currently alive. Empty outside of [`run`](Self::run).
    #[must_use]
    pub fn sessions(&self) -> &SupervisorSet {
        &self.sessions
    }

    /// Execute the whole matrix.
    ///
    /// Never fails as a whole: spawn and handshake failures are recorded
    /// against their implementation, every other failure against its case.
    /// Every session is stopped before this returns.
    pub async fn run(&self) -> TestSuiteResult {
        let started = Instant::now();
        let mut suite = TestSuiteResult::new();

        let selected: Vec<ImplementationSpec> = self
            .implementations
            .iter()
            .filter(|spec| {
                let keep = spec.enabled && self.config.selects_implementation(&spec.id);
                if !keep {
                    debug!(implementation = %spec.id, enabled = spec.enabled, "Implementation excluded");
                }
                keep
            })
            .cloned()
            .collect();

        info!(
            run_id = %suite.run_id,
            implementations = selected.len(),
            tools = self.catalog.len(),
            "Starting run"
        );

        let ctx = RunContext {
            config: self.config.clone(),
            catalog: Arc::new(self.catalog.clone()),
            sessions: Arc::clone(&self.sessions),
        };
        let limit = Arc::new(Semaphore::new(self.config.implementation_permits()));
        let mut tasks = JoinSet::new();

        for (order, spec) in selected.into_iter().enumerate() {
            let ctx = ctx.clone();
            let limit = Arc::clone(&limit);
            tasks.spawn(async move {
                let Ok(_permit) = limit.acquire_owned().await else {
                    let mut outcome = ImplementationOutcome::new(order, &spec.id);
                    outcome.error = Some("scheduler shut down".to_string());
                    return outcome;
                };
                let id = spec.id.clone();
                match AssertUnwindSafe(ctx.run_implementation(order, spec))
                    .catch_unwind()
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(panic) => {
                        let message = format!("implementation run panicked: {}", panic_message(panic.as_ref()));
                        error!(implementation = %id, "{message}");
                        let mut outcome = ImplementationOutcome::new(order, &id);
                        outcome.error = Some(message);
                        outcome
                    }
                }
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "Implementation task failed to complete"),
            }
        }
        outcomes.sort_by_key(|o| o.order);

        for outcome in outcomes {
            suite.register(&outcome.id);
            if let Some(error) = outcome.error {
                suite.record_errored(&outcome.id, error);
            }
            if let Some(report) = outcome.discovery {
                suite.record_discovery(&outcome.id, report);
            }
            for result in outcome.results {
                suite.record(result);
            }
        }

        // Sessions left behind by a panicked task.
        self.sessions.stop_all().await;

        suite.finish(started.elapsed());
        info!(
            run_id = %suite.run_id,
            total = suite.totals.total,
            passed = suite.totals.passed,
            failed = suite.totals.failed,
            skipped = suite.totals.skipped,
            elapsed_ms = suite.duration.as_millis() as u64,
            "Run complete"
        );
        suite
    }
}

impl RunContext {
    async fn run_implementation(self, order: usize, spec: ImplementationSpec) -> ImplementationOutcome {
        let mut outcome = ImplementationOutcome::new(order, &spec.id);

        let session = match self
            .sessions
            .start(
                spec.id.clone(),
                spec.process_builder(),
                self.config.supervisor_config(&spec),
            )
            .await
        {
            Ok(session) => session,
            Err(e) => {
                warn!(implementation = %spec.id, error = %e, "Implementation errored, no cases attempted");
                outcome.error = Some(e.to_string());
                return outcome;
            }
        };

        if spec.declares_discovery() {
            outcome.discovery = Some(discover(&session, &spec, &self.catalog).await);
        }

        let limit = Arc::new(Semaphore::new(self.config.case_permits()));
        let mut tasks = JoinSet::new();
        let mut slots: Vec<Option<TestResult>> = Vec::new();

        for tool in self
            .catalog
            .iter()
            .filter(|tool| self.config.selects_category(&tool.category))
        {
            for case in &tool.cases {
                let key = CaseKey {
                    implementation: spec.id.clone(),
                    category: tool.category.clone(),
                    tool: tool.name.clone(),
                    case: case.name.clone(),
                };
                let slot = slots.len();

                if !case.applies_to(&spec.id) {
                    debug!(implementation = %spec.id, tool = %tool.name, case = %case.name, "Case skipped");
                    slots.push(Some(TestResult::skip(key)));
                    continue;
                }
                slots.push(None);

                let session = Arc::clone(&session);
                let limit = Arc::clone(&limit);
                let case = case.clone();
                tasks.spawn(async move {
                    let Ok(_permit) = limit.acquire_owned().await else {
                        let err = HarnessError::connection_closed("scheduler shut down");
                        return (slot, TestResult::fail(key, Duration::ZERO, &err, None));
                    };
                    let fallback = key.clone();
                    let result = AssertUnwindSafe(run_case(&session, &case, key))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| {
                            let err = HarnessError::assertion(format!(
                                "case panicked: {}",
                                panic_message(panic.as_ref())
                            ));
                            TestResult::fail(fallback, Duration::ZERO, &err, None)
                        });
                    (slot, result)
                });
            }
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, result)) => slots[slot] = Some(result),
                Err(e) => error!(implementation = %spec.id, error = %e, "Case task failed to complete"),
            }
        }
        outcome.results = slots.into_iter().flatten().collect();

        if let Err(e) = self.sessions.stop(&spec.id).await {
            warn!(implementation = %spec.id, error = %e, "Failed to stop session");
        }

        let failed = outcome
            .results
            .iter()
            .filter(|r| r.outcome == Outcome::Fail)
            .count();
        info!(
            implementation = %spec.id,
            cases = outcome.results.len(),
            failed,
            "Implementation finished"
        );
        outcome
    }
}

/// Run one case against a ready session.
///
/// Setup runs first; the tool is called only if setup succeeded. Cleanup
/// runs whenever it is declared, and its failure never changes the outcome.
pub async fn run_case(session: &ServerSupervisor, case: &ToolTestCase, key: CaseKey) -> TestResult {
    let started = Instant::now();
    let ctx = HookContext {
        implementation: key.implementation.clone(),
        tool: key.tool.clone(),
        case: key.case.clone(),
    };

    let mut captured = None;
    let attempt = attempt_case(session, case, &ctx, &mut captured).await;

    if let Some(cleanup) = &case.cleanup {
        if let Err(e) = run_hook("cleanup", cleanup, ctx).await {
            warn!(
                implementation = %key.implementation,
                tool = %key.tool,
                case = %key.case,
                error = %e,
                "Cleanup failed"
            );
        }
    }

    let elapsed = started.elapsed();
    match attempt {
        Ok(()) => {
            debug!(implementation = %key.implementation, tool = %key.tool, case = %key.case, "Case passed");
            TestResult::pass(key, elapsed, captured)
        }
        Err(e) => {
            debug!(
                implementation = %key.implementation,
                tool = %key.tool,
                case = %key.case,
                error = %e,
                "Case failed"
            );
            TestResult::fail(key, elapsed, &e, captured)
        }
    }
}

async fn attempt_case(
    session: &ServerSupervisor,
    case: &ToolTestCase,
    ctx: &HookContext,
    captured: &mut Option<Value>,
) -> Result<(), HarnessError> {
    if let Some(setup) = &case.setup {
        run_hook("setup", setup, ctx.clone()).await?;
    }

    let response = session.call_tool(&ctx.tool, case.input.clone()).await?;
    let response = ToolResponse::from_response(response)?;
    *captured = Some(response.raw());
    case.expect.evaluate(&ctx.tool, &response)
}

/// Run a hook, turning errors and panics into [`HarnessError::Hook`].
async fn run_hook(phase: &'static str, hook: &Hook, ctx: HookContext) -> Result<(), HarnessError> {
    let panicked = |payload: Box<dyn std::any::Any + Send>| HarnessError::Hook {
        phase,
        message: format!("panicked: {}", panic_message(payload.as_ref())),
    };

    let future = catch_unwind(AssertUnwindSafe(|| hook(ctx))).map_err(panicked)?;
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(message)) => Err(HarnessError::Hook { phase, message }),
        Err(payload) => Err(panicked(payload)),
    }
}

/// List the server's tools and compare them with what the implementation
/// claims to provide.
async fn discover(
    session: &ServerSupervisor,
    spec: &ImplementationSpec,
    catalog: &[ToolTestSpec],
) -> DiscoveryReport {
    let mut report = DiscoveryReport {
        expected_count: spec.expected_tool_count,
        ..DiscoveryReport::default()
    };

    match session.list_tools().await {
        Ok(listing) => {
            report.listed = listing.tools.len();
            let listed: HashSet<&str> = listing.tools.iter().map(|t| t.name.as_str()).collect();
            let mut missing: Vec<String> = catalog
                .iter()
                .filter(|tool| spec.expected_categories.contains(&tool.category))
                .filter(|tool| !listed.contains(tool.name.as_str()))
                .map(|tool| tool.name.clone())
                .collect();
            missing.sort();
            missing.dedup();
            report.missing_tools = missing;
        }
        Err(e) => report.error = Some(e.to_string()),
    }

    if report.is_satisfied() {
        debug!(implementation = %spec.id, listed = report.listed, "Tool discovery matched");
    } else {
        warn!(
            implementation = %spec.id,
            listed = report.listed,
            expected = ?report.expected_count,
            missing = ?report.missing_tools,
            error = ?report.error,
            "Tool discovery mismatch"
        );
    }
    report
}
