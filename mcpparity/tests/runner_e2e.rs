//! Full runs against the mock server.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use mcpparity::{
    ContentAssertion, ErrorKind, Expectation, HarnessConfig, HookContext, ImplementationSpec,
    Outcome, RunnerConfig, TestResult, TestRunner, TestSuiteResult, ToolTestCase, ToolTestSpec,
};
use pretty_assertions::assert_eq;
use serde_json::json;

const MOCK: &str = env!("CARGO_BIN_EXE_mcpparity-mock-server");

fn implementation(id: &str) -> ImplementationSpec {
    ImplementationSpec::new(id, MOCK)
        .language("rust")
        .startup_timeout(Duration::from_secs(5))
}

fn counting(counter: &Arc<AtomicUsize>) -> impl Fn(HookContext) -> BoxFuture<'static, Result<(), String>> + Send + Sync + 'static {
    let counter = Arc::clone(counter);
    move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }.boxed()
    }
}

/// Tracks how many cases are between setup and cleanup at once.
#[derive(Default)]
struct Gauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

fn gauged(case: ToolTestCase, gauge: &Arc<Gauge>, setup_panics: bool) -> ToolTestCase {
    let entering = Arc::clone(gauge);
    let leaving = Arc::clone(gauge);
    case.with_setup(move |_| {
        entering.enter();
        async move {
            assert!(!setup_panics, "fixture exploded");
            Ok(())
        }
        .boxed()
    })
    .with_cleanup(move |_| {
        leaving.leave();
        async { Ok(()) }.boxed()
    })
}

fn find<'a>(suite: &'a TestSuiteResult, implementation: &str, case: &str) -> &'a TestResult {
    suite
        .results
        .iter()
        .find(|r| r.implementation == implementation && r.case == case)
        .unwrap_or_else(|| panic!("no result for {implementation}/{case}"))
}

fn echo_spec() -> ToolTestSpec {
    ToolTestSpec::new("echo", "basic").case(
        ToolTestCase::new("hello", json!({"text": "Hello, World!"})).expect(
            Expectation::success().content(
                ContentAssertion::at(0)
                    .content_type("text")
                    .text_pattern("Hello, World!"),
            ),
        ),
    )
}

#[tokio::test]
async fn test_echo_passes_and_error_flag_fails_verbatim() {
    let runner = TestRunner::new(RunnerConfig::new())
        .implementation(implementation("a"))
        .tool_spec(echo_spec())
        .tool_spec(
            ToolTestSpec::new("fail", "basic")
                .case(ToolTestCase::new("expects success", json!({"message": "EACCES: /root"}))),
        );

    let suite = runner.run().await;
    assert!(suite.is_consistent());
    assert_eq!(suite.totals.total, 2);

    let hello = find(&suite, "a", "hello");
    assert_eq!(hello.outcome, Outcome::Pass);

    let failed = find(&suite, "a", "expects success");
    assert_eq!(failed.outcome, Outcome::Fail);
    assert_eq!(failed.error.as_deref(), Some("EACCES: /root"));
    assert_eq!(failed.error_kind, Some(ErrorKind::Tool));
    assert!(failed.response.is_some());

    assert!(runner.sessions().is_empty().await);
}

#[tokio::test]
async fn test_disabled_implementation_is_excluded_everywhere() {
    let runner = TestRunner::new(RunnerConfig::new())
        .implementation(implementation("a"))
        .implementation(implementation("b").enabled(false))
        .tool_spec(echo_spec());

    let suite = runner.run().await;
    assert!(suite.is_consistent());
    assert_eq!(suite.totals.total, 1);
    assert!(!suite.implementations.contains_key("b"));
    assert!(suite.results.iter().all(|r| r.implementation != "b"));
    assert!(suite.all_passed());
}

#[tokio::test]
async fn test_timeout_fails_case_and_later_cases_still_run() {
    let runner = TestRunner::new(RunnerConfig::new().max_concurrent_cases(1))
        .implementation(implementation("c").request_timeout(Duration::from_millis(300)))
        .tool_spec(ToolTestSpec::new("hang", "slow").case(ToolTestCase::new("never answers", json!({}))))
        .tool_spec(echo_spec());

    let suite = runner.run().await;
    assert!(suite.is_consistent());

    let timed_out = find(&suite, "c", "never answers");
    assert_eq!(timed_out.outcome, Outcome::Fail);
    assert_eq!(timed_out.error_kind, Some(ErrorKind::RequestTimeout));
    assert!(timed_out.error.as_deref().unwrap().contains("timed out"));
    assert!(timed_out.duration >= Duration::from_millis(300));

    assert_eq!(find(&suite, "c", "hello").outcome, Outcome::Pass);
    assert_eq!(suite.implementations["c"].error, None);
}

#[tokio::test]
async fn test_skipped_cases_run_no_hooks_and_no_call() {
    let setups = Arc::new(AtomicUsize::new(0));
    let cleanups = Arc::new(AtomicUsize::new(0));

    let case = ToolTestCase::new("skippable", json!({"text": "x"}))
        .skip_for("a")
        .with_setup(counting(&setups))
        .with_cleanup(counting(&cleanups));
    let only_b = ToolTestCase::new("only b", json!({"text": "y"}))
        .only_for("b")
        .with_setup(counting(&setups))
        .with_cleanup(counting(&cleanups));

    let runner = TestRunner::new(RunnerConfig::new())
        .implementation(implementation("a"))
        .tool_spec(ToolTestSpec::new("crash", "basic").case(case).case(only_b));

    // Were either case attempted, the crash tool would take the session down.
    let suite = runner.run().await;
    assert!(suite.is_consistent());
    assert_eq!(suite.totals.skipped, 2);
    assert_eq!(suite.totals.total, 2);
    assert_eq!(find(&suite, "a", "skippable").outcome, Outcome::Skip);
    assert_eq!(find(&suite, "a", "only b").outcome, Outcome::Skip);
    assert_eq!(setups.load(Ordering::SeqCst), 0);
    assert_eq!(cleanups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_mixed_matrix_rollups_sum() {
    let runner = TestRunner::new(RunnerConfig::new().max_concurrent_implementations(3))
        .implementation(implementation("a"))
        .implementation(implementation("b").env("MOCK_STRING_IDS", "1"))
        .implementation(ImplementationSpec::new("ghost", "/nonexistent/server"))
        .implementation(implementation("broken").env("MOCK_HANDSHAKE", "error"))
        .tool_spec(echo_spec())
        .tool_spec(
            ToolTestSpec::new("image", "media").case(
                ToolTestCase::new("png", json!({})).expect(
                    Expectation::success().content(
                        ContentAssertion::at(0)
                            .content_type("image")
                            .mime_type("image/png")
                            .min_length(1),
                    ),
                ),
            ),
        )
        .tool_spec(
            ToolTestSpec::new("error", "basic").case(
                ToolTestCase::new("expected error", json!({}))
                    .expect(Expectation::failure().error_pattern("^tool error")),
            ),
        );

    let suite = runner.run().await;
    assert!(suite.is_consistent());
    assert_eq!(suite.totals.total, 6);
    assert_eq!(suite.totals.passed, 6);

    assert_eq!(suite.implementations["a"].categories["basic"].total, 2);
    assert_eq!(suite.implementations["a"].categories["media"].passed, 1);
    assert_eq!(suite.implementations["ghost"].counts.total, 0);
    assert!(suite.implementations["ghost"].error.is_some());
    assert!(suite.implementations["broken"]
        .error
        .as_deref()
        .unwrap()
        .contains("Handshake failed"));
    assert!(!suite.all_passed());
}

#[tokio::test]
async fn test_filters_and_discovery() {
    let runner = TestRunner::new(
        RunnerConfig::new()
            .only_implementations(["a"])
            .only_categories(["basic"]),
    )
    .implementation(
        implementation("a")
            .env("MOCK_TOOLS", "echo,fail")
            .expected_categories(["basic", "media"])
            .expected_tool_count(2),
    )
    .implementation(implementation("z"))
    .tool_spec(echo_spec())
    .tool_spec(ToolTestSpec::new("image", "media").case(ToolTestCase::new("png", json!({}))));

    let suite = runner.run().await;
    assert!(suite.is_consistent());
    assert_eq!(suite.totals.total, 1);
    assert!(!suite.implementations.contains_key("z"));

    let discovery = suite.implementations["a"].discovery.clone().unwrap();
    assert_eq!(discovery.listed, 2);
    assert_eq!(discovery.missing_tools, vec!["image".to_string()]);
    assert!(!discovery.is_satisfied());
}

#[tokio::test]
async fn test_run_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let document = json!({
        "runner": {"max_concurrent_cases": 2, "request_timeout_ms": 2000},
        "implementations": [
            {"id": "mock", "language": "rust", "command": MOCK, "env": {"MOCK_BANNER": "1"}},
            {"id": "off", "command": MOCK, "enabled": false}
        ],
        "catalog": [
            {"name": "echo", "category": "basic", "cases": [
                {"name": "hello", "input": {"text": "Hello, World!"},
                 "expect": {"content": [{"type": "text", "text_pattern": "^Hello"}]}},
                {"name": "too long", "input": {"text": "abcdef"},
                 "expect": {"content": [{"max_length": 3}]}}
            ]}
        ]
    });
    write!(file, "{document}").unwrap();

    let config = HarnessConfig::from_path(file.path()).unwrap();
    let suite = TestRunner::from_config(config).run().await;

    assert!(suite.is_consistent());
    assert_eq!(suite.totals.total, 2);
    assert_eq!(find(&suite, "mock", "hello").outcome, Outcome::Pass);
    let long = find(&suite, "mock", "too long");
    assert_eq!(long.outcome, Outcome::Fail);
    assert_eq!(long.error_kind, Some(ErrorKind::Assertion));

    let report = serde_json::to_value(&suite).unwrap();
    assert_eq!(report["total"], 2);
    assert_eq!(report["implementations"]["mock"]["failed"], 1);
}

#[tokio::test]
async fn test_case_concurrency_bound_holds_with_failures() {
    let gauge = Arc::new(Gauge::default());
    let slow = |name: &str| ToolTestCase::new(name, json!({"ms": 150, "text": name}));

    let mut spec = ToolTestSpec::new("slow", "timing");
    for i in 0..4 {
        spec = spec.case(gauged(slow(&format!("passes {i}")), &gauge, false));
    }
    spec = spec
        .case(gauged(slow("wrong expectation").expect(Expectation::failure()), &gauge, false))
        .case(gauged(slow("setup panics"), &gauge, true))
        .case(gauged(
            slow("predicate panics").expect(Expectation::success().with_predicate(|_| panic!("predicate exploded"))),
            &gauge,
            false,
        ))
        .case(gauged(slow("passes last"), &gauge, false));

    let runner = TestRunner::new(RunnerConfig::new().max_concurrent_cases(2))
        .implementation(implementation("a"))
        .tool_spec(spec);

    let suite = runner.run().await;
    assert!(suite.is_consistent());
    assert_eq!(suite.totals.total, 8);
    assert_eq!(suite.totals.passed, 5);
    assert_eq!(suite.totals.failed, 3);
    assert_eq!(gauge.peak(), 2);
    assert_eq!(gauge.active.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_implementation_concurrency_bound_holds_with_failures() {
    let gauge = Arc::new(Gauge::default());
    let spec = ToolTestSpec::new("slow", "timing").case(gauged(
        ToolTestCase::new("hold", json!({"ms": 300, "text": "held"})),
        &gauge,
        false,
    ));

    let runner = TestRunner::new(RunnerConfig::new().max_concurrent_implementations(2))
        .implementation(implementation("a"))
        .implementation(ImplementationSpec::new("ghost", "/nonexistent/server"))
        .implementation(implementation("b"))
        .implementation(implementation("broken").env("MOCK_HANDSHAKE", "error"))
        .implementation(implementation("c"))
        .implementation(implementation("d"))
        .tool_spec(spec);

    let suite = runner.run().await;
    assert!(suite.is_consistent());
    assert_eq!(suite.implementations.len(), 6);
    assert_eq!(suite.totals.passed, 4);
    assert_eq!(suite.errored_implementations().count(), 2);
    assert!(gauge.peak() <= 2, "peak {} exceeds the bound", gauge.peak());
    assert_eq!(gauge.active.load(Ordering::SeqCst), 0);
    assert!(runner.sessions().is_empty().await);
}
