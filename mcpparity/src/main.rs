//! The `mcpparity` command line.
//!
//! Loads a JSON harness configuration, applies flag overrides, runs the
//! catalog and prints one summary line per implementation. Exits `0` when
//! every attempted case passed and no implementation errored, `1` otherwise
//! and `2` when the configuration cannot be used.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use mcpparity::{HarnessConfig, Outcome, TestRunner, TestSuiteResult};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "mcpparity",
    version,
    about = "Run an MCP tool test catalog against candidate server implementations"
)]
struct Cli {
    /// Harness configuration file (JSON).
    #[arg(long, short, value_name = "PATH")]
    config: PathBuf,
    /// Maximum implementations exercised at once.
    #[arg(long, value_name = "N")]
    max_implementations: Option<usize>,
    /// Maximum cases in flight per implementation.
    #[arg(long, value_name = "N")]
    max_cases: Option<usize>,
    /// Default per-request deadline in milliseconds.
    #[arg(long, value_name = "MS")]
    request_timeout_ms: Option<u64>,
    /// Run only this implementation (repeatable).
    #[arg(long = "only", value_name = "ID")]
    only: Vec<String>,
    /// Run only tool specs in this category (repeatable).
    #[arg(long = "category", value_name = "NAME")]
    category: Vec<String>,
    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn apply(&self, mut config: HarnessConfig) -> HarnessConfig {
        let mut runner = config.runner;
        if let Some(n) = self.max_implementations {
            runner = runner.max_concurrent_implementations(n);
        }
        if let Some(n) = self.max_cases {
            runner = runner.max_concurrent_cases(n);
        }
        if let Some(ms) = self.request_timeout_ms {
            runner = runner.request_timeout(Duration::from_millis(ms));
        }
        if !self.only.is_empty() {
            runner = runner.only_implementations(self.only.iter().cloned());
        }
        if !self.category.is_empty() {
            runner = runner.only_categories(self.category.iter().cloned());
        }
        config.runner = runner;
        config
    }
}

fn init_tracing(json: bool) {
    let filter = ["MCPPARITY_LOG", "RUST_LOG"]
        .iter()
        .find_map(|var| std::env::var(var).ok())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_summary(suite: &TestSuiteResult) {
    for (id, summary) in &suite.implementations {
        match &summary.error {
            Some(error) => println!("{id}: ERRORED: {error}"),
            None => println!(
                "{id}: {} passed, {} failed, {} skipped ({} total)",
                summary.counts.passed,
                summary.counts.failed,
                summary.counts.skipped,
                summary.counts.total
            ),
        }
        if let Some(discovery) = &summary.discovery {
            if !discovery.is_satisfied() {
                println!(
                    "  discovery: listed {} tools, expected {:?}, missing {:?}",
                    discovery.listed, discovery.expected_count, discovery.missing_tools
                );
            }
        }
        for result in suite
            .results_for(id)
            .filter(|r| r.outcome == Outcome::Fail)
        {
            println!(
                "  FAIL {}/{}: {}",
                result.tool,
                result.case,
                result.error.as_deref().unwrap_or("")
            );
        }
    }
    println!(
        "total: {} passed, {} failed, {} skipped ({} total) in {:.2}s",
        suite.totals.passed,
        suite.totals.failed,
        suite.totals.skipped,
        suite.totals.total,
        suite.duration.as_secs_f64()
    );
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = match HarnessConfig::from_path(&cli.config) {
        Ok(config) => {
            info!(
                config = %cli.config.display(),
                implementations = config.implementations.len(),
                tools = config.catalog.len(),
                "Loaded configuration"
            );
            cli.apply(config)
        }
        Err(e) => {
            eprintln!("{:?}", miette::Report::new(e));
            return ExitCode::from(2);
        }
    };

    let suite = TestRunner::from_config(config).run().await;
    print_summary(&suite);

    if suite.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
