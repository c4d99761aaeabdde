//! opcheck - conformance checks for cancelable operations.
//!
//! Usage:
//!   opcheck run [--config FILE] [--operation block|delay] [--json]
//!   opcheck config [--config FILE]

use clap::{Parser, Subcommand, ValueEnum};
use opcheck::testing::DelayOperation;
use opcheck::{
    BlockOperation, ConfigLoader, ConformanceReport, ConformanceSuite, HarnessConfig,
    OperationTestCase,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

/// opcheck - conformance checks for cancelable operations
#[derive(Parser)]
#[command(name = "opcheck")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the conformance suite against a built-in operation
    Run {
        /// Path to an opcheck YAML configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Operation type to check
        #[arg(short, long, value_enum, default_value = "block")]
        operation: BuiltinOperation,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config {
        /// Path to an opcheck YAML configuration file
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum BuiltinOperation {
    Block,
    Delay,
}

struct BlockCase;

impl OperationTestCase for BlockCase {
    type Operation = BlockOperation;

    fn suite_name(&self) -> &str {
        "block"
    }

    fn operation_under_test(&self) -> BlockOperation {
        BlockOperation::empty()
    }
}

struct DelayCase;

impl OperationTestCase for DelayCase {
    type Operation = DelayOperation;

    fn suite_name(&self) -> &str {
        "delay"
    }

    fn operation_under_test(&self) -> DelayOperation {
        DelayOperation::new(Duration::from_millis(50))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            operation,
            json,
        } => {
            let config = ConfigLoader::resolve(config.as_deref())?;
            let report = run_suite(operation, &config).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report);
            }

            if !report.passed() {
                error!(
                    suite = %report.suite,
                    failed = report.failures().count(),
                    "conformance failures"
                );
                std::process::exit(1);
            }
            info!(suite = %report.suite, "all conformance cases passed");
        }
        Commands::Config { config } => {
            let config = ConfigLoader::resolve(config.as_deref())?;
            print!("{}", serde_yaml::to_string(&config)?);
        }
    }

    Ok(())
}

async fn run_suite(operation: BuiltinOperation, config: &HarnessConfig) -> ConformanceReport {
    info!(
        timeout = ?config.timeout_policy().timeout(),
        reuse = ?config.queue_reuse,
        "running conformance suite"
    );

    match operation {
        BuiltinOperation::Block => {
            let mut suite = ConformanceSuite::new(BlockCase).with_config(config);
            let report = suite.run_all().await;
            suite.teardown();
            report
        }
        BuiltinOperation::Delay => {
            let mut suite = ConformanceSuite::new(DelayCase).with_config(config);
            let report = suite.run_all().await;
            suite.teardown();
            report
        }
    }
}
