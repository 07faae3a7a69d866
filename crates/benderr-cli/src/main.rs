//! benderr - test sequence runner front-end.
//!
//! Binds a registered sequence to its steps file, owns the event bus for the
//! run, and renders step events to the console as they happen.

mod render;
mod sequences;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use benderr_core::bus::{BusAddress, EventBus, EventSubscriber};
use benderr_core::{
    steps_from_file, AppConfig, JsonReportFormatter, SequenceError, SequenceRunner, Step,
    StepResult, Verdict,
};
use clap::Parser;
use render::ConsoleRenderer;
use sequences::{available_sequences, find_sequence, BenchContext};
use tracing::{error, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Every step passed (or failed steps were marked ignorable).
const EXIT_ALL_PASSED: u8 = 0;
/// A step failed and was not ignored.
const EXIT_STEP_FAILED: u8 = 1;
/// Configuration problem: steps file, binding, or app config.
const EXIT_CONFIG_ERROR: u8 = 2;
/// Runtime problem: handler abort, transport, or report failure.
const EXIT_RUNTIME_ERROR: u8 = 3;

/// Run a test sequence against its steps file.
#[derive(Parser)]
#[command(name = "benderr")]
#[command(about = "Run a test sequence and stream step events")]
#[command(version)]
struct Cli {
    /// Name of the registered sequence (e.g., demo-sequence)
    #[arg(long)]
    sequence: String,

    /// Path to the steps config JSON file
    #[arg(long)]
    config: PathBuf,

    /// Config profile (loads base.yaml then <profile>.yaml)
    #[arg(long, default_value = "dev")]
    profile: String,

    /// Directory searched for config files (repeatable)
    #[arg(long = "config-dir", default_value = "./config")]
    config_dirs: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> ExitCode {
    let settings = match AppConfig::load(&cli.profile, &cli.config_dirs) {
        Ok(settings) => settings,
        Err(e) => {
            error!("failed to load app config: {e}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let definition = match steps_from_file(&cli.config) {
        Ok(definition) => definition,
        Err(e) => {
            error!("failed to load steps file {}: {e}", cli.config.display());
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    let steps = definition.steps.clone();

    let Some(registry) = find_sequence(&cli.sequence) else {
        error!(
            "sequence '{}' not found; available: {}",
            cli.sequence,
            available_sequences().join(", ")
        );
        return ExitCode::from(EXIT_CONFIG_ERROR);
    };

    // Binding validation happens before any socket is touched.
    let runner = match SequenceRunner::new(registry, definition, settings.clone()) {
        Ok(runner) => runner,
        Err(e) => {
            error!("sequence binding rejected: {e}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let address = BusAddress::from_socket_path(&settings.event_socket_path);
    let mut bus = match EventBus::bind(address).await {
        Ok(bus) => bus,
        Err(e) => {
            error!("failed to start event bus: {e}");
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    };

    let subscriber = EventSubscriber::start(
        bus.address().clone(),
        ConsoleRenderer::new(settings.log_to_console),
    );
    if !subscriber.wait_until_ready(Duration::from_secs(2)).await {
        warn!("console renderer did not attach; continuing without it");
    }

    let runner = runner
        .with_publisher(bus.publisher())
        .with_report_formatter(Box::new(JsonReportFormatter));

    // Handlers may block on device I/O; keep them off the async runtime.
    let outcome = tokio::task::spawn_blocking(move || {
        let mut runner = runner;
        let mut ctx = BenchContext;
        let outcome = runner.run(&mut ctx);
        (outcome, runner)
    })
    .await;

    let (outcome, runner) = match outcome {
        Ok(pair) => pair,
        Err(e) => {
            error!("sequence task panicked: {e}");
            bus.shutdown().await;
            subscriber.stop().await;
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    };

    bus.shutdown().await;
    subscriber.stop().await;

    if let Err(e) = &outcome {
        error!("sequence run stopped: {e}");
    }
    ExitCode::from(exit_code(&outcome, runner.step_results(), &steps))
}

fn exit_code(outcome: &Result<(), SequenceError>, results: &[StepResult], steps: &[Step]) -> u8 {
    match outcome {
        Err(SequenceError::StepFailure(_)) => EXIT_STEP_FAILED,
        Err(
            SequenceError::StepCount { .. }
            | SequenceError::StepsConfig { .. }
            | SequenceError::EmptyStepName
            | SequenceError::InvalidSpec(_),
        ) => EXIT_CONFIG_ERROR,
        Err(_) => EXIT_RUNTIME_ERROR,
        Ok(()) => completed_run_code(results, steps),
    }
}

/// Exit code for a run that reached its end: ignored failures are forgiven,
/// unignored ones are not, and a step left undefined counts as a runtime
/// error because its handler produced nothing to judge.
fn completed_run_code(results: &[StepResult], steps: &[Step]) -> u8 {
    let mut code = EXIT_ALL_PASSED;
    for (result, step) in results.iter().zip(steps) {
        match result.verdict {
            Verdict::Failed if !step.ignore_fail => return EXIT_STEP_FAILED,
            Verdict::Aborted if !step.ignore_fail => code = EXIT_RUNTIME_ERROR,
            Verdict::Undefined => code = EXIT_RUNTIME_ERROR,
            _ => {}
        }
    }
    code
}
