//! benderr-agent - plan scheduler front-end.
//!
//! Drives a plan file strictly in order: provision, spawn, wait, next. Stops
//! at the first failed entry and prints the status table on the way out.

mod agent;
mod env;
mod plan;

use std::path::PathBuf;
use std::process::ExitCode;

use agent::{Agent, EntryStatus, PlanEntry, SHUTDOWN_GRACE};
use chrono::{DateTime, Utc};
use clap::Parser;
use plan::plan_from_file;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Run a plan of test sequences, one at a time, in order.
#[derive(Parser)]
#[command(name = "benderr-agent")]
#[command(about = "Schedule test sequences from a plan file")]
#[command(version)]
struct Cli {
    /// Path to the plan JSON file
    #[arg(long)]
    plan: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let plan = match plan_from_file(&cli.plan) {
        Ok(plan) => plan,
        Err(e) => {
            error!("failed to load plan {}: {e}", cli.plan.display());
            return ExitCode::FAILURE;
        }
    };

    let agent = Agent::new(plan);
    let agent_ref = &agent;
    tokio::select! {
        () = drive_plan(agent_ref) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, terminating running sequence");
            agent_ref.shutdown(SHUTDOWN_GRACE).await;
        }
    }

    let table = agent.status_table();
    print_status_table(&table);

    if table.iter().all(|e| e.status == EntryStatus::Completed) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Start each entry in plan order and wait for it to settle; a failure stops
/// the plan and leaves the remainder pending for the operator.
async fn drive_plan(agent: &Agent) {
    while let Some(next) = agent.next_allowed() {
        if let Err(e) = agent.start_sequence(next).await {
            error!("failed to start entry {next}: {e}");
            break;
        }
        match agent.wait_until_settled(next).await {
            Some(EntryStatus::Completed) => {}
            status => {
                error!(
                    "entry {next} ended with status {}",
                    status.map_or("unknown", |s| s.as_str())
                );
                break;
            }
        }
    }
}

fn print_status_table(entries: &[PlanEntry]) {
    println!();
    println!(
        "{:<24}  {:<10}  {:<8}  {:<23}  {:<23}",
        "SEQUENCE", "STATUS", "PID", "STARTED", "ENDED"
    );
    println!("{}", "-".repeat(96));
    for entry in entries {
        println!(
            "{:<24}  {:<10}  {:<8}  {:<23}  {:<23}",
            entry.sequence_name,
            entry.status.as_str(),
            entry.pid.map(|p| p.to_string()).unwrap_or_default(),
            format_time(entry.started_at),
            format_time(entry.ended_at),
        );
    }
    println!();
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn format_time_handles_unset() {
        assert_eq!(format_time(None), "");
        let t = Utc.timestamp_millis_opt(1_700_000_000_000).single();
        assert!(format_time(t).starts_with("2023-11-14"));
    }
}
