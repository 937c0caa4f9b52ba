//! CLI binary sequencing configured units into and out of service.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use console::style;
use stagehand_backend::DeploymentBackend;
use stagehand_backend_process::ProcessBackend;
use stagehand_orchestrator::{
    Orchestrator, OrchestratorOptions, RunOutcome, RunReport, TierOutcome, UnitStatus,
};
use stagehand_plan::{Plan, RunConfig, RunPolicy};
use stagehand_probe::{HealthProber, HealthState, StandardProber};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Deployment backend error
    #[error(transparent)]
    Backend(#[from] stagehand_backend::Error),

    /// Report serialization error
    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),

    /// Run configuration error
    #[error(transparent)]
    Plan(#[from] stagehand_plan::Error),

    /// Health probe error
    #[error(transparent)]
    Probe(#[from] stagehand_probe::Error),

    /// Could not set global default subscriber.
    #[error("could not set global default subscriber: {0}")]
    SetTracing(#[from] tracing::dispatcher::SetGlobalDefaultError),
}

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the run configuration file
    #[arg(long, default_value = "stagehand.json", env = "STAGEHAND_CONFIG")]
    config: PathBuf,

    /// Print the run report as JSON instead of the human summary
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start all units, tier by tier
    Start,

    /// Stop all units in reverse tier order
    Stop {
        /// Skip graceful shutdown and terminate every unit outright
        #[arg(long)]
        emergency: bool,
    },

    /// Show backend and health state for every configured unit
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    let max_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing::subscriber::set_global_default(
        FmtSubscriber::builder().with_max_level(max_level).finish(),
    )?;

    let (plan, policy) = RunConfig::from_file(&args.config)?.build()?;

    let backend = Arc::new(ProcessBackend::from_plan(&plan));
    let prober = Arc::new(StandardProber::new());

    let exit_code = match args.command {
        Command::Start => run(&plan, policy, backend, prober, args.json, true).await?,
        Command::Stop { emergency } => {
            let plan = if emergency {
                info!("emergency stop requested; all units will be terminated outright");
                plan.with_immediate_shutdown()
            } else {
                plan
            };
            run(&plan, policy, backend, prober, args.json, false).await?
        }
        Command::Status => status(&plan, &*backend, &*prober).await?,
    };

    std::process::exit(exit_code);
}

/// Runs one orchestration pass with the interrupt handler wired up and
/// maps the report to an exit code.
async fn run(
    plan: &Plan,
    policy: RunPolicy,
    backend: Arc<ProcessBackend>,
    prober: Arc<StandardProber>,
    json: bool,
    startup: bool,
) -> Result<i32, Error> {
    let shutdown_token = CancellationToken::new();

    let signal_shutdown_token = shutdown_token.clone();
    tokio::spawn(async move {
        if cfg!(unix) {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler failed");
            let mut sigint = signal(SignalKind::interrupt()).expect("SIGINT handler failed");

            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM"),
                _ = sigint.recv() => info!("received SIGINT"),
            }
        } else {
            let _ = tokio::signal::ctrl_c().await;
            info!("received interrupt signal");
        }

        signal_shutdown_token.cancel();
    });

    let orchestrator = Orchestrator::new(OrchestratorOptions {
        backend,
        prober,
        policy,
        cancellation_token: shutdown_token,
    });

    let report = if startup {
        orchestrator.start(plan).await
    } else {
        orchestrator.stop(plan).await
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    Ok(report.outcome.exit_code())
}

/// One-shot view of what the backend and the probes say right now.
async fn status(
    plan: &Plan,
    backend: &dyn DeploymentBackend,
    prober: &StandardProber,
) -> Result<i32, Error> {
    let running = backend.list_running().await?;
    let mut all_up = true;

    for unit in plan.units() {
        let is_running = running.iter().any(|name| name == unit.name());
        let health = prober.probe(unit).await?;
        all_up &= is_running && health == HealthState::Healthy;

        let running_label = if is_running {
            style("running").green()
        } else {
            style("stopped").red()
        };
        let health_label = match health {
            HealthState::Healthy => style("healthy").green(),
            HealthState::Unhealthy => style("unhealthy").red(),
            HealthState::Indeterminate => style("indeterminate").yellow(),
        };

        println!(
            "tier {}  {:<24} {:<8} {}",
            unit.tier(),
            unit.name(),
            running_label,
            health_label
        );
    }

    Ok(i32::from(!all_up))
}

fn print_summary(report: &RunReport) {
    for tier in &report.tier_results {
        let outcome = match tier.outcome {
            TierOutcome::Healthy => style("healthy").green(),
            TierOutcome::Degraded => style("degraded").yellow(),
            TierOutcome::Failed => style("failed").red(),
        };
        println!("tier {}: {}", tier.tier_index, outcome);

        for (name, unit) in &tier.unit_results {
            let status = match unit.status {
                UnitStatus::Healthy | UnitStatus::Stopped => {
                    style(unit.status.to_string()).green()
                }
                UnitStatus::Forced => style(unit.status.to_string()).yellow(),
                UnitStatus::Failed => style(unit.status.to_string()).red(),
                _ => style(unit.status.to_string()).dim(),
            };

            print!("  {:<24} {:<10} attempts={}", name, status, unit.attempts);
            if let Some(ref error) = unit.last_error {
                print!("  {}", style(error).dim());
            }
            println!();
        }
    }

    let outcome = match report.outcome {
        RunOutcome::Healthy => style("healthy".to_string()).green(),
        RunOutcome::Degraded => style("degraded".to_string()).yellow(),
        RunOutcome::Failed | RunOutcome::Aborted => style(report.outcome.to_string()).red(),
    };
    println!(
        "{}: {} in {}ms",
        report.direction,
        outcome,
        report.total_duration.as_millis()
    );
}
