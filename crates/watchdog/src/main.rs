//! Watchdog CLI
//!
//! Reads metrics snapshots from a file or pipe on a fixed tick, runs the
//! recovery policy against each one and prints one result per evaluation.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;
use notify::{Notifier, NotifyEvent};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use watchdog::config::DEFAULT_CONFIG_PATH;
use watchdog::scheduler::{run_scheduler, SchedulerOptions};
use watchdog::{
    ActionOutcome, EvaluationResult, MetricsSnapshot, RecoveryConfig, RecoveryController,
    SnapshotSource,
};

/// Threshold-triggered recovery watchdog
#[derive(Parser)]
#[command(name = "watchdog")]
#[command(about = "Runs cooldown-gated recovery actions when system metrics cross thresholds")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to watchdog-config.json
    #[arg(long, env = "WATCHDOG_CONFIG", default_value = DEFAULT_CONFIG_PATH, global = true)]
    config: String,

    /// Output format (json or text)
    #[arg(long, default_value = "json", global = true)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a stream of JSON Lines snapshots, one per tick
    Run {
        /// Snapshot file, or `-` for stdin
        #[arg(long, default_value = "-")]
        source: String,

        /// Seconds between ticks (0 = evaluate back to back)
        #[arg(long, default_value = "30")]
        interval_secs: u64,

        /// Log the procedure instead of running configured commands
        #[arg(long)]
        dry_run: bool,

        /// Use each snapshot's capturedAt as the cooldown clock
        #[arg(long)]
        replay_clock: bool,
    },
    /// Evaluate a single snapshot and exit
    Evaluate {
        /// Snapshot as a JSON object
        #[arg(long)]
        snapshot: String,

        /// Log the procedure instead of running configured commands
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the distress gate and the effective policy table
    Policy,
    /// Send a test event through every configured notification channel
    NotifyTest,
}

fn init_tracing(format: OutputFormat, verbose: bool) {
    let default_filter = if verbose {
        "watchdog=debug,notify=debug"
    } else {
        "watchdog=info,notify=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // Results go to stdout; logs stay on stderr.
    match format {
        OutputFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init(),
        OutputFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

fn build_controller(
    config: &RecoveryConfig,
    dry_run: bool,
    notifier: Arc<Notifier>,
) -> Result<RecoveryController> {
    let actions = config
        .to_actions(dry_run)
        .context("Failed to build recovery policy")?;
    let controller =
        RecoveryController::with_policy(config.distress_gate.clone(), actions, notifier)
            .context("Failed to register recovery policy")?
            .notify_on_recovery(config.notify_on_recovery);
    Ok(controller)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.format, cli.verbose);

    let config = RecoveryConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config))?;

    match cli.command {
        Commands::Run {
            source,
            interval_secs,
            dry_run,
            replay_clock,
        } => {
            let notifier = Arc::new(Notifier::from_env());
            let controller = Arc::new(build_controller(&config, dry_run, Arc::clone(&notifier))?);
            let source = SnapshotSource::open(&source).await?;

            info!(
                interval_secs,
                dry_run,
                replay_clock,
                actions = controller.policy().len(),
                "Watchdog started"
            );
            let format = cli.format;
            let summary = run_scheduler(
                controller,
                source,
                SchedulerOptions {
                    interval: Duration::from_secs(interval_secs),
                    replay_clock,
                },
                tokio::signal::ctrl_c(),
                move |result: &EvaluationResult| print_result(result, format),
            )
            .await;
            notifier.flush().await;

            info!(
                evaluated = summary.evaluated,
                rejected = summary.rejected,
                malformed = summary.malformed,
                interrupted = summary.interrupted,
                "Watchdog stopped"
            );
        }
        Commands::Evaluate { snapshot, dry_run } => {
            let snapshot: MetricsSnapshot =
                serde_json::from_str(&snapshot).context("Failed to parse snapshot JSON")?;
            let notifier = Arc::new(Notifier::from_env());
            let controller = build_controller(&config, dry_run, Arc::clone(&notifier))?;

            let result = controller.evaluate(&snapshot).await;
            notifier.flush().await;
            let result = result.context("Snapshot rejected")?;
            print_result(&result, cli.format);
        }
        Commands::Policy => print_policy(&config, cli.format)?,
        Commands::NotifyTest => notify_test(cli.format).await?,
    }

    Ok(())
}

fn print_result(result: &EvaluationResult, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string(result) {
            Ok(json) => println!("{json}"),
            Err(e) => error!("Failed to serialize evaluation result: {e}"),
        },
        OutputFormat::Text => {
            let stamp = result.evaluated_at.format("%H:%M:%S");
            if !result.distressed {
                println!("{} {}", stamp, "healthy".green());
                return;
            }
            if result.entries.is_empty() {
                println!("{} {}", stamp, "distressed, no action over threshold".yellow());
                return;
            }
            println!("{} {}", stamp, "distressed".red().bold());
            for entry in &result.entries {
                let outcome = match entry.outcome {
                    ActionOutcome::Success => "success".green(),
                    ActionOutcome::Failed => "failed".red(),
                    ActionOutcome::SkippedCooldown => "skipped (cooldown)".dimmed(),
                    ActionOutcome::SkippedInFlight => "skipped (in flight)".dimmed(),
                };
                let mut line = format!("  {:<18} {outcome}", entry.kind.as_str());
                if let Some(ms) = entry.duration_ms {
                    let _ = write!(line, " in {ms}ms");
                }
                if let Some(secs) = entry.cooldown_remaining_secs {
                    let _ = write!(line, ", {secs}s left");
                }
                if let Some(error) = &entry.error {
                    let _ = write!(line, ": {error}");
                }
                println!("{line}");
            }
        }
    }
}

fn print_policy(config: &RecoveryConfig, format: OutputFormat) -> Result<()> {
    let actions = config.to_actions(true)?;

    match format {
        OutputFormat::Json => {
            let policy: Vec<_> = actions.iter().map(|a| a.policy()).collect();
            let json = serde_json::json!({
                "distressGate": config.distress_gate,
                "notifyOnRecovery": config.notify_on_recovery,
                "actions": policy,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            let gate = &config.distress_gate;
            println!("{}", "Distress gate".cyan().bold());
            println!(
                "  cpu > {}%  memory > {}%  disk > {}%  response time > {}ms",
                gate.cpu_percent, gate.memory_percent, gate.disk_percent, gate.response_time_ms
            );
            println!("{}", "Actions".cyan().bold());
            for action in &actions {
                println!(
                    "  {:<18} {} > {:<8} cooldown {}s, timeout {}s",
                    action.kind.as_str(),
                    action.dimension,
                    action.threshold,
                    action.cooldown.as_secs(),
                    action.timeout.as_secs()
                );
            }
        }
    }
    Ok(())
}

async fn notify_test(format: OutputFormat) -> Result<()> {
    let notifier = Notifier::from_env();
    if !notifier.has_channels() {
        bail!("No notification channels enabled");
    }

    let results = notifier
        .notify_and_wait(NotifyEvent::ActionFailed {
            action_kind: "notify-test".to_string(),
            error: "Test event from watchdog notify-test, no action was run".to_string(),
            timestamp: Utc::now(),
        })
        .await;

    let mut failed = 0;
    for (channel, result) in &results {
        match (format, result) {
            (OutputFormat::Json, Ok(())) => {
                println!("{}", serde_json::json!({"channel": channel, "ok": true}));
            }
            (OutputFormat::Json, Err(e)) => {
                println!(
                    "{}",
                    serde_json::json!({"channel": channel, "ok": false, "error": e.to_string()})
                );
            }
            (OutputFormat::Text, Ok(())) => println!("{} {channel}", "✓".green()),
            (OutputFormat::Text, Err(e)) => println!("{} {channel}: {e}", "✗".red()),
        }
        if result.is_err() {
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{failed} of {} channel(s) failed", results.len());
    }
    Ok(())
}
