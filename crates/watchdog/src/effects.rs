//! Stock effect implementations the CLI wires into the policy.
//!
//! Real mitigation (restarting processes, calling an autoscaler) belongs to
//! whatever command an operator configures; the watchdog only runs it.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::action::{ActionKind, RecoveryEffect};
use crate::snapshot::MetricsSnapshot;

/// Dry-run effect: logs the procedure for its kind without touching anything.
#[derive(Debug, Clone)]
pub struct LogEffect {
    kind: ActionKind,
    step_delay: Duration,
}

impl LogEffect {
    #[must_use]
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            step_delay: Duration::ZERO,
        }
    }

    /// Pause between steps, to mimic a long-running mitigation.
    #[must_use]
    pub fn with_step_delay(mut self, step_delay: Duration) -> Self {
        self.step_delay = step_delay;
        self
    }

    /// Ordered procedure steps for a kind.
    #[must_use]
    pub fn steps(kind: ActionKind) -> &'static [&'static str] {
        match kind {
            ActionKind::RestartService => &["graceful shutdown", "start service"],
            ActionKind::ScaleResources => &[
                "analyze resource requirements",
                "allocate additional resources",
            ],
            ActionKind::CleanupMemory => &["identify memory leaks", "reclaim memory"],
            ActionKind::OptimizeDatabase => &[
                "analyze database performance",
                "optimize queries and indexes",
            ],
            ActionKind::EmergencyBackup => &["take emergency backup", "verify backup integrity"],
        }
    }
}

#[async_trait]
impl RecoveryEffect for LogEffect {
    async fn run(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        for step in Self::steps(self.kind) {
            info!(kind = %self.kind, step, dry_run = true, "Recovery step");
            if !self.step_delay.is_zero() {
                tokio::time::sleep(self.step_delay).await;
            }
        }
        debug!(kind = %self.kind, snapshot = %snapshot.summary(), "Dry-run recovery finished");
        Ok(())
    }
}

/// Runs an operator-supplied command; a non-zero exit is a failure.
///
/// The child is killed if the controller drops the future on timeout.
#[derive(Debug, Clone)]
pub struct CommandEffect {
    kind: ActionKind,
    argv: Vec<String>,
}

impl CommandEffect {
    pub fn new(kind: ActionKind, argv: Vec<String>) -> Result<Self> {
        if argv.first().map_or(true, |program| program.trim().is_empty()) {
            bail!("command for {kind} must name a program");
        }
        Ok(Self { kind, argv })
    }
}

#[async_trait]
impl RecoveryEffect for CommandEffect {
    async fn run(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        let (program, args) = self
            .argv
            .split_first()
            .context("command must name a program")?;

        info!(kind = %self.kind, program = %program, "Running recovery command");

        let output = Command::new(program)
            .args(args)
            .env("WATCHDOG_ACTION", self.kind.as_str())
            .env("WATCHDOG_CPU_USAGE", snapshot.cpu_usage.to_string())
            .env("WATCHDOG_MEMORY_USAGE", snapshot.memory_usage.to_string())
            .env("WATCHDOG_DISK_SPACE", snapshot.disk_space.to_string())
            .env(
                "WATCHDOG_RESPONSE_TIME_MS",
                snapshot.response_time_ms.to_string(),
            )
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn {program}"))?;

        if output.status.success() {
            debug!(kind = %self.kind, "Recovery command exited cleanly");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            bail!("{program} exited with {}", output.status);
        }
        bail!("{program} exited with {}: {stderr}", output.status)
    }
}
