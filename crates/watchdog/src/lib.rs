//! Threshold-triggered, cooldown-gated recovery controller.
//!
//! A host scheduler hands a [`MetricsSnapshot`] to
//! [`RecoveryController::evaluate`] on every tick. The controller:
//!
//! 1. rejects out-of-range snapshots with a [`ValidationError`];
//! 2. stops early unless the [`DistressGate`] is open;
//! 3. for each registered [`RecoveryAction`] whose threshold is exceeded,
//!    atomically claims its cooldown and runs its effect under a timeout;
//! 4. escalates failures through a [`notify::Notifier`] and returns an
//!    [`EvaluationResult`] describing every triggered action.
//!
//! ```no_run
//! use std::sync::Arc;
//! use watchdog::{MetricsSnapshot, RecoveryConfig, RecoveryController};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = RecoveryConfig::default();
//! let controller = RecoveryController::with_policy(
//!     config.distress_gate.clone(),
//!     config.to_actions(true)?,
//!     Arc::new(notify::Notifier::from_env()),
//! )?;
//!
//! let result = controller
//!     .evaluate(&MetricsSnapshot::new(95.0, 50.0, 50.0, 100.0))
//!     .await?;
//! println!("{}", serde_json::to_string(&result)?);
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod config;
pub mod controller;
pub mod cooldown;
pub mod effects;
pub mod error;
pub mod gate;
pub mod scheduler;
pub mod snapshot;
pub mod source;

pub use action::{effect_fn, ActionKind, ActionPolicy, RecoveryAction, RecoveryEffect};
pub use config::{ActionConfig, RecoveryConfig};
pub use controller::{
    ActionOutcome, ActionPhase, ActionReport, ActionState, EvaluationResult, RecoveryController,
};
pub use cooldown::CooldownTracker;
pub use error::{
    ActionExecutionError, ConfigError, GateError, RegistrationError, ValidationError,
};
pub use gate::DistressGate;
pub use scheduler::{run_scheduler, RunSummary, SchedulerOptions};
pub use snapshot::{Dimension, MetricsSnapshot};
pub use source::SnapshotSource;
