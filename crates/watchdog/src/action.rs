//! Recovery actions: what to watch, when to fire, and what to run.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::RegistrationError;
use crate::snapshot::{Dimension, MetricsSnapshot};

/// Default minimum interval between two runs of the same kind.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);

/// Default upper bound on a single effect run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Mitigation kinds the controller knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    RestartService,
    ScaleResources,
    CleanupMemory,
    OptimizeDatabase,
    EmergencyBackup,
}

impl ActionKind {
    /// Every kind, in reporting order.
    pub const ALL: [Self; 5] = [
        Self::RestartService,
        Self::ScaleResources,
        Self::CleanupMemory,
        Self::OptimizeDatabase,
        Self::EmergencyBackup,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RestartService => "restart-service",
            Self::ScaleResources => "scale-resources",
            Self::CleanupMemory => "cleanup-memory",
            Self::OptimizeDatabase => "optimize-database",
            Self::EmergencyBackup => "emergency-backup",
        }
    }

    /// The metric this kind reacts to unless configured otherwise.
    #[must_use]
    pub fn default_dimension(self) -> Dimension {
        match self {
            Self::RestartService => Dimension::Cpu,
            Self::ScaleResources | Self::CleanupMemory => Dimension::Memory,
            Self::OptimizeDatabase => Dimension::ResponseTime,
            Self::EmergencyBackup => Dimension::Disk,
        }
    }

    /// Trigger value used by the stock policy table.
    #[must_use]
    pub fn default_threshold(self) -> f64 {
        match self {
            Self::RestartService => 90.0,
            Self::ScaleResources => 85.0,
            Self::CleanupMemory => 80.0,
            Self::OptimizeDatabase => 3000.0,
            Self::EmergencyBackup => 95.0,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side-effecting work run when an action fires.
///
/// Implementations must tolerate being invoked again after a cooldown.
#[async_trait]
pub trait RecoveryEffect: Send + Sync {
    async fn run(&self, snapshot: &MetricsSnapshot) -> anyhow::Result<()>;
}

/// Effect backed by a closure returning a future.
pub struct FnEffect<F> {
    f: F,
}

/// Wrap an async closure as a [`RecoveryEffect`].
///
/// ```
/// use watchdog::action::effect_fn;
///
/// let effect = effect_fn(|| async { Ok(()) });
/// # let _ = effect;
/// ```
pub fn effect_fn<F, Fut>(f: F) -> Arc<dyn RecoveryEffect>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnEffect {
        f: move || -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(f()) },
    })
}

#[async_trait]
impl<F> RecoveryEffect for FnEffect<F>
where
    F: Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync,
{
    async fn run(&self, _snapshot: &MetricsSnapshot) -> anyhow::Result<()> {
        (self.f)().await
    }
}

/// A registered policy rule.
#[derive(Clone)]
pub struct RecoveryAction {
    pub kind: ActionKind,
    pub dimension: Dimension,
    pub threshold: f64,
    pub cooldown: Duration,
    pub timeout: Duration,
    pub effect: Arc<dyn RecoveryEffect>,
}

impl RecoveryAction {
    /// Stock rule for `kind` with the given effect.
    #[must_use]
    pub fn new(kind: ActionKind, effect: Arc<dyn RecoveryEffect>) -> Self {
        Self {
            kind,
            dimension: kind.default_dimension(),
            threshold: kind.default_threshold(),
            cooldown: DEFAULT_COOLDOWN,
            timeout: DEFAULT_TIMEOUT,
            effect,
        }
    }

    #[must_use]
    pub fn with_dimension(mut self, dimension: Dimension) -> Self {
        self.dimension = dimension;
        self
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Strictly-greater-than trigger on the bound dimension.
    #[must_use]
    pub fn is_triggered(&self, snapshot: &MetricsSnapshot) -> bool {
        self.dimension.value(snapshot) > self.threshold
    }

    /// Registration-time sanity checks.
    pub fn validate(&self) -> Result<(), RegistrationError> {
        validate_rule(self.kind, self.dimension, self.threshold, self.timeout)
    }

    #[must_use]
    pub fn policy(&self) -> ActionPolicy {
        ActionPolicy {
            kind: self.kind,
            dimension: self.dimension,
            threshold: self.threshold,
            cooldown_secs: self.cooldown.as_secs(),
            timeout_secs: self.timeout.as_secs(),
        }
    }
}

impl fmt::Debug for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryAction")
            .field("kind", &self.kind)
            .field("dimension", &self.dimension)
            .field("threshold", &self.threshold)
            .field("cooldown", &self.cooldown)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

pub(crate) fn validate_rule(
    kind: ActionKind,
    dimension: Dimension,
    threshold: f64,
    timeout: Duration,
) -> Result<(), RegistrationError> {
    let invalid = |reason| RegistrationError::InvalidThreshold {
        kind,
        threshold,
        reason,
    };

    if !threshold.is_finite() {
        return Err(invalid("must be a finite number"));
    }
    if threshold < 0.0 {
        return Err(invalid("must not be negative"));
    }
    if dimension.is_percentage() && threshold > 100.0 {
        return Err(invalid("percentage threshold must be within 0-100"));
    }
    if timeout.is_zero() {
        return Err(RegistrationError::InvalidTimeout(kind));
    }
    Ok(())
}

/// Read-only view of a registered rule, without its effect.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionPolicy {
    pub kind: ActionKind,
    pub dimension: Dimension,
    pub threshold: f64,
    pub cooldown_secs: u64,
    pub timeout_secs: u64,
}
