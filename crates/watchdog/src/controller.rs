//! The recovery controller: distress gate, per-action thresholds, cooldown
//! claims, isolated effect execution and escalation.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use notify::{Notifier, NotifyEvent};
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::action::{ActionKind, ActionPolicy, RecoveryAction};
use crate::cooldown::{Claim, CooldownTracker};
use crate::error::{ActionExecutionError, RegistrationError, ValidationError};
use crate::gate::DistressGate;
use crate::snapshot::MetricsSnapshot;

/// What happened to one triggered action during an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionOutcome {
    Success,
    Failed,
    SkippedCooldown,
    SkippedInFlight,
}

/// Per-action line of an [`EvaluationResult`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionReport {
    pub kind: ActionKind,
    pub outcome: ActionOutcome,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_error"
    )]
    pub error: Option<ActionExecutionError>,
    /// Wall time the effect took; absent for skipped actions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Seconds left on the cooldown for `skipped-cooldown`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_secs: Option<u64>,
}

impl ActionReport {
    fn skipped(kind: ActionKind, outcome: ActionOutcome, remaining: Option<Duration>) -> Self {
        Self {
            kind,
            outcome,
            error: None,
            duration_ms: None,
            cooldown_remaining_secs: remaining.map(|r| r.as_secs()),
        }
    }

    /// True when the effect was actually invoked during this evaluation.
    #[must_use]
    pub fn was_executed(&self) -> bool {
        matches!(self.outcome, ActionOutcome::Success | ActionOutcome::Failed)
    }
}

fn serialize_error<S: Serializer>(
    error: &Option<ActionExecutionError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(error) => serializer.serialize_some(&error.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Outcome of one `evaluate` call. Always produced, even when actions fail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub evaluation_id: Uuid,
    pub evaluated_at: DateTime<Utc>,
    pub distressed: bool,
    /// Triggered actions only, in [`ActionKind::ALL`] order
    pub entries: Vec<ActionReport>,
}

impl EvaluationResult {
    fn new(evaluated_at: DateTime<Utc>, distressed: bool) -> Self {
        Self {
            evaluation_id: Uuid::new_v4(),
            evaluated_at,
            distressed,
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn entry(&self, kind: ActionKind) -> Option<&ActionReport> {
        self.entries.iter().find(|e| e.kind == kind)
    }

    #[must_use]
    pub fn outcome(&self, kind: ActionKind) -> Option<ActionOutcome> {
        self.entry(kind).map(|e| e.outcome)
    }

    #[must_use]
    pub fn executed(&self) -> usize {
        self.entries.iter().filter(|e| e.was_executed()).count()
    }

    #[must_use]
    pub fn failures(&self) -> impl Iterator<Item = &ActionReport> {
        self.entries
            .iter()
            .filter(|e| e.outcome == ActionOutcome::Failed)
    }
}

/// Where a kind currently sits in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum ActionPhase {
    Idle,
    InFlight,
    CoolingDown { remaining_secs: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionState {
    pub kind: ActionKind,
    #[serde(flatten)]
    pub phase: ActionPhase,
}

/// Evaluates snapshots against a registered policy and runs qualifying
/// mitigations.
///
/// Share one instance through an `Arc`; `evaluate` takes `&self` and may be
/// called from overlapping ticks.
pub struct RecoveryController {
    gate: DistressGate,
    registry: RwLock<BTreeMap<ActionKind, RecoveryAction>>,
    cooldowns: CooldownTracker,
    notifier: Arc<Notifier>,
    notify_on_recovery: bool,
}

impl RecoveryController {
    /// Controller with an empty policy.
    #[must_use]
    pub fn new(gate: DistressGate, notifier: Arc<Notifier>) -> Self {
        Self {
            gate,
            registry: RwLock::new(BTreeMap::new()),
            cooldowns: CooldownTracker::new(),
            notifier,
            notify_on_recovery: false,
        }
    }

    /// Controller seeded with an initial policy table.
    pub fn with_policy(
        gate: DistressGate,
        actions: impl IntoIterator<Item = RecoveryAction>,
        notifier: Arc<Notifier>,
    ) -> Result<Self, RegistrationError> {
        let controller = Self::new(gate, notifier);
        for action in actions {
            controller.register_action(action)?;
        }
        Ok(controller)
    }

    /// Also escalate successful mitigations as informational events.
    #[must_use]
    pub fn notify_on_recovery(mut self, enabled: bool) -> Self {
        self.notify_on_recovery = enabled;
        self
    }

    #[must_use]
    pub fn gate(&self) -> &DistressGate {
        &self.gate
    }

    /// Add a rule. Kinds are unique per controller.
    pub fn register_action(&self, action: RecoveryAction) -> Result<(), RegistrationError> {
        action.validate()?;

        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        if registry.contains_key(&action.kind) {
            return Err(RegistrationError::DuplicateAction(action.kind));
        }

        info!(
            kind = %action.kind,
            dimension = %action.dimension,
            threshold = action.threshold,
            cooldown_secs = action.cooldown.as_secs(),
            "Registered recovery action"
        );
        registry.insert(action.kind, action);
        Ok(())
    }

    /// Remove a rule; returns whether it was registered.
    pub fn unregister_action(&self, kind: ActionKind) -> bool {
        let removed = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&kind)
            .is_some();
        if removed {
            info!(kind = %kind, "Unregistered recovery action");
        }
        removed
    }

    #[must_use]
    pub fn policy(&self) -> Vec<ActionPolicy> {
        self.actions().iter().map(RecoveryAction::policy).collect()
    }

    fn actions(&self) -> Vec<RecoveryAction> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Clear all cooldown state. The registry is untouched.
    pub fn reset(&self) {
        self.cooldowns.reset();
        info!("Cooldown state reset");
    }

    /// Lifecycle phase of every registered kind at `now`.
    #[must_use]
    pub fn action_states(&self, now: DateTime<Utc>) -> Vec<ActionState> {
        self.actions()
            .iter()
            .map(|action| {
                let phase = if let Some(remaining) =
                    self.cooldowns.remaining(action.kind, action.cooldown, now)
                {
                    ActionPhase::CoolingDown {
                        remaining_secs: remaining.as_secs(),
                    }
                } else if self.cooldowns.is_in_flight(action.kind) {
                    ActionPhase::InFlight
                } else {
                    ActionPhase::Idle
                };
                ActionState {
                    kind: action.kind,
                    phase,
                }
            })
            .collect()
    }

    /// Evaluate a snapshot against the wall clock.
    pub async fn evaluate(
        &self,
        snapshot: &MetricsSnapshot,
    ) -> Result<EvaluationResult, ValidationError> {
        self.evaluate_at(snapshot, Utc::now()).await
    }

    /// Evaluate a snapshot with an explicit notion of "now" for cooldowns.
    ///
    /// `now` also stamps the result and every event escalated for this tick.
    ///
    /// Fails only on an invalid snapshot, in which case nothing runs. Effect
    /// failures are reported in the result and escalated, never returned.
    pub async fn evaluate_at(
        &self,
        snapshot: &MetricsSnapshot,
        now: DateTime<Utc>,
    ) -> Result<EvaluationResult, ValidationError> {
        if let Err(e) = snapshot.validate() {
            warn!(field = e.field, value = e.value, "Rejected metrics snapshot: {e}");
            return Err(e);
        }

        let breaches = self.gate.breaches(snapshot);
        let mut result = EvaluationResult::new(now, !breaches.is_empty());
        if breaches.is_empty() {
            debug!(snapshot = %snapshot.summary(), "System healthy, skipping policy");
            return Ok(result);
        }

        debug!(breaches = ?breaches, snapshot = %snapshot.summary(), "Distress gate open");

        let snapshot = Arc::new(snapshot.clone());
        let mut launched = Vec::new();

        for action in self.actions() {
            if !action.is_triggered(&snapshot) {
                continue;
            }

            match self.cooldowns.try_claim(action.kind, action.cooldown, now) {
                Claim::Granted(guard) => {
                    info!(
                        kind = %action.kind,
                        dimension = %action.dimension,
                        value = action.dimension.value(&snapshot),
                        threshold = action.threshold,
                        "Launching recovery action"
                    );
                    let kind = action.kind;
                    let snapshot = Arc::clone(&snapshot);
                    let handle = tokio::spawn(async move {
                        let _guard = guard;
                        let started = Instant::now();
                        let outcome =
                            tokio::time::timeout(action.timeout, action.effect.run(&snapshot))
                                .await;
                        (outcome, action.timeout, started.elapsed())
                    });
                    launched.push((kind, handle));
                }
                Claim::CoolingDown { remaining } => {
                    debug!(
                        kind = %action.kind,
                        remaining_secs = remaining.as_secs(),
                        "Recovery action cooling down"
                    );
                    result.entries.push(ActionReport::skipped(
                        action.kind,
                        ActionOutcome::SkippedCooldown,
                        Some(remaining),
                    ));
                }
                Claim::InFlight => {
                    debug!(kind = %action.kind, "Recovery action still running");
                    result.entries.push(ActionReport::skipped(
                        action.kind,
                        ActionOutcome::SkippedInFlight,
                        None,
                    ));
                }
            }
        }

        if !launched.is_empty() {
            self.notifier.notify(NotifyEvent::DistressDetected {
                summary: format!(
                    "{} over threshold ({}); launching {} recovery action(s)",
                    breaches.join(", "),
                    snapshot.summary(),
                    launched.len()
                ),
                timestamp: now,
            });
        }

        let (kinds, handles): (Vec<_>, Vec<_>) = launched.into_iter().unzip();
        for (kind, joined) in kinds.into_iter().zip(join_all(handles).await) {
            let report = match joined {
                Ok((Ok(Ok(())), _, elapsed)) => ActionReport {
                    kind,
                    outcome: ActionOutcome::Success,
                    error: None,
                    duration_ms: Some(millis(elapsed)),
                    cooldown_remaining_secs: None,
                },
                Ok((Ok(Err(e)), _, elapsed)) => self.failed(
                    ActionExecutionError::Failed {
                        kind,
                        message: format!("{e:#}"),
                    },
                    Some(elapsed),
                    now,
                ),
                Ok((Err(_), timeout, elapsed)) => self.failed(
                    ActionExecutionError::TimedOut { kind, timeout },
                    Some(elapsed),
                    now,
                ),
                Err(join_error) if join_error.is_panic() => self.failed(
                    ActionExecutionError::Panicked {
                        kind,
                        message: panic_message(join_error.into_panic().as_ref()),
                    },
                    None,
                    now,
                ),
                Err(join_error) => {
                    self.notifier.notify(NotifyEvent::ControllerFault {
                        message: format!("task running {kind} did not complete: {join_error}"),
                        timestamp: now,
                    });
                    self.failed(ActionExecutionError::Cancelled { kind }, None, now)
                }
            };

            if report.outcome == ActionOutcome::Success {
                info!(
                    kind = %kind,
                    duration_ms = report.duration_ms,
                    "Recovery action succeeded"
                );
                if self.notify_on_recovery {
                    self.notifier.notify(NotifyEvent::ActionRecovered {
                        action_kind: kind.to_string(),
                        duration_ms: report.duration_ms.unwrap_or_default(),
                        timestamp: now,
                    });
                }
            }
            result.entries.push(report);
        }

        result.entries.sort_by_key(|e| e.kind);
        Ok(result)
    }

    fn failed(
        &self,
        error: ActionExecutionError,
        elapsed: Option<Duration>,
        now: DateTime<Utc>,
    ) -> ActionReport {
        warn!(kind = %error.kind(), error = %error, "Recovery action failed");
        self.notifier.notify(NotifyEvent::ActionFailed {
            action_kind: error.kind().to_string(),
            error: error.to_string(),
            timestamp: now,
        });
        ActionReport {
            kind: error.kind(),
            outcome: ActionOutcome::Failed,
            error: Some(error),
            duration_ms: elapsed.map(millis),
            cooldown_remaining_secs: None,
        }
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
