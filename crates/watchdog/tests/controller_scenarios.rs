//! End-to-end scenarios for the recovery controller.
//!
//! Cooldown timing uses `evaluate_at` with a fixed base instant so nothing
//! here depends on the wall clock except the timeout and overlap cases.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify::{NotificationError, Notifier, NotifyChannel, NotifyEvent};
use tokio::sync::Notify;
use watchdog::{
    effect_fn, ActionExecutionError, ActionKind, ActionOutcome, ActionPhase, DistressGate,
    MetricsSnapshot, RecoveryAction, RecoveryConfig, RecoveryController, RecoveryEffect,
};

// =============================================================================
// Helpers
// =============================================================================

fn t(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

fn snapshot(cpu: f64, memory: f64, disk: f64, response_time_ms: f64) -> MetricsSnapshot {
    MetricsSnapshot::new(cpu, memory, disk, response_time_ms)
}

fn counting_effect(runs: &Arc<AtomicUsize>) -> Arc<dyn RecoveryEffect> {
    let runs = Arc::clone(runs);
    effect_fn(move || {
        let runs = Arc::clone(&runs);
        async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

fn failing_effect(message: &'static str) -> Arc<dyn RecoveryEffect> {
    effect_fn(move || async move { Err::<(), _>(anyhow::anyhow!(message)) })
}

fn notifier_for(channel: &Arc<RecordingChannel>) -> Arc<Notifier> {
    let channel: Arc<dyn NotifyChannel> = channel.clone();
    Arc::new(Notifier::with_channels(vec![channel]))
}

fn controller_with(actions: Vec<RecoveryAction>, notifier: Arc<Notifier>) -> RecoveryController {
    RecoveryController::with_policy(DistressGate::default(), actions, notifier).unwrap()
}

/// Channel that keeps every event it is handed.
#[derive(Default)]
struct RecordingChannel {
    events: Mutex<Vec<NotifyEvent>>,
    fail: bool,
}

impl RecordingChannel {
    fn failing() -> Self {
        Self {
            events: Mutex::default(),
            fail: true,
        }
    }

    fn events(&self) -> Vec<NotifyEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotifyChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn enabled(&self) -> bool {
        true
    }

    async fn send(&self, event: &NotifyEvent) -> Result<(), NotificationError> {
        self.events.lock().unwrap().push(event.clone());
        if self.fail {
            return Err(NotificationError::Rejected {
                status: 500,
                body: "webhook down".to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Distress gate
// =============================================================================

#[tokio::test]
async fn test_healthy_snapshot_attempts_nothing() {
    let runs = Arc::new(AtomicUsize::new(0));
    let controller = controller_with(
        ActionKind::ALL
            .into_iter()
            .map(|kind| RecoveryAction::new(kind, counting_effect(&runs)))
            .collect(),
        Arc::new(Notifier::disabled()),
    );

    // Every value sits at or under the gate.
    let result = controller
        .evaluate_at(&snapshot(90.0, 90.0, 95.0, 5000.0), t(0))
        .await
        .unwrap();

    assert!(!result.distressed);
    assert!(result.entries.is_empty());
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(controller
        .action_states(t(0))
        .iter()
        .all(|s| s.phase == ActionPhase::Idle));
}

#[tokio::test]
async fn test_distressed_but_nothing_over_threshold() {
    let runs = Arc::new(AtomicUsize::new(0));
    let controller = controller_with(
        vec![RecoveryAction::new(ActionKind::RestartService, counting_effect(&runs))],
        Arc::new(Notifier::disabled()),
    );

    // Gate opens on disk, but only restart-service is registered.
    let result = controller
        .evaluate_at(&snapshot(10.0, 10.0, 99.0, 100.0), t(0))
        .await
        .unwrap();

    assert!(result.distressed);
    assert!(result.entries.is_empty());
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_high_cpu_restarts_and_stamps() {
    let controller = RecoveryController::with_policy(
        DistressGate::default(),
        RecoveryConfig::default().to_actions(true).unwrap(),
        Arc::new(Notifier::disabled()),
    )
    .unwrap();

    let result = controller
        .evaluate_at(&snapshot(95.0, 50.0, 50.0, 100.0), t(0))
        .await
        .unwrap();

    assert!(result.distressed);
    assert_eq!(result.evaluated_at, t(0));
    let kinds: Vec<_> = result.entries.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![ActionKind::RestartService]);
    assert_eq!(
        result.outcome(ActionKind::RestartService),
        Some(ActionOutcome::Success)
    );
    // Memory at 50 is under the 85 scale-resources threshold.
    assert!(result.entry(ActionKind::ScaleResources).is_none());
    assert_eq!(result.executed(), 1);

    let states = controller.action_states(t(0));
    assert_eq!(states[0].kind, ActionKind::RestartService);
    assert_eq!(
        states[0].phase,
        ActionPhase::CoolingDown {
            remaining_secs: 300
        }
    );
    assert!(states[1..].iter().all(|s| s.phase == ActionPhase::Idle));
}

// =============================================================================
// Cooldowns
// =============================================================================

#[tokio::test]
async fn test_cooldown_blocks_then_releases() {
    let runs = Arc::new(AtomicUsize::new(0));
    let controller = controller_with(
        vec![RecoveryAction::new(ActionKind::RestartService, counting_effect(&runs))
            .with_cooldown(Duration::from_secs(300))],
        Arc::new(Notifier::disabled()),
    );
    let hot = snapshot(95.0, 50.0, 50.0, 100.0);

    let first = controller.evaluate_at(&hot, t(0)).await.unwrap();
    assert_eq!(
        first.outcome(ActionKind::RestartService),
        Some(ActionOutcome::Success)
    );

    let second = controller.evaluate_at(&hot, t(60)).await.unwrap();
    let entry = second.entry(ActionKind::RestartService).unwrap();
    assert_eq!(entry.outcome, ActionOutcome::SkippedCooldown);
    assert_eq!(entry.cooldown_remaining_secs, Some(240));
    assert!(!entry.was_executed());
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let third = controller.evaluate_at(&hot, t(301)).await.unwrap();
    assert_eq!(
        third.outcome(ActionKind::RestartService),
        Some(ActionOutcome::Success)
    );
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cooldown_boundary_is_inclusive() {
    let runs = Arc::new(AtomicUsize::new(0));
    let controller = controller_with(
        vec![RecoveryAction::new(ActionKind::EmergencyBackup, counting_effect(&runs))
            .with_cooldown(Duration::from_secs(120))],
        Arc::new(Notifier::disabled()),
    );
    let full_disk = snapshot(10.0, 10.0, 99.0, 100.0);

    controller.evaluate_at(&full_disk, t(0)).await.unwrap();
    let at_boundary = controller.evaluate_at(&full_disk, t(120)).await.unwrap();

    assert_eq!(
        at_boundary.outcome(ActionKind::EmergencyBackup),
        Some(ActionOutcome::Success)
    );
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_attempt_still_starts_cooldown() {
    let controller = controller_with(
        vec![RecoveryAction::new(
            ActionKind::CleanupMemory,
            failing_effect("allocator refused"),
        )],
        Arc::new(Notifier::disabled()),
    );
    let hot = snapshot(10.0, 95.0, 10.0, 100.0);

    let first = controller.evaluate_at(&hot, t(0)).await.unwrap();
    assert_eq!(
        first.outcome(ActionKind::CleanupMemory),
        Some(ActionOutcome::Failed)
    );

    let retry = controller.evaluate_at(&hot, t(10)).await.unwrap();
    assert_eq!(
        retry.outcome(ActionKind::CleanupMemory),
        Some(ActionOutcome::SkippedCooldown)
    );
}

#[tokio::test]
async fn test_reset_clears_cooldowns() {
    let runs = Arc::new(AtomicUsize::new(0));
    let controller = controller_with(
        vec![RecoveryAction::new(ActionKind::RestartService, counting_effect(&runs))],
        Arc::new(Notifier::disabled()),
    );
    let hot = snapshot(95.0, 50.0, 50.0, 100.0);

    controller.evaluate_at(&hot, t(0)).await.unwrap();
    controller.reset();
    let again = controller.evaluate_at(&hot, t(1)).await.unwrap();

    assert_eq!(
        again.outcome(ActionKind::RestartService),
        Some(ActionOutcome::Success)
    );
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Isolation and timeouts
// =============================================================================

#[tokio::test]
async fn test_one_failure_does_not_block_others() {
    let runs = Arc::new(AtomicUsize::new(0));
    let controller = controller_with(
        vec![
            RecoveryAction::new(ActionKind::ScaleResources, failing_effect("quota exceeded")),
            RecoveryAction::new(ActionKind::CleanupMemory, counting_effect(&runs)),
        ],
        Arc::new(Notifier::disabled()),
    );

    let result = controller
        .evaluate_at(&snapshot(10.0, 95.0, 10.0, 100.0), t(0))
        .await
        .unwrap();

    let kinds: Vec<_> = result.entries.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![ActionKind::ScaleResources, ActionKind::CleanupMemory]
    );

    let scale = result.entry(ActionKind::ScaleResources).unwrap();
    assert_eq!(scale.outcome, ActionOutcome::Failed);
    assert!(matches!(
        scale.error,
        Some(ActionExecutionError::Failed { ref message, .. }) if message == "quota exceeded"
    ));
    assert_eq!(
        result.outcome(ActionKind::CleanupMemory),
        Some(ActionOutcome::Success)
    );
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(result.failures().count(), 1);
}

#[tokio::test]
async fn test_slow_effect_times_out() {
    let slow = effect_fn(|| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    });
    let controller = controller_with(
        vec![RecoveryAction::new(ActionKind::OptimizeDatabase, slow)
            .with_timeout(Duration::from_millis(50))],
        Arc::new(Notifier::disabled()),
    );

    let result = controller
        .evaluate_at(&snapshot(10.0, 10.0, 10.0, 8000.0), t(0))
        .await
        .unwrap();

    let entry = result.entry(ActionKind::OptimizeDatabase).unwrap();
    assert_eq!(entry.outcome, ActionOutcome::Failed);
    assert!(matches!(
        entry.error,
        Some(ActionExecutionError::TimedOut { timeout, .. }) if timeout == Duration::from_millis(50)
    ));
    assert_eq!(
        controller.action_states(t(1))[0].phase,
        ActionPhase::CoolingDown {
            remaining_secs: 299
        }
    );
}

#[tokio::test]
async fn test_overlapping_ticks_never_double_fire() {
    let runs = Arc::new(AtomicUsize::new(0));
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());

    let effect = {
        let (runs, started, release) = (runs.clone(), started.clone(), release.clone());
        effect_fn(move || {
            let (runs, started, release) = (runs.clone(), started.clone(), release.clone());
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                started.notify_one();
                release.notified().await;
                Ok(())
            }
        })
    };
    let controller = Arc::new(controller_with(
        vec![RecoveryAction::new(ActionKind::RestartService, effect)
            .with_cooldown(Duration::from_secs(10))],
        Arc::new(Notifier::disabled()),
    ));
    let hot = snapshot(95.0, 50.0, 50.0, 100.0);

    let first = tokio::spawn({
        let controller = Arc::clone(&controller);
        let hot = hot.clone();
        async move { controller.evaluate_at(&hot, t(0)).await }
    });
    started.notified().await;

    assert_eq!(
        controller.action_states(t(30))[0].phase,
        ActionPhase::InFlight
    );

    // Cooldown has elapsed but the first run is still going.
    let overlapping = controller.evaluate_at(&hot, t(30)).await.unwrap();
    assert_eq!(
        overlapping.outcome(ActionKind::RestartService),
        Some(ActionOutcome::SkippedInFlight)
    );

    release.notify_one();
    let first = first.await.unwrap().unwrap();
    assert_eq!(
        first.outcome(ActionKind::RestartService),
        Some(ActionOutcome::Success)
    );
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(controller.action_states(t(30))[0].phase, ActionPhase::Idle);
}

#[tokio::test]
async fn test_running_action_inside_window_reports_cooldown() {
    let runs = Arc::new(AtomicUsize::new(0));
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());

    let effect = {
        let (runs, started, release) = (runs.clone(), started.clone(), release.clone());
        effect_fn(move || {
            let (runs, started, release) = (runs.clone(), started.clone(), release.clone());
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                started.notify_one();
                release.notified().await;
                Ok(())
            }
        })
    };
    let controller = Arc::new(controller_with(
        vec![RecoveryAction::new(ActionKind::RestartService, effect)
            .with_cooldown(Duration::from_secs(300))],
        Arc::new(Notifier::disabled()),
    ));
    let hot = snapshot(95.0, 50.0, 50.0, 100.0);

    let first = tokio::spawn({
        let controller = Arc::clone(&controller);
        let hot = hot.clone();
        async move { controller.evaluate_at(&hot, t(0)).await }
    });
    started.notified().await;

    let second = controller.evaluate_at(&hot, t(60)).await.unwrap();
    let entry = second.entry(ActionKind::RestartService).unwrap();
    assert_eq!(entry.outcome, ActionOutcome::SkippedCooldown);
    assert_eq!(entry.cooldown_remaining_secs, Some(240));
    assert_eq!(
        controller.action_states(t(60))[0].phase,
        ActionPhase::CoolingDown {
            remaining_secs: 240
        }
    );

    release.notify_one();
    first.await.unwrap().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_out_of_range_snapshots_rejected() {
    let runs = Arc::new(AtomicUsize::new(0));
    let controller = controller_with(
        vec![RecoveryAction::new(ActionKind::RestartService, counting_effect(&runs))],
        Arc::new(Notifier::disabled()),
    );

    let err = controller
        .evaluate_at(&snapshot(-5.0, 10.0, 10.0, 100.0), t(0))
        .await
        .unwrap_err();
    assert_eq!(err.field, "cpuUsage");

    let err = controller
        .evaluate_at(&snapshot(95.0, 150.0, 10.0, 100.0), t(0))
        .await
        .unwrap_err();
    assert_eq!(err.field, "memoryUsage");

    assert!(controller
        .evaluate_at(&snapshot(95.0, 10.0, 10.0, f64::NAN), t(0))
        .await
        .is_err());

    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(controller.action_states(t(0))[0].phase, ActionPhase::Idle);
}

#[tokio::test]
async fn test_boundary_values_accepted() {
    let controller = controller_with(vec![], Arc::new(Notifier::disabled()));
    let result = controller
        .evaluate_at(&snapshot(0.0, 100.0, 100.0, 0.0), t(0))
        .await
        .unwrap();
    assert!(result.distressed);
    assert!(result.entries.is_empty());
}

// =============================================================================
// Escalation
// =============================================================================

#[tokio::test]
async fn test_failure_is_escalated() {
    let channel = Arc::new(RecordingChannel::default());
    let notifier = notifier_for(&channel);
    let controller = controller_with(
        vec![RecoveryAction::new(
            ActionKind::EmergencyBackup,
            failing_effect("snapshot volume missing"),
        )],
        Arc::clone(&notifier),
    );

    controller
        .evaluate_at(&snapshot(10.0, 10.0, 99.0, 100.0), t(0))
        .await
        .unwrap();
    notifier.flush().await;

    let events = channel.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, NotifyEvent::DistressDetected { .. })));
    let failed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            NotifyEvent::ActionFailed {
                action_kind, error, ..
            } => Some((action_kind.clone(), error.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, "emergency-backup");
    assert!(failed[0].1.contains("snapshot volume missing"));
}

#[tokio::test]
async fn test_recovery_events_are_opt_in() {
    let channel = Arc::new(RecordingChannel::default());
    let notifier = notifier_for(&channel);
    let runs = Arc::new(AtomicUsize::new(0));
    let hot = snapshot(95.0, 50.0, 50.0, 100.0);

    let quiet = controller_with(
        vec![RecoveryAction::new(ActionKind::RestartService, counting_effect(&runs))],
        Arc::clone(&notifier),
    );
    quiet.evaluate_at(&hot, t(0)).await.unwrap();
    notifier.flush().await;
    assert!(!channel
        .events()
        .iter()
        .any(|e| matches!(e, NotifyEvent::ActionRecovered { .. })));

    let chatty = controller_with(
        vec![RecoveryAction::new(ActionKind::RestartService, counting_effect(&runs))],
        Arc::clone(&notifier),
    )
    .notify_on_recovery(true);
    chatty.evaluate_at(&hot, t(0)).await.unwrap();
    notifier.flush().await;
    assert!(channel.events().iter().any(|e| matches!(
        e,
        NotifyEvent::ActionRecovered { action_kind, .. } if action_kind == "restart-service"
    )));
}

#[tokio::test]
async fn test_events_carry_the_evaluation_clock() {
    let channel = Arc::new(RecordingChannel::default());
    let notifier = notifier_for(&channel);
    let runs = Arc::new(AtomicUsize::new(0));
    let controller = controller_with(
        vec![
            RecoveryAction::new(ActionKind::ScaleResources, failing_effect("no capacity")),
            RecoveryAction::new(ActionKind::CleanupMemory, counting_effect(&runs)),
        ],
        Arc::clone(&notifier),
    )
    .notify_on_recovery(true);

    // A replayed tick from well in the past.
    controller
        .evaluate_at(&snapshot(10.0, 95.0, 10.0, 100.0), t(0))
        .await
        .unwrap();
    notifier.flush().await;

    let events = channel.events();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.timestamp() == t(0)), "{events:?}");
}

#[tokio::test]
async fn test_broken_notifier_does_not_change_result() {
    let channel = Arc::new(RecordingChannel::failing());
    let notifier = notifier_for(&channel);
    let runs = Arc::new(AtomicUsize::new(0));
    let controller = controller_with(
        vec![
            RecoveryAction::new(ActionKind::ScaleResources, failing_effect("no capacity")),
            RecoveryAction::new(ActionKind::CleanupMemory, counting_effect(&runs)),
        ],
        Arc::clone(&notifier),
    );

    let result = controller
        .evaluate_at(&snapshot(10.0, 95.0, 10.0, 100.0), t(0))
        .await
        .unwrap();
    notifier.flush().await;

    assert_eq!(result.entries.len(), 2);
    assert_eq!(
        result.outcome(ActionKind::ScaleResources),
        Some(ActionOutcome::Failed)
    );
    assert_eq!(
        result.outcome(ActionKind::CleanupMemory),
        Some(ActionOutcome::Success)
    );
    // The channel was still tried for every event.
    assert!(channel.events().len() >= 2);
}

#[tokio::test]
async fn test_calm_tick_sends_nothing() {
    let channel = Arc::new(RecordingChannel::default());
    let notifier = notifier_for(&channel);
    let controller = RecoveryController::with_policy(
        DistressGate::default(),
        RecoveryConfig::default().to_actions(true).unwrap(),
        Arc::clone(&notifier),
    )
    .unwrap();

    controller
        .evaluate_at(&snapshot(20.0, 30.0, 40.0, 150.0), t(0))
        .await
        .unwrap();
    notifier.flush().await;

    assert!(channel.events().is_empty());
}

// =============================================================================
// Stock policy
// =============================================================================

#[tokio::test]
async fn test_stock_policy_reacts_to_memory_pressure() {
    let controller = RecoveryController::with_policy(
        DistressGate::default(),
        RecoveryConfig::default().to_actions(true).unwrap(),
        Arc::new(Notifier::disabled()),
    )
    .unwrap();

    let result = controller
        .evaluate_at(&snapshot(50.0, 92.0, 50.0, 100.0), t(0))
        .await
        .unwrap();

    let kinds: Vec<_> = result.entries.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![ActionKind::ScaleResources, ActionKind::CleanupMemory]
    );
    assert_eq!(result.executed(), 2);

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["distressed"], true);
    assert_eq!(json["entries"][0]["kind"], "scale-resources");
    assert_eq!(json["entries"][0]["outcome"], "success");
}
