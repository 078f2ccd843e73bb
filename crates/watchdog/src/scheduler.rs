//! Tick loop that feeds a snapshot source into a shared controller.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::controller::{EvaluationResult, RecoveryController};
use crate::source::SnapshotSource;

#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerOptions {
    /// Pause between ticks; zero evaluates back to back and in order
    pub interval: Duration,
    /// Use each snapshot's `capturedAt` as the cooldown clock
    pub replay_clock: bool,
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub evaluated: usize,
    /// Snapshots refused with a `ValidationError`
    pub rejected: usize,
    /// Lines that were not a snapshot at all
    pub malformed: usize,
    /// Stopped by the shutdown signal rather than end of input
    pub interrupted: bool,
}

impl RunSummary {
    fn record(&mut self, accepted: bool) {
        if accepted {
            self.evaluated += 1;
        } else {
            self.rejected += 1;
        }
    }

    fn record_joined(&mut self, joined: Result<bool, JoinError>) {
        match joined {
            Ok(accepted) => self.record(accepted),
            Err(e) => error!("Evaluation task failed: {e}"),
        }
    }
}

/// Evaluate snapshots until the source runs dry or `shutdown` resolves.
///
/// `shutdown` is raced against both the tick wait and the source read, so a
/// quiet source never delays it. With a non-zero interval each tick is
/// spawned and a slow mitigation cannot hold up the next one; overlap is
/// left to the controller's claims. Running evaluations are awaited before
/// returning.
pub async fn run_scheduler<S, F>(
    controller: Arc<RecoveryController>,
    mut source: SnapshotSource,
    options: SchedulerOptions,
    shutdown: S,
    on_result: F,
) -> RunSummary
where
    S: Future,
    F: Fn(&EvaluationResult) + Send + Sync + 'static,
{
    let on_result = Arc::new(on_result);
    let mut ticker = (!options.interval.is_zero()).then(|| {
        let mut ticker = tokio::time::interval(options.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });
    tokio::pin!(shutdown);
    let mut ticks = JoinSet::new();
    let mut summary = RunSummary::default();

    loop {
        let next = tokio::select! {
            _ = &mut shutdown => {
                summary.interrupted = true;
                break;
            }
            next = async {
                if let Some(ticker) = ticker.as_mut() {
                    ticker.tick().await;
                }
                source.next_snapshot().await
            } => next,
        };

        let snapshot = match next {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                info!("Snapshot source exhausted");
                break;
            }
            Err(e) => {
                warn!("Skipping snapshot: {e:#}");
                summary.malformed += 1;
                continue;
            }
        };

        let controller = Arc::clone(&controller);
        let on_result = Arc::clone(&on_result);
        let replay_clock = options.replay_clock;
        let tick = async move {
            let now = if replay_clock {
                snapshot.captured_at
            } else {
                Utc::now()
            };
            match controller.evaluate_at(&snapshot, now).await {
                Ok(result) => {
                    (*on_result)(&result);
                    true
                }
                Err(e) => {
                    warn!("Skipping invalid snapshot: {e}");
                    false
                }
            }
        };

        if ticker.is_some() {
            ticks.spawn(tick);
        } else {
            summary.record(tick.await);
        }

        while let Some(joined) = ticks.try_join_next() {
            summary.record_joined(joined);
        }
    }

    if summary.interrupted {
        info!(running = ticks.len(), "Interrupted, waiting for running evaluations");
    }
    while let Some(joined) = ticks.join_next().await {
        summary.record_joined(joined);
    }
    summary
}
