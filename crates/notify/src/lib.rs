//! Escalation channels for the recovery watchdog.
//!
//! This crate provides a fire-and-forget notification system used by the
//! watchdog controller to report failed mitigations and internal faults.
//!
//! # Usage
//!
//! ```no_run
//! use notify::{Notifier, NotifyEvent};
//!
//! # async fn run() {
//! // Create notifier from environment variables
//! let notifier = Notifier::from_env();
//!
//! // Send a notification (fire-and-forget)
//! notifier.notify(NotifyEvent::ActionFailed {
//!     action_kind: "restart-service".to_string(),
//!     error: "exit status 1".to_string(),
//!     timestamp: chrono::Utc::now(),
//! });
//! # }
//! ```
//!
//! # Configuration
//!
//! - `SLACK_WEBHOOK_URL`: Slack incoming webhook (enables the Slack channel)
//! - `NOTIFY_DISABLED`: Set to "true" to disable all notifications
//!
//! The [`LogChannel`] is always registered by [`Notifier::from_env`] so that
//! escalations reach the process log even with no webhook configured.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod error;
pub mod events;

pub use channels::log::LogChannel;
pub use channels::slack::SlackChannel;
pub use channels::NotifyChannel;
pub use error::NotificationError;
pub use events::{NotifyEvent, Severity};

use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Environment variable to disable all notifications.
const ENV_NOTIFY_DISABLED: &str = "NOTIFY_DISABLED";

/// Central notification dispatcher.
///
/// The `Notifier` manages multiple notification channels and dispatches
/// events to all enabled channels in a fire-and-forget manner.
pub struct Notifier {
    channels: Vec<Arc<dyn NotifyChannel>>,
    disabled: bool,
    pending: Mutex<JoinSet<()>>,
}

impl Notifier {
    /// Create a new notifier from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let disabled = std::env::var(ENV_NOTIFY_DISABLED)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        if disabled {
            info!("Notifications disabled via NOTIFY_DISABLED");
            return Self::disabled();
        }

        let mut channels: Vec<Arc<dyn NotifyChannel>> = vec![Arc::new(LogChannel)];

        let slack = SlackChannel::from_env();
        if slack.enabled() {
            info!("Slack notifications enabled");
            channels.push(Arc::new(slack));
        }

        info!(
            channel_count = channels.len(),
            "Notification system initialized"
        );

        Self::with_channels(channels)
    }

    /// Create a notifier with specific channels.
    #[must_use]
    pub fn with_channels(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        Self {
            channels,
            disabled: false,
            pending: Mutex::new(JoinSet::new()),
        }
    }

    /// Create a disabled notifier (for testing or when notifications are off).
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            channels: vec![],
            disabled: true,
            pending: Mutex::new(JoinSet::new()),
        }
    }

    /// Check if any notification channels are enabled.
    #[must_use]
    pub fn has_channels(&self) -> bool {
        !self.disabled && !self.channels.is_empty()
    }

    /// Get the number of enabled channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        if self.disabled {
            0
        } else {
            self.channels.len()
        }
    }

    /// Send a notification to all enabled channels (fire-and-forget).
    ///
    /// Spawns one task per channel and returns immediately. Delivery failures
    /// are logged and never reach the caller. Must be called from within a
    /// tokio runtime.
    pub fn notify(&self, event: NotifyEvent) {
        if !self.has_channels() {
            debug!("No active channels, skipping event");
            return;
        }

        let event = Arc::new(event);
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);

        // Reap deliveries that already finished so the set stays small.
        while pending.try_join_next().is_some() {}

        for channel in &self.channels {
            let channel = Arc::clone(channel);
            let event = Arc::clone(&event);

            pending.spawn(async move {
                let channel_name = channel.name();

                if !channel.enabled() {
                    debug!(channel = channel_name, "Channel disabled, skipping");
                    return;
                }

                match channel.send(&event).await {
                    Ok(()) => {
                        debug!(channel = channel_name, "Notification sent");
                    }
                    Err(e) => {
                        warn!(
                            channel = channel_name,
                            error = %e,
                            "Failed to send notification"
                        );
                    }
                }
            });
        }
    }

    /// Wait for every delivery started by `notify()` so far.
    ///
    /// Call before shutting the runtime down so queued escalations are not
    /// dropped.
    pub async fn flush(&self) {
        let mut pending =
            std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        while pending.join_next().await.is_some() {}
    }

    /// Send a notification and wait for all channels to complete.
    ///
    /// Unlike `notify()`, this waits for every channel and returns each
    /// channel's result.
    pub async fn notify_and_wait(
        &self,
        event: NotifyEvent,
    ) -> Vec<(String, Result<(), NotificationError>)> {
        if !self.has_channels() {
            return vec![];
        }

        let mut results = vec![];

        for channel in self.channels.iter().filter(|c| c.enabled()) {
            let channel_name = channel.name().to_string();
            let result = channel.send(&event).await;
            results.push((channel_name, result));
        }

        results
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::from_env()
    }
}
