//! Notification channel implementations.

pub mod log;
pub mod slack;

use async_trait::async_trait;

use crate::error::NotificationError;
use crate::events::NotifyEvent;

/// Trait for notification channels (Slack, log sink, etc.).
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    /// Get the name of this channel.
    fn name(&self) -> &'static str;

    /// Check if this channel is enabled/configured.
    fn enabled(&self) -> bool;

    /// Send a notification event to this channel.
    async fn send(&self, event: &NotifyEvent) -> Result<(), NotificationError>;
}
