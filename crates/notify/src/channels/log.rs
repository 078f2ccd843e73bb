//! Tracing-backed channel so escalations always land somewhere.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::error::NotificationError;
use crate::events::{NotifyEvent, Severity};
use crate::NotifyChannel;

/// Writes every event to the process log at a level matching its severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogChannel;

#[async_trait]
impl NotifyChannel for LogChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    fn enabled(&self) -> bool {
        true
    }

    async fn send(&self, event: &NotifyEvent) -> Result<(), NotificationError> {
        let title = event.title();
        let description = event.description();
        match event.severity() {
            Severity::Info => info!(channel = "log", %title, %description, "Escalation"),
            Severity::Warning => warn!(channel = "log", %title, %description, "Escalation"),
            Severity::Critical => error!(channel = "log", %title, %description, "Escalation"),
        }
        Ok(())
    }
}
