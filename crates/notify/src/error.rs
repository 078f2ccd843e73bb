//! Error types for the notification system.

use thiserror::Error;

/// Errors that can occur when delivering an escalation.
///
/// The watchdog never propagates these: the [`crate::Notifier`] logs them and
/// moves on.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Channel is not configured
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Rate limited by the service
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The receiving service answered with a non-success status
    #[error("Rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Other error
    #[error("{0}")]
    Other(String),
}
