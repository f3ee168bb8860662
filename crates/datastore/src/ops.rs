//! Operational alerting.
//!
//! Retry attempts and slow or erroring queries are forwarded to a
//! best-effort alert channel. The channel is fire-and-forget: a failure to
//! deliver an alert must never fail the originating request, so the trait
//! surface has no error type.

use async_trait::async_trait;

/// Best-effort channel for operational alerts.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Delivers a message. Implementations swallow their own failures.
    async fn notify(&self, message: &str);
}

/// Discards all alerts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAlertChannel;

#[async_trait]
impl AlertChannel for NullAlertChannel {
    async fn notify(&self, _message: &str) {}
}

/// Emits alerts as `tracing` warnings.
///
/// Useful for deployments without an external alerting integration.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertChannel;

#[async_trait]
impl AlertChannel for TracingAlertChannel {
    async fn notify(&self, message: &str) {
        tracing::warn!(target: "meridian_datastore::alerts", "{message}");
    }
}
