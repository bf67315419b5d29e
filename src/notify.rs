//! Notification Collaborator Interface
//!
//! Delivery channels live outside this crate; the engine only invokes the
//! seam, and only for critical and high severity alerts.

use crate::scoring::Severity;
use async_trait::async_trait;
use uuid::Uuid;

/// Notification collaborator
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one alert notification. Returns false on delivery failure;
    /// the pipeline logs and continues either way.
    async fn notify(
        &self,
        alert_id: Uuid,
        severity: Severity,
        title: &str,
        description: &str,
    ) -> bool;
}

/// Default notifier that only emits a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        alert_id: Uuid,
        severity: Severity,
        title: &str,
        _description: &str,
    ) -> bool {
        tracing::info!(alert_id = %alert_id, severity = %severity, title, "alert notification");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_reports_success() {
        let delivered = LogNotifier
            .notify(Uuid::new_v4(), Severity::Critical, "title", "description")
            .await;
        assert!(delivered);
    }
}
