//! Persistence Collaborator Interface
//!
//! The engine treats storage as an external collaborator behind
//! [`SecurityStore`]. [`MemoryStore`] is the in-crate reference
//! implementation; a single lock over the whole dataset gives the atomic
//! event-plus-alert commit the pipeline requires.

use crate::alerts::{AnalystFeedback, ThreatAlert};
use crate::event::SecurityEvent;
use crate::model::ModelRecord;
use crate::response::ResponseRecord;
use crate::scoring::{Severity, ThreatCategory};
use crate::{AlertStatus, SentinelError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

/// Alert query filter; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    /// Severity tier to match
    pub severity: Option<Severity>,
    /// Lifecycle status to match
    pub status: Option<AlertStatus>,
    /// Threat category to match
    pub category: Option<ThreatCategory>,
    /// Only alerts detected at or after this instant
    pub since: Option<DateTime<Utc>>,
    /// Only alerts detected at or before this instant
    pub until: Option<DateTime<Utc>>,
}

impl AlertFilter {
    /// Whether an alert satisfies every set field.
    pub fn matches(&self, alert: &ThreatAlert) -> bool {
        self.severity.map_or(true, |s| alert.severity == s)
            && self.status.map_or(true, |s| alert.status == s)
            && self.category.map_or(true, |c| alert.category == c)
            && self.since.map_or(true, |t| alert.detected_at >= t)
            && self.until.map_or(true, |t| alert.detected_at <= t)
    }
}

/// Persistence operations the engine depends on.
///
/// A failure from any method is fatal to the pipeline run that issued it; the
/// event is then considered unprocessed and the caller owns the retry.
#[async_trait]
pub trait SecurityStore: Send + Sync {
    /// Durably record a raw event.
    async fn append_event(&self, event: &SecurityEvent) -> Result<(), SentinelError>;

    /// Durably record an event and its derived alert as one atomic commit,
    /// so no alert can exist without its backing event.
    async fn append_event_with_alert(
        &self,
        event: &SecurityEvent,
        alert: &ThreatAlert,
    ) -> Result<(), SentinelError>;

    /// Replace the stored copy of an alert.
    async fn update_alert(&self, alert: &ThreatAlert) -> Result<(), SentinelError>;

    /// Fetch one alert by id.
    async fn get_alert(&self, alert_id: Uuid) -> Result<Option<ThreatAlert>, SentinelError>;

    /// Alerts matching the filter, newest detection first.
    async fn query_alerts(&self, filter: &AlertFilter) -> Result<Vec<ThreatAlert>, SentinelError>;

    /// Append one feedback record. Feedback is never updated or deleted.
    async fn append_feedback(&self, feedback: &AnalystFeedback) -> Result<(), SentinelError>;

    /// The full feedback corpus.
    async fn list_feedback(&self) -> Result<Vec<AnalystFeedback>, SentinelError>;

    /// Append one response audit record.
    async fn append_response(&self, record: &ResponseRecord) -> Result<(), SentinelError>;

    /// Audit records for one alert, oldest first.
    async fn responses_for(&self, alert_id: Uuid) -> Result<Vec<ResponseRecord>, SentinelError>;

    /// Register a trained model.
    async fn insert_model(&self, record: &ModelRecord) -> Result<(), SentinelError>;

    /// Deactivate every model, then activate the named one. Atomic: after it
    /// returns exactly one model is active.
    async fn activate_model(&self, name: &str) -> Result<(), SentinelError>;

    /// All registered models.
    async fn list_models(&self) -> Result<Vec<ModelRecord>, SentinelError>;

    /// The currently active model, if any.
    async fn active_model(&self) -> Result<Option<ModelRecord>, SentinelError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    events: Vec<SecurityEvent>,
    alerts: Vec<ThreatAlert>,
    feedback: Vec<AnalystFeedback>,
    responses: Vec<ResponseRecord>,
    models: Vec<ModelRecord>,
}

/// In-memory reference store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored raw events.
    pub fn event_count(&self) -> usize {
        self.state.read().events.len()
    }
}

#[async_trait]
impl SecurityStore for MemoryStore {
    async fn append_event(&self, event: &SecurityEvent) -> Result<(), SentinelError> {
        self.state.write().events.push(event.clone());
        Ok(())
    }

    async fn append_event_with_alert(
        &self,
        event: &SecurityEvent,
        alert: &ThreatAlert,
    ) -> Result<(), SentinelError> {
        // One write guard covers both pushes; readers never observe the
        // alert without its event.
        let mut state = self.state.write();
        state.events.push(event.clone());
        state.alerts.push(alert.clone());
        Ok(())
    }

    async fn update_alert(&self, alert: &ThreatAlert) -> Result<(), SentinelError> {
        let mut state = self.state.write();
        match state
            .alerts
            .iter_mut()
            .find(|a| a.alert_id == alert.alert_id)
        {
            Some(stored) => {
                *stored = alert.clone();
                Ok(())
            }
            None => Err(SentinelError::AlertNotFound(alert.alert_id)),
        }
    }

    async fn get_alert(&self, alert_id: Uuid) -> Result<Option<ThreatAlert>, SentinelError> {
        Ok(self
            .state
            .read()
            .alerts
            .iter()
            .find(|a| a.alert_id == alert_id)
            .cloned())
    }

    async fn query_alerts(&self, filter: &AlertFilter) -> Result<Vec<ThreatAlert>, SentinelError> {
        let mut matched: Vec<ThreatAlert> = self
            .state
            .read()
            .alerts
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        Ok(matched)
    }

    async fn append_feedback(&self, feedback: &AnalystFeedback) -> Result<(), SentinelError> {
        self.state.write().feedback.push(feedback.clone());
        Ok(())
    }

    async fn list_feedback(&self) -> Result<Vec<AnalystFeedback>, SentinelError> {
        Ok(self.state.read().feedback.clone())
    }

    async fn append_response(&self, record: &ResponseRecord) -> Result<(), SentinelError> {
        self.state.write().responses.push(record.clone());
        Ok(())
    }

    async fn responses_for(&self, alert_id: Uuid) -> Result<Vec<ResponseRecord>, SentinelError> {
        Ok(self
            .state
            .read()
            .responses
            .iter()
            .filter(|r| r.alert_id == alert_id)
            .cloned()
            .collect())
    }

    async fn insert_model(&self, record: &ModelRecord) -> Result<(), SentinelError> {
        self.state.write().models.push(record.clone());
        Ok(())
    }

    async fn activate_model(&self, name: &str) -> Result<(), SentinelError> {
        let mut state = self.state.write();
        if !state.models.iter().any(|m| m.name == name) {
            return Err(SentinelError::Store(format!("unknown model: {name}")));
        }
        for model in state.models.iter_mut() {
            model.is_active = model.name == name;
        }
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<ModelRecord>, SentinelError> {
        Ok(self.state.read().models.clone())
    }

    async fn active_model(&self) -> Result<Option<ModelRecord>, SentinelError> {
        Ok(self
            .state
            .read()
            .models
            .iter()
            .find(|m| m.is_active)
            .cloned())
    }
}
