//! Alert Lifecycle Management
//!
//! Owns alert creation, status transitions, the analyst feedback loop, and
//! the on-demand precision metrics computed from the feedback corpus.

use crate::event::{GeoLocation, SecurityEvent};
use crate::intel::Enrichment;
use crate::scoring::{Severity, ThreatCategory, ThreatScore};
use crate::store::{AlertFilter, SecurityStore};
use crate::SentinelError;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Alert lifecycle states: open -> investigating -> {resolved, false_positive}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Newly created, unreviewed
    Open,
    /// Under analyst review
    Investigating,
    /// Confirmed and handled
    Resolved,
    /// Judged benign; terminal
    FalsePositive,
}

/// Persistent alert derived from a scored event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatAlert {
    /// Unique alert identifier
    pub alert_id: Uuid,
    /// Severity tier at detection time
    pub severity: Severity,
    /// Category from the rule table
    pub category: ThreatCategory,
    /// Originating cloud provider
    pub source: String,
    /// Human-readable title
    pub title: String,
    /// Multi-line context description
    pub description: String,
    /// Intelligence-adjusted score that crossed the alerting gate
    pub threat_score: f64,
    /// Model confidence, equal to the anomaly score
    pub confidence: f64,
    /// Indicators of compromise
    pub indicators: HashMap<String, Value>,
    /// Resources touched by the triggering event
    pub affected_resources: Vec<String>,
    /// Acting principal
    pub actor_id: Option<String>,
    /// Source IP
    pub ip_address: Option<String>,
    /// Caller user agent
    pub user_agent: Option<String>,
    /// Geographic context
    pub geo: Option<GeoLocation>,
    /// MITRE ATT&CK tactic references
    pub mitre_tactics: Vec<String>,
    /// External-intelligence snapshot at detection time
    pub intel_snapshot: Value,
    /// Lifecycle state
    pub status: AlertStatus,
    /// Assigned analyst
    pub assigned_to: Option<String>,
    /// Free-form resolution notes
    pub resolution_notes: Option<String>,
    /// Detection timestamp
    pub detected_at: DateTime<Utc>,
    /// Stamped when status becomes resolved
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Mutable alert fields; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertUpdate {
    /// New lifecycle state
    pub status: Option<AlertStatus>,
    /// New assignee
    pub assigned_to: Option<String>,
    /// New resolution notes
    pub resolution_notes: Option<String>,
}

/// Append-only analyst judgment on one alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalystFeedback {
    /// Feedback record id
    pub feedback_id: Uuid,
    /// The judged alert
    pub alert_id: Uuid,
    /// Submitting analyst
    pub analyst: String,
    /// True when the detection was real
    pub is_true_positive: bool,
    /// Optional notes
    pub notes: Option<String>,
    /// Submission time
    pub submitted_at: DateTime<Utc>,
}

/// Empirical model quality computed from the feedback corpus
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedbackMetrics {
    /// Total feedback records
    pub feedback_count: usize,
    /// Confirmed detections
    pub true_positives: usize,
    /// Rejected detections
    pub false_positives: usize,
    /// true_positives / feedback_count
    pub precision: f64,
    /// false_positives / feedback_count
    pub false_positive_rate: f64,
}

/// Alert lifecycle manager over the persistence collaborator
pub struct AlertManager {
    store: Arc<dyn SecurityStore>,
}

impl AlertManager {
    /// Manager bound to a store.
    pub fn new(store: Arc<dyn SecurityStore>) -> Self {
        Self { store }
    }

    /// Build an alert for a detection. Pure construction; persisting it is
    /// the orchestrator's commit point.
    pub fn build_alert(
        event: &SecurityEvent,
        anomaly_score: f64,
        threat: &ThreatScore,
        category: ThreatCategory,
        enrichment: &Enrichment,
        mitre_tactics: Vec<String>,
    ) -> ThreatAlert {
        ThreatAlert {
            alert_id: Uuid::new_v4(),
            severity: threat.severity,
            category,
            source: event.source.clone(),
            title: alert_title(category, event),
            description: alert_description(event, anomaly_score),
            threat_score: threat.score,
            confidence: anomaly_score,
            indicators: build_indicators(event),
            affected_resources: event.resources.clone(),
            actor_id: event.actor_id.clone(),
            ip_address: event.ip_address.clone(),
            user_agent: event.user_agent.clone(),
            geo: event.geo.clone(),
            mitre_tactics,
            intel_snapshot: enrichment.snapshot(),
            status: AlertStatus::Open,
            assigned_to: None,
            resolution_notes: None,
            detected_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// Fetch one alert.
    pub async fn get(&self, alert_id: Uuid) -> Result<Option<ThreatAlert>, SentinelError> {
        self.store.get_alert(alert_id).await
    }

    /// List alerts matching a filter.
    pub async fn list(&self, filter: &AlertFilter) -> Result<Vec<ThreatAlert>, SentinelError> {
        self.store.query_alerts(filter).await
    }

    /// Apply analyst mutations. Setting status to resolved stamps the
    /// resolution timestamp.
    pub async fn update(
        &self,
        alert_id: Uuid,
        update: AlertUpdate,
    ) -> Result<ThreatAlert, SentinelError> {
        let mut alert = self
            .store
            .get_alert(alert_id)
            .await?
            .ok_or(SentinelError::AlertNotFound(alert_id))?;

        if let Some(status) = update.status {
            alert.status = status;
            if status == AlertStatus::Resolved {
                alert.resolved_at = Some(Utc::now());
            }
        }
        if let Some(assignee) = update.assigned_to {
            alert.assigned_to = Some(assignee);
        }
        if let Some(notes) = update.resolution_notes {
            alert.resolution_notes = Some(notes);
        }

        self.store.update_alert(&alert).await?;
        Ok(alert)
    }

    /// Attach analyst feedback. A false-positive judgment forces the alert
    /// into the false_positive state regardless of where it currently is;
    /// human feedback is authoritative over automation.
    pub async fn submit_feedback(
        &self,
        alert_id: Uuid,
        analyst: &str,
        is_true_positive: bool,
        notes: Option<String>,
    ) -> Result<AnalystFeedback, SentinelError> {
        let mut alert = self
            .store
            .get_alert(alert_id)
            .await?
            .ok_or(SentinelError::AlertNotFound(alert_id))?;

        let feedback = AnalystFeedback {
            feedback_id: Uuid::new_v4(),
            alert_id,
            analyst: analyst.into(),
            is_true_positive,
            notes,
            submitted_at: Utc::now(),
        };
        self.store.append_feedback(&feedback).await?;

        if !is_true_positive {
            alert.status = AlertStatus::FalsePositive;
            self.store.update_alert(&alert).await?;
            tracing::info!(alert_id = %alert_id, analyst, "alert overridden to false positive");
        }

        Ok(feedback)
    }

    /// Precision and false-positive rate over the whole feedback corpus.
    /// Recomputed on every call rather than maintained incrementally.
    pub async fn metrics(&self) -> Result<FeedbackMetrics, SentinelError> {
        let feedback = self.store.list_feedback().await?;
        let total = feedback.len();
        let true_positives = feedback.iter().filter(|f| f.is_true_positive).count();
        let false_positives = total - true_positives;

        let (precision, false_positive_rate) = if total > 0 {
            (
                true_positives as f64 / total as f64,
                false_positives as f64 / total as f64,
            )
        } else {
            (0.0, 0.0)
        };

        Ok(FeedbackMetrics {
            feedback_count: total,
            true_positives,
            false_positives,
            precision,
            false_positive_rate,
        })
    }
}

fn alert_title(category: ThreatCategory, event: &SecurityEvent) -> String {
    let ip = event.ip_address.as_deref().unwrap_or("unknown IP");
    let actor = event.actor_id.as_deref().unwrap_or("unknown");
    match category {
        ThreatCategory::SuspiciousLogin => format!("Suspicious login attempt from {ip}"),
        ThreatCategory::AccountTakeover => format!("Potential account takeover for user {actor}"),
        ThreatCategory::PrivilegeEscalation => "Privilege escalation attempt detected".into(),
        ThreatCategory::DataExfiltration => "Potential data exfiltration detected".into(),
        ThreatCategory::MaliciousIp => format!("Activity from malicious IP {ip}"),
        ThreatCategory::InsiderThreat => "Insider threat activity detected".into(),
        ThreatCategory::UnusualActivity => "Unusual activity pattern detected".into(),
    }
}

fn alert_description(event: &SecurityEvent, anomaly_score: f64) -> String {
    let mut description = format!(
        "Anomalous activity detected with confidence score of {anomaly_score:.2}.\n\n"
    );
    description.push_str(&format!("Event: {}\n", event.event_type));
    description.push_str(&format!(
        "User: {}\n",
        event.actor_id.as_deref().unwrap_or("unknown")
    ));
    description.push_str(&format!(
        "Source IP: {}\n",
        event.ip_address.as_deref().unwrap_or("unknown")
    ));
    description.push_str(&format!("Time: {}\n", event.occurred_at.to_rfc3339()));
    if let Some(geo) = &event.geo {
        description.push_str(&format!(
            "Location: {}, {}\n",
            geo.city.as_deref().unwrap_or("unknown"),
            geo.country.as_deref().unwrap_or("unknown")
        ));
    }
    description
}

fn build_indicators(event: &SecurityEvent) -> HashMap<String, Value> {
    let mut indicators = HashMap::new();
    indicators.insert("event_type".into(), json!(event.event_type));
    indicators.insert("ip_address".into(), json!(event.ip_address));
    indicators.insert("user_agent".into(), json!(event.user_agent));
    indicators.insert("failed_login".into(), json!(event.is_failed()));
    indicators.insert(
        "unusual_time".into(),
        json!(is_unusual_time(event.occurred_at)),
    );
    indicators
}

/// Outside 9:00-18:00 on a weekday counts as unusual.
fn is_unusual_time(at: DateTime<Utc>) -> bool {
    let business_hours = (9..=18).contains(&at.hour());
    let weekday = at.weekday().num_days_from_monday() < 5;
    !(business_hours && weekday)
}
