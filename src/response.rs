//! Automated Response Policy and Execution
//!
//! A fixed decision table maps alert categories to containment actions, gated
//! on severity and confidence. The executor writes exactly one audit record
//! per attempt, supports dry runs, and converts every action failure into a
//! recorded failed result instead of letting it abort the pipeline.

use crate::alerts::ThreatAlert;
use crate::scoring::ThreatCategory;
use crate::store::SecurityStore;
use crate::SentinelError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Confidence floor below which no automated action fires.
pub const AUTO_RESPONSE_CONFIDENCE: f64 = 0.8;

/// Executable containment actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseAction {
    /// Disable the compromised account
    DisableAccount,
    /// Block the source IP at the perimeter
    BlockIp,
    /// Revoke the API key used by the actor
    RevokeApiKey,
    /// Rotate the actor's credentials; manual-only, no policy row selects it
    RotateCredentials,
    /// Open an incident ticket for the on-call responder
    CreateIncident,
}

impl ResponseAction {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DisableAccount => "disable_account",
            Self::BlockIp => "block_ip",
            Self::RevokeApiKey => "revoke_api_key",
            Self::RotateCredentials => "rotate_credentials",
            Self::CreateIncident => "create_incident",
        }
    }

    /// Parse a wire name; unknown names are handled by the executor as a
    /// structured failure, not an error.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "disable_account" => Some(Self::DisableAccount),
            "block_ip" => Some(Self::BlockIp),
            "revoke_api_key" => Some(Self::RevokeApiKey),
            "rotate_credentials" => Some(Self::RotateCredentials),
            "create_incident" => Some(Self::CreateIncident),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category-to-action policy rows, evaluated in order.
pub const RESPONSE_POLICY: [(ThreatCategory, ResponseAction); 4] = [
    (ThreatCategory::AccountTakeover, ResponseAction::DisableAccount),
    (ThreatCategory::MaliciousIp, ResponseAction::BlockIp),
    (ThreatCategory::DataExfiltration, ResponseAction::RevokeApiKey),
    (ThreatCategory::PrivilegeEscalation, ResponseAction::CreateIncident),
];

/// Action selected for an alert, or `None` when the gate or table says no.
///
/// Only critical and high severity alerts with confidence at or above
/// [`AUTO_RESPONSE_CONFIDENCE`] are eligible.
pub fn auto_response(alert: &ThreatAlert) -> Option<ResponseAction> {
    if !alert.severity.is_actionable() || alert.confidence < AUTO_RESPONSE_CONFIDENCE {
        return None;
    }
    RESPONSE_POLICY
        .iter()
        .find(|(category, _)| *category == alert.category)
        .map(|(_, action)| *action)
}

/// Status of one response attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Created but not yet executed
    Pending,
    /// Action reported success
    Completed,
    /// Action failed or was unknown
    Failed,
}

/// Append-only audit record for one response attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    /// Record id
    pub response_id: Uuid,
    /// The alert the action was taken for
    pub alert_id: Uuid,
    /// Requested action name, verbatim
    pub action: String,
    /// Final status of the attempt
    pub status: ResponseStatus,
    /// Structured result payload
    pub details: Value,
    /// Whether the attempt was a simulation
    pub dry_run: bool,
    /// Execution time
    pub executed_at: DateTime<Utc>,
}

/// Result returned to the caller of `execute`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Whether the action succeeded
    pub success: bool,
    /// Requested action name, verbatim
    pub action: String,
    /// Human-readable summary
    pub message: String,
    /// Structured result payload
    pub details: Value,
    /// Whether this was a simulation
    pub dry_run: bool,
    /// Execution time
    pub timestamp: DateTime<Utc>,
}

/// Idempotent action executor with an audit trail
pub struct ResponseEngine {
    store: Arc<dyn SecurityStore>,
}

impl ResponseEngine {
    /// Engine bound to a store for audit records.
    pub fn new(store: Arc<dyn SecurityStore>) -> Self {
        Self { store }
    }

    /// Execute one containment action for an alert.
    ///
    /// Exactly one audit record is written per attempt before this returns,
    /// for successes, failures, unknown actions, and dry runs alike. Only a
    /// failure to persist the audit record itself surfaces as an error.
    pub async fn execute(
        &self,
        alert: &ThreatAlert,
        action_name: &str,
        dry_run: bool,
    ) -> Result<ActionOutcome, SentinelError> {
        tracing::info!(
            alert_id = %alert.alert_id,
            action = action_name,
            dry_run,
            "executing automated response"
        );

        let result = match ResponseAction::parse(action_name) {
            Some(action) => run_action(action, alert, dry_run),
            None => Err(format!("Unknown action type: {action_name}")),
        };

        let (success, message, details) = match result {
            Ok((message, details)) => (true, message, details),
            Err(message) => {
                tracing::warn!(alert_id = %alert.alert_id, action = action_name, error = %message, "response action failed");
                (false, message.clone(), json!({ "error": message }))
            }
        };

        let outcome = ActionOutcome {
            success,
            action: action_name.into(),
            message,
            details: details.clone(),
            dry_run,
            timestamp: Utc::now(),
        };

        let record = ResponseRecord {
            response_id: Uuid::new_v4(),
            alert_id: alert.alert_id,
            action: action_name.into(),
            status: if success {
                ResponseStatus::Completed
            } else {
                ResponseStatus::Failed
            },
            details,
            dry_run,
            executed_at: outcome.timestamp,
        };
        self.store.append_response(&record).await?;

        Ok(outcome)
    }
}

type ActionResult = Result<(String, Value), String>;

fn run_action(action: ResponseAction, alert: &ThreatAlert, dry_run: bool) -> ActionResult {
    match action {
        ResponseAction::DisableAccount => disable_account(alert, dry_run),
        ResponseAction::BlockIp => block_ip(alert, dry_run),
        ResponseAction::RevokeApiKey => revoke_api_key(alert, dry_run),
        ResponseAction::RotateCredentials => rotate_credentials(alert, dry_run),
        ResponseAction::CreateIncident => create_incident(alert, dry_run),
    }
}

fn disable_account(alert: &ThreatAlert, dry_run: bool) -> ActionResult {
    let actor = alert
        .actor_id
        .as_deref()
        .ok_or_else(|| "alert carries no actor to disable".to_string())?;

    if dry_run {
        return Ok((
            format!("Would disable account: {actor}"),
            json!({ "action": "disable_account", "actor_id": actor, "dry_run": true }),
        ));
    }

    // In production: IAM key deactivation on AWS, directory disable on
    // Azure AD, service-account disable on GCP.
    tracing::info!(actor, "disabling user account");
    Ok((
        format!("Account {actor} has been disabled"),
        json!({ "action": "disable_account", "actor_id": actor }),
    ))
}

fn block_ip(alert: &ThreatAlert, dry_run: bool) -> ActionResult {
    let ip = alert
        .ip_address
        .as_deref()
        .ok_or_else(|| "alert carries no source IP to block".to_string())?;

    if dry_run {
        return Ok((
            format!("Would block IP: {ip}"),
            json!({ "action": "block_ip", "ip_address": ip, "dry_run": true }),
        ));
    }

    // In production: security-group or firewall rule updates per provider.
    tracing::info!(ip, "blocking IP address");
    Ok((
        format!("IP {ip} has been blocked"),
        json!({ "action": "block_ip", "ip_address": ip }),
    ))
}

fn revoke_api_key(alert: &ThreatAlert, dry_run: bool) -> ActionResult {
    if dry_run {
        return Ok((
            "Would revoke API key".into(),
            json!({ "action": "revoke_api_key", "dry_run": true }),
        ));
    }
    tracing::info!(alert_id = %alert.alert_id, "revoking API key");
    Ok((
        "API key has been revoked".into(),
        json!({ "action": "revoke_api_key" }),
    ))
}

fn rotate_credentials(alert: &ThreatAlert, dry_run: bool) -> ActionResult {
    if dry_run {
        return Ok((
            "Would rotate credentials".into(),
            json!({ "action": "rotate_credentials", "dry_run": true }),
        ));
    }
    tracing::info!(alert_id = %alert.alert_id, "rotating credentials");
    Ok((
        "Credentials have been rotated".into(),
        json!({ "action": "rotate_credentials" }),
    ))
}

fn create_incident(alert: &ThreatAlert, dry_run: bool) -> ActionResult {
    if dry_run {
        return Ok((
            "Would create incident ticket".into(),
            json!({ "action": "create_incident", "dry_run": true }),
        ));
    }

    tracing::info!(alert_id = %alert.alert_id, title = %alert.title, "creating incident ticket");
    Ok((
        "Incident ticket created".into(),
        json!({
            "action": "create_incident",
            "short_description": alert.title,
            "severity": alert.severity.as_str(),
            "category": "Security",
        }),
    ))
}
