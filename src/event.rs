//! Security Event Model and Provider Ingestion

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of the recorded operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Operation succeeded
    Success,
    /// Operation was denied or errored
    Failed,
    /// Source did not report an outcome
    Unknown,
}

/// Geographic context attached to an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// ISO country code, e.g. "US"
    pub country: Option<String>,
    /// City name when the source resolves one
    pub city: Option<String>,
    /// True when the actor's country differs from their recent baseline
    pub country_change: bool,
}

/// One normalized activity record from a cloud provider's audit log.
///
/// Immutable once ingested. Every pipeline stage reads it; nothing mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Provider-assigned record id, or a generated one
    pub event_id: String,
    /// Cloud provider, e.g. "AWS"
    pub source: String,
    /// Emitting service, e.g. "CloudTrail"
    pub service: String,
    /// Operation class used for scoring and categorization
    pub event_type: String,
    /// Provider-native operation name
    pub event_name: String,
    /// Acting principal
    pub actor_id: Option<String>,
    /// Source IP of the call
    pub ip_address: Option<String>,
    /// Caller user agent
    pub user_agent: Option<String>,
    /// Geographic context
    pub geo: Option<GeoLocation>,
    /// Operation outcome
    pub status: EventStatus,
    /// Resource identifiers touched by the operation
    pub resources: Vec<String>,
    /// When the event occurred at the source
    pub occurred_at: DateTime<Utc>,
    /// Raw provider payload
    pub payload: Value,
}

impl SecurityEvent {
    /// Minimal event with the given identity fields, defaults elsewhere.
    pub fn new(source: &str, service: &str, event_type: &str) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            service: service.into(),
            event_type: event_type.into(),
            event_name: event_type.into(),
            actor_id: None,
            ip_address: None,
            user_agent: None,
            geo: None,
            status: EventStatus::Unknown,
            resources: Vec::new(),
            occurred_at: Utc::now(),
            payload: Value::Null,
        }
    }

    /// Normalize an AWS CloudTrail record.
    pub fn from_cloudtrail(record: &Value) -> Self {
        let event_name = str_field(record, "eventName").unwrap_or("unknown");
        let status = if record.get("errorCode").is_some() {
            EventStatus::Failed
        } else {
            EventStatus::Success
        };
        Self {
            event_id: str_field(record, "eventID")
                .map(String::from)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            source: "AWS".into(),
            service: "CloudTrail".into(),
            event_type: event_name.into(),
            event_name: event_name.into(),
            actor_id: record
                .pointer("/userIdentity/principalId")
                .and_then(Value::as_str)
                .map(String::from),
            ip_address: str_field(record, "sourceIPAddress").map(String::from),
            user_agent: str_field(record, "userAgent").map(String::from),
            geo: None,
            status,
            resources: record
                .get("resources")
                .and_then(Value::as_array)
                .map(|rs| {
                    rs.iter()
                        .filter_map(|r| str_field(r, "ARN").map(String::from))
                        .collect()
                })
                .unwrap_or_default(),
            occurred_at: parse_time(str_field(record, "eventTime")),
            payload: record.clone(),
        }
    }

    /// Normalize an Azure Monitor activity record.
    pub fn from_azure_monitor(record: &Value) -> Self {
        let operation = str_field(record, "operationName").unwrap_or("unknown");
        Self {
            event_id: str_field(record, "operationId")
                .map(String::from)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            source: "Azure".into(),
            service: "Monitor".into(),
            event_type: operation.into(),
            event_name: operation.into(),
            actor_id: str_field(record, "caller").map(String::from),
            ip_address: record
                .pointer("/httpRequest/clientIpAddress")
                .and_then(Value::as_str)
                .map(String::from),
            user_agent: None,
            geo: None,
            status: status_field(record),
            resources: Vec::new(),
            occurred_at: parse_time(str_field(record, "eventTimestamp")),
            payload: record.clone(),
        }
    }

    /// Normalize a GCP Cloud Logging audit record.
    pub fn from_gcp_logging(record: &Value) -> Self {
        let method = record
            .pointer("/protoPayload/methodName")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        Self {
            event_id: str_field(record, "insertId")
                .map(String::from)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            source: "GCP".into(),
            service: "CloudLogging".into(),
            event_type: method.into(),
            event_name: method.into(),
            actor_id: record
                .pointer("/protoPayload/authenticationInfo/principalEmail")
                .and_then(Value::as_str)
                .map(String::from),
            ip_address: record
                .pointer("/protoPayload/requestMetadata/callerIp")
                .and_then(Value::as_str)
                .map(String::from),
            user_agent: None,
            geo: None,
            status: status_field(record),
            resources: Vec::new(),
            occurred_at: parse_time(str_field(record, "timestamp")),
            payload: record.clone(),
        }
    }

    /// True when the operation was denied or errored.
    pub fn is_failed(&self) -> bool {
        self.status == EventStatus::Failed
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn status_field(record: &Value) -> EventStatus {
    match str_field(record, "status") {
        Some(s) if s.eq_ignore_ascii_case("failed") => EventStatus::Failed,
        Some(_) => EventStatus::Success,
        None => EventStatus::Unknown,
    }
}

fn parse_time(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cloudtrail_normalization() {
        let record = json!({
            "eventID": "abc-123",
            "eventName": "ConsoleLogin",
            "eventTime": "2024-03-01T04:12:00Z",
            "sourceIPAddress": "203.0.113.7",
            "userAgent": "aws-cli/2.x",
            "userIdentity": {"principalId": "AIDA123"},
            "resources": [{"ARN": "arn:aws:iam::1:user/alice"}]
        });

        let event = SecurityEvent::from_cloudtrail(&record);

        assert_eq!(event.event_id, "abc-123");
        assert_eq!(event.source, "AWS");
        assert_eq!(event.event_type, "ConsoleLogin");
        assert_eq!(event.actor_id.as_deref(), Some("AIDA123"));
        assert_eq!(event.ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(event.resources, vec!["arn:aws:iam::1:user/alice"]);
        assert_eq!(event.status, EventStatus::Success);
    }

    #[test]
    fn test_cloudtrail_error_code_marks_failed() {
        let record = json!({
            "eventName": "ConsoleLogin",
            "errorCode": "AccessDenied"
        });
        let event = SecurityEvent::from_cloudtrail(&record);
        assert!(event.is_failed());
    }

    #[test]
    fn test_gcp_nested_fields() {
        let record = json!({
            "insertId": "g-1",
            "timestamp": "2024-03-01T04:12:00Z",
            "protoPayload": {
                "methodName": "SetIamPolicy",
                "authenticationInfo": {"principalEmail": "svc@example.iam"},
                "requestMetadata": {"callerIp": "198.51.100.9"}
            }
        });

        let event = SecurityEvent::from_gcp_logging(&record);

        assert_eq!(event.event_type, "SetIamPolicy");
        assert_eq!(event.actor_id.as_deref(), Some("svc@example.iam"));
        assert_eq!(event.ip_address.as_deref(), Some("198.51.100.9"));
    }

    #[test]
    fn test_incomplete_record_still_normalizes() {
        let event = SecurityEvent::from_azure_monitor(&json!({}));
        assert_eq!(event.event_type, "unknown");
        assert_eq!(event.status, EventStatus::Unknown);
        assert!(event.actor_id.is_none());
    }
}
