//! Threat Intelligence Integration
//!
//! External reputation lookups with an explicit degraded path: a failed or
//! timed-out lookup yields [`Enrichment::Unavailable`], never an error that
//! could abort the pipeline. Also hosts the MITRE ATT&CK tactic mapping used
//! to tag alerts.

use crate::event::SecurityEvent;
use crate::scoring::ThreatCategory;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

/// Reputation report for one source IP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntelReport {
    /// The looked-up address
    pub ip_address: String,
    /// At least one source flagged the address malicious
    pub is_malicious: bool,
    /// The address is attributed to a tracked threat actor
    pub is_known_threat_actor: bool,
    /// Raw per-source payloads for the alert snapshot
    pub sources: Vec<Value>,
}

/// Enrichment outcome with the degraded path made explicit, so tests and
/// callers can distinguish "clean" from "no intelligence available".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Enrichment {
    /// Lookup failed, timed out, or was never attempted
    Unavailable,
    /// Lookup completed
    Intel(IntelReport),
}

impl Enrichment {
    /// Malicious-IP signal, false when unavailable.
    pub fn is_malicious_ip(&self) -> bool {
        matches!(self, Self::Intel(r) if r.is_malicious)
    }

    /// Known-threat-actor signal, false when unavailable.
    pub fn is_known_threat_actor(&self) -> bool {
        matches!(self, Self::Intel(r) if r.is_known_threat_actor)
    }

    /// The report, when one exists.
    pub fn report(&self) -> Option<&IntelReport> {
        match self {
            Self::Unavailable => None,
            Self::Intel(r) => Some(r),
        }
    }

    /// JSON snapshot stored on alerts.
    pub fn snapshot(&self) -> Value {
        match self {
            Self::Unavailable => Value::Null,
            Self::Intel(r) => serde_json::to_value(r).unwrap_or(Value::Null),
        }
    }
}

/// Threat-intelligence collaborator interface
#[async_trait]
pub trait ThreatIntel: Send + Sync {
    /// Reputation of a source IP. Implementations degrade to
    /// [`Enrichment::Unavailable`] on any failure.
    async fn lookup(&self, ip: &str) -> Enrichment;
}

/// In-memory IOC lists, for tests and air-gapped deployments.
#[derive(Debug, Default)]
pub struct IocListIntel {
    malicious_ips: RwLock<HashSet<String>>,
    threat_actor_ips: RwLock<HashSet<String>>,
}

impl IocListIntel {
    /// Empty IOC lists.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an address malicious.
    pub fn add_malicious_ip(&self, ip: &str) {
        self.malicious_ips.write().insert(ip.into());
    }

    /// Attribute an address to a tracked threat actor.
    pub fn add_threat_actor_ip(&self, ip: &str) {
        self.threat_actor_ips.write().insert(ip.into());
    }
}

#[async_trait]
impl ThreatIntel for IocListIntel {
    async fn lookup(&self, ip: &str) -> Enrichment {
        Enrichment::Intel(IntelReport {
            ip_address: ip.into(),
            is_malicious: self.malicious_ips.read().contains(ip),
            is_known_threat_actor: self.threat_actor_ips.read().contains(ip),
            sources: vec![serde_json::json!({"source": "ioc_list"})],
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct ReputationResponse {
    #[serde(default)]
    malicious_count: u32,
    #[serde(default)]
    known_threat_actor: bool,
}

/// HTTP reputation client with a bounded per-request timeout.
pub struct HttpReputationIntel {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpReputationIntel {
    /// Client against `base_url`, querying `GET {base_url}/ips/{ip}`.
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl ThreatIntel for HttpReputationIntel {
    async fn lookup(&self, ip: &str) -> Enrichment {
        let url = format!("{}/ips/{}", self.base_url, ip);
        let response = self
            .client
            .get(&url)
            .header("x-apikey", &self.api_key)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(ip, error = %e, "reputation lookup failed");
                return Enrichment::Unavailable;
            }
        };
        if !response.status().is_success() {
            tracing::warn!(ip, status = %response.status(), "reputation lookup rejected");
            return Enrichment::Unavailable;
        }

        let raw: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(ip, error = %e, "reputation payload unreadable");
                return Enrichment::Unavailable;
            }
        };
        let parsed: ReputationResponse = serde_json::from_value(raw.clone()).unwrap_or_default();

        Enrichment::Intel(IntelReport {
            ip_address: ip.into(),
            is_malicious: parsed.malicious_count > 0,
            is_known_threat_actor: parsed.known_threat_actor,
            sources: vec![raw],
        })
    }
}

/// Map an event and its category to MITRE ATT&CK tactic references.
pub fn mitre_tactics(event: &SecurityEvent, category: ThreatCategory) -> Vec<String> {
    let mut tactics = Vec::new();

    if event.is_failed() {
        tactics.push("T1110 - Brute Force".to_string());
    }
    match category {
        ThreatCategory::PrivilegeEscalation => {
            tactics.push("T1068 - Exploitation for Privilege Escalation".to_string());
        }
        ThreatCategory::DataExfiltration => {
            tactics.push("T1041 - Exfiltration Over C2 Channel".to_string());
        }
        ThreatCategory::SuspiciousLogin | ThreatCategory::AccountTakeover => {
            tactics.push("T1078 - Valid Accounts".to_string());
        }
        _ => {}
    }

    tactics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventStatus;

    #[tokio::test]
    async fn test_ioc_list_lookup() {
        let intel = IocListIntel::new();
        intel.add_malicious_ip("203.0.113.7");

        let hit = intel.lookup("203.0.113.7").await;
        assert!(hit.is_malicious_ip());
        assert!(!hit.is_known_threat_actor());

        let miss = intel.lookup("198.51.100.1").await;
        assert!(!miss.is_malicious_ip());
        assert!(miss.report().is_some());
    }

    #[test]
    fn test_unavailable_reads_as_no_signal() {
        let enrichment = Enrichment::Unavailable;
        assert!(!enrichment.is_malicious_ip());
        assert!(!enrichment.is_known_threat_actor());
        assert!(enrichment.report().is_none());
        assert_eq!(enrichment.snapshot(), Value::Null);
    }

    #[test]
    fn test_mitre_mapping() {
        let mut event = SecurityEvent::new("AWS", "CloudTrail", "ConsoleLogin");
        event.status = EventStatus::Failed;

        let tactics = mitre_tactics(&event, ThreatCategory::SuspiciousLogin);
        assert!(tactics.iter().any(|t| t.starts_with("T1110")));
        assert!(tactics.iter().any(|t| t.starts_with("T1078")));

        let quiet = mitre_tactics(
            &SecurityEvent::new("AWS", "CloudTrail", "GetObject"),
            ThreatCategory::UnusualActivity,
        );
        assert!(quiet.is_empty());
    }
}
