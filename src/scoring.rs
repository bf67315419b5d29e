//! Threat Scoring and Categorization
//!
//! Deterministic refinement of the anomaly score into a threat score and
//! severity tier, plus the ordered first-match-wins category rule table. Both
//! are pure functions of their inputs; rerunning them on identical inputs
//! always yields identical outputs.

use crate::event::SecurityEvent;
use crate::intel::Enrichment;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity tiers derived from the threat score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// threat score >= 0.8
    Critical,
    /// threat score >= 0.6
    High,
    /// threat score >= 0.4
    Medium,
    /// everything below
    Low,
}

impl Severity {
    /// Tier for a clamped threat score.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::Critical
        } else if score >= 0.6 {
            Self::High
        } else if score >= 0.4 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Severities that warrant notification and automated response.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event-type severity multipliers. Substring-matched against the lowercased
/// event type; when several match, the largest wins, never the product.
pub const EVENT_MULTIPLIERS: [(&str, f64); 6] = [
    ("login", 1.0),
    ("access", 1.2),
    ("modify", 1.5),
    ("delete", 1.8),
    ("privilege", 2.0),
    ("admin", 2.0),
];

const MALICIOUS_IP_MULTIPLIER: f64 = 1.5;
const THREAT_ACTOR_MULTIPLIER: f64 = 1.8;

/// Threat score with its derived severity tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThreatScore {
    /// Final score in [0,1]
    pub score: f64,
    /// Tier at the fixed thresholds
    pub severity: Severity,
}

/// Refine an anomaly score with event-type weight and external intelligence.
///
/// The score is re-clamped to [0,1] after every multiplicative step so that
/// compounding intelligence signals cannot overflow the range.
pub fn score_threat(anomaly_score: f64, event_type: &str, intel: &Enrichment) -> ThreatScore {
    let event_type = event_type.to_lowercase();

    let mut multiplier = 1.0f64;
    for (needle, m) in EVENT_MULTIPLIERS {
        if event_type.contains(needle) {
            multiplier = multiplier.max(m);
        }
    }

    let mut score = clamp01(anomaly_score * multiplier);
    if intel.is_malicious_ip() {
        score = clamp01(score * MALICIOUS_IP_MULTIPLIER);
    }
    if intel.is_known_threat_actor() {
        score = clamp01(score * THREAT_ACTOR_MULTIPLIER);
    }

    ThreatScore {
        score,
        severity: Severity::from_score(score),
    }
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// Fixed threat taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatCategory {
    /// Login with a high anomaly score
    SuspiciousLogin,
    /// Actor appeared from a new country
    AccountTakeover,
    /// Privilege or admin operation
    PrivilegeEscalation,
    /// Download or export operation
    DataExfiltration,
    /// Source IP is flagged by intelligence
    MaliciousIp,
    /// Analyst-assigned category; no rule produces it
    InsiderThreat,
    /// Fallback when no rule matches
    UnusualActivity,
}

impl ThreatCategory {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuspiciousLogin => "suspicious_login",
            Self::AccountTakeover => "account_takeover",
            Self::PrivilegeEscalation => "privilege_escalation",
            Self::DataExfiltration => "data_exfiltration",
            Self::MaliciousIp => "malicious_ip",
            Self::InsiderThreat => "insider_threat",
            Self::UnusualActivity => "unusual_activity",
        }
    }
}

impl fmt::Display for ThreatCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One categorization rule. The table below is ordered by precedence:
/// identity-compromise signals outrank generic exfiltration signals, and
/// intelligence-only matches come last before the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryRule {
    /// "login" in the event type with anomaly score above 0.7
    LoginAnomaly,
    /// Geolocation reports a country change from the actor's baseline
    CountryChange,
    /// "privilege" or "admin" in the event type
    PrivilegeKeyword,
    /// "download" or "export" in the event type
    ExfiltrationKeyword,
    /// Intelligence marks the source IP malicious
    MaliciousSource,
}

/// Precedence-ordered rule table. Reordering changes detection semantics.
pub const CATEGORY_RULES: [CategoryRule; 5] = [
    CategoryRule::LoginAnomaly,
    CategoryRule::CountryChange,
    CategoryRule::PrivilegeKeyword,
    CategoryRule::ExfiltrationKeyword,
    CategoryRule::MaliciousSource,
];

impl CategoryRule {
    /// Category produced when this rule matches the event.
    pub fn evaluate(
        &self,
        event: &SecurityEvent,
        anomaly_score: f64,
        intel: &Enrichment,
    ) -> Option<ThreatCategory> {
        let event_type = event.event_type.to_lowercase();
        match self {
            Self::LoginAnomaly => {
                (event_type.contains("login") && anomaly_score > 0.7)
                    .then_some(ThreatCategory::SuspiciousLogin)
            }
            Self::CountryChange => event
                .geo
                .as_ref()
                .is_some_and(|g| g.country_change)
                .then_some(ThreatCategory::AccountTakeover),
            Self::PrivilegeKeyword => {
                (event_type.contains("privilege") || event_type.contains("admin"))
                    .then_some(ThreatCategory::PrivilegeEscalation)
            }
            Self::ExfiltrationKeyword => {
                (event_type.contains("download") || event_type.contains("export"))
                    .then_some(ThreatCategory::DataExfiltration)
            }
            Self::MaliciousSource => intel
                .is_malicious_ip()
                .then_some(ThreatCategory::MaliciousIp),
        }
    }
}

/// First matching rule in [`CATEGORY_RULES`] wins; otherwise the event is
/// filed as unusual activity.
pub fn categorize(event: &SecurityEvent, anomaly_score: f64, intel: &Enrichment) -> ThreatCategory {
    CATEGORY_RULES
        .iter()
        .find_map(|rule| rule.evaluate(event, anomaly_score, intel))
        .unwrap_or(ThreatCategory::UnusualActivity)
}
