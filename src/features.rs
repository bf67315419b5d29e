//! Feature Extraction
//!
//! Turns a [`SecurityEvent`] into the fixed-schema numeric vector the anomaly
//! model consumes. Extraction is total and deterministic: the same event
//! always yields the same vector, and missing fields fall back to neutral
//! values instead of failing.

use crate::event::SecurityEvent;
use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};

/// Ordered feature schema. Training freezes a copy of this list; prediction
/// zero-fills against whatever list the active model was trained with.
pub const FEATURE_NAMES: [&str; 13] = [
    "hour_of_day",
    "day_of_week",
    "is_weekend",
    "is_business_hours",
    "actor_hash",
    "ip_hash",
    "is_login_event",
    "is_access_event",
    "is_modify_event",
    "is_delete_event",
    "country_hash",
    "is_known_country",
    "is_failed_attempt",
];

/// Countries treated as baseline-common for the allow-list flag.
pub const COMMON_COUNTRIES: [&str; 4] = ["US", "GB", "CA", "AU"];

const ACTOR_HASH_MOD: u64 = 10_000;
const IP_HASH_MOD: u64 = 10_000;
const COUNTRY_HASH_MOD: u64 = 1_000;

/// Extracted feature values for one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFeatures {
    /// Hour of day, 0-23
    pub hour_of_day: f64,
    /// Day of week, 0-6 with Monday as 0
    pub day_of_week: f64,
    /// Saturday or Sunday flag
    pub is_weekend: f64,
    /// 9:00-17:00 inclusive flag
    pub is_business_hours: f64,
    /// Bounded pseudo-identity of the actor
    pub actor_hash: f64,
    /// Bounded pseudo-identity of the source IP
    pub ip_hash: f64,
    /// Event type contains "login"
    pub is_login_event: f64,
    /// Event type contains "access"
    pub is_access_event: f64,
    /// Event type contains "modify" or "update"
    pub is_modify_event: f64,
    /// Event type contains "delete"
    pub is_delete_event: f64,
    /// Bounded hash of the country code
    pub country_hash: f64,
    /// Country is in [`COMMON_COUNTRIES`]
    pub is_known_country: f64,
    /// Operation outcome was a failure
    pub is_failed_attempt: f64,
}

impl EventFeatures {
    /// Extract the full feature set from an event.
    pub fn extract(event: &SecurityEvent) -> Self {
        let hour = event.occurred_at.hour();
        let weekday = event.occurred_at.weekday().num_days_from_monday();
        let event_type = event.event_type.to_lowercase();

        let country = event
            .geo
            .as_ref()
            .and_then(|g| g.country.as_deref())
            .unwrap_or("unknown");

        Self {
            hour_of_day: hour as f64,
            day_of_week: weekday as f64,
            is_weekend: flag(weekday >= 5),
            is_business_hours: flag((9..=17).contains(&hour)),
            actor_hash: (stable_hash(event.actor_id.as_deref().unwrap_or("")) % ACTOR_HASH_MOD)
                as f64,
            ip_hash: (stable_hash(event.ip_address.as_deref().unwrap_or("")) % IP_HASH_MOD) as f64,
            is_login_event: flag(event_type.contains("login")),
            is_access_event: flag(event_type.contains("access")),
            is_modify_event: flag(event_type.contains("modify") || event_type.contains("update")),
            is_delete_event: flag(event_type.contains("delete")),
            country_hash: (stable_hash(country) % COUNTRY_HASH_MOD) as f64,
            is_known_country: flag(
                event
                    .geo
                    .as_ref()
                    .and_then(|g| g.country.as_deref())
                    .map(|c| COMMON_COUNTRIES.contains(&c))
                    .unwrap_or(false),
            ),
            is_failed_attempt: flag(event.is_failed()),
        }
    }

    /// Look up a feature by schema name. Unknown names return `None`, which
    /// callers zero-fill when matching an older frozen schema.
    pub fn value(&self, name: &str) -> Option<f64> {
        match name {
            "hour_of_day" => Some(self.hour_of_day),
            "day_of_week" => Some(self.day_of_week),
            "is_weekend" => Some(self.is_weekend),
            "is_business_hours" => Some(self.is_business_hours),
            "actor_hash" => Some(self.actor_hash),
            "ip_hash" => Some(self.ip_hash),
            "is_login_event" => Some(self.is_login_event),
            "is_access_event" => Some(self.is_access_event),
            "is_modify_event" => Some(self.is_modify_event),
            "is_delete_event" => Some(self.is_delete_event),
            "country_hash" => Some(self.country_hash),
            "is_known_country" => Some(self.is_known_country),
            "is_failed_attempt" => Some(self.is_failed_attempt),
            _ => None,
        }
    }

    /// Convert to a vector in [`FEATURE_NAMES`] order.
    pub fn to_vector(&self) -> Vec<f64> {
        FEATURE_NAMES
            .iter()
            .map(|name| self.value(name).unwrap_or(0.0))
            .collect()
    }
}

fn flag(cond: bool) -> f64 {
    if cond {
        1.0
    } else {
        0.0
    }
}

/// FNV-1a over the raw bytes. A stable pseudo-identity signal, not a security
/// hash: collisions within the modulus are expected and harmless.
fn stable_hash(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in s.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
