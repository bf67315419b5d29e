//! Engine Configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Detection and response tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelConfig {
    /// Minimum anomaly score for an event to enter deep analysis
    pub anomaly_gate: f64,
    /// Minimum threat score for alert creation, inclusive
    pub alert_threshold: f64,
    /// Default expected anomaly fraction for training
    pub contamination: f64,
    /// Directory for model artifact bundles
    pub model_dir: PathBuf,
    /// Per-request timeout for intelligence lookups, seconds
    pub intel_timeout_secs: u64,
    /// Execute policy-selected actions during event processing
    pub auto_response: bool,
    /// When auto-response is on, simulate instead of acting
    pub auto_response_dry_run: bool,
    /// Worker tasks draining the ingestion queue
    pub ingest_workers: usize,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            anomaly_gate: 0.5,
            alert_threshold: 0.5,
            contamination: 0.1,
            model_dir: "./data/models".into(),
            intel_timeout_secs: 10,
            auto_response: false,
            auto_response_dry_run: true,
            ingest_workers: 4,
        }
    }
}

impl SentinelConfig {
    /// Load from a JSON file.
    pub fn load(path: &str) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(config)
    }

    /// Sanity-check tuning values, logging rather than failing.
    ///
    /// The anomaly gate and the alert threshold default to the same value but
    /// guard different stages; they are kept as two independent knobs and a
    /// divergence is surfaced so operators notice a split configuration.
    pub fn validate(&self) {
        if (self.anomaly_gate - self.alert_threshold).abs() > f64::EPSILON {
            tracing::warn!(
                anomaly_gate = self.anomaly_gate,
                alert_threshold = self.alert_threshold,
                "anomaly gate and alert threshold diverge"
            );
        }
        if !(0.0..=0.5).contains(&self.contamination) {
            tracing::warn!(
                contamination = self.contamination,
                "contamination outside the usual (0, 0.5] range"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_gates_are_equal_but_independent() {
        let config = SentinelConfig::default();
        assert_eq!(config.anomaly_gate, 0.5);
        assert_eq!(config.alert_threshold, 0.5);
        config.validate();
    }

    #[test]
    fn test_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.json");
        let mut config = SentinelConfig::default();
        config.alert_threshold = 0.6;
        std::fs::write(&path, serde_json::to_vec(&config).unwrap()).unwrap();

        let loaded = SentinelConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.alert_threshold, 0.6);
        assert_eq!(loaded.anomaly_gate, 0.5);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(SentinelConfig::load("/nonexistent/sentinel.json").is_err());
    }
}
