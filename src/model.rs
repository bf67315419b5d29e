//! Anomaly Model
//!
//! Couples a fitted feature scaler, a fitted isolation forest, and the frozen
//! feature schema into one trainable unit, plus the artifact store that
//! persists the bundle and the slot that hot-swaps the production model.

use crate::event::SecurityEvent;
use crate::features::{EventFeatures, FEATURE_NAMES};
use crate::isolation::{IsolationForest, DEFAULT_TREES};
use crate::SentinelError;
use chrono::{DateTime, Utc};
use ndarray::Array2;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Forest construction seed. Pinned so repeated training runs over the same
/// data produce identical models.
const TRAIN_SEED: u64 = 42;

/// Summary returned by a successful training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingInfo {
    /// Estimator family identifier
    pub model_type: String,
    /// Number of training events
    pub sample_count: usize,
    /// Width of the frozen feature schema
    pub feature_count: usize,
    /// Expected anomaly fraction used to fix the decision threshold
    pub contamination: f64,
}

/// Prediction result with the degraded untrained path made explicit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnomalyVerdict {
    /// No trained model was available; callers read this as the conservative
    /// default of not anomalous at score 0.5.
    Untrained,
    /// Scored against a fitted model.
    Scored {
        /// Estimator decision at the contamination threshold
        is_anomaly: bool,
        /// Outlier score in [0,1], higher meaning more anomalous
        score: f64,
    },
}

impl AnomalyVerdict {
    /// Anomaly flag, false in the untrained degraded mode.
    pub fn is_anomaly(&self) -> bool {
        match self {
            Self::Untrained => false,
            Self::Scored { is_anomaly, .. } => *is_anomaly,
        }
    }

    /// Anomaly score, 0.5 in the untrained degraded mode.
    pub fn score(&self) -> f64 {
        match self {
            Self::Untrained => 0.5,
            Self::Scored { score, .. } => *score,
        }
    }
}

/// Per-feature standardization fitted on the training matrix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl StandardScaler {
    fn fit(data: &Array2<f64>) -> Self {
        let n = data.nrows().max(1) as f64;
        let ncols = data.ncols();
        let mut mean = vec![0.0; ncols];
        let mut std = vec![0.0; ncols];

        for c in 0..ncols {
            let col = data.column(c);
            let m = col.sum() / n;
            let var = col.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
            mean[c] = m;
            // Constant columns pass through unscaled.
            std[c] = if var.sqrt() > f64::EPSILON {
                var.sqrt()
            } else {
                1.0
            };
        }
        Self { mean, std }
    }

    fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(i, v)| (v - self.mean[i]) / self.std[i])
            .collect()
    }

    fn transform(&self, data: &Array2<f64>) -> Array2<f64> {
        let mut out = data.clone();
        for mut row in out.rows_mut() {
            for (i, v) in row.iter_mut().enumerate() {
                *v = (*v - self.mean[i]) / self.std[i];
            }
        }
        out
    }
}

/// Trainable anomaly model: scaler + estimator + frozen schema.
///
/// Instances are not safe to retrain while serving predictions. Train a fresh
/// instance and swap it in through [`ModelSlot::activate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyDetector {
    scaler: Option<StandardScaler>,
    forest: Option<IsolationForest>,
    feature_names: Vec<String>,
    trained: bool,
}

impl AnomalyDetector {
    /// Untrained detector.
    pub fn new() -> Self {
        Self {
            scaler: None,
            forest: None,
            feature_names: Vec::new(),
            trained: false,
        }
    }

    /// Whether `train` or a successful artifact load has run.
    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// The schema frozen at training time. Empty before training.
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Fit scaler and forest over the extracted feature matrix and freeze the
    /// feature schema. Requires at least one event.
    pub fn train(
        &mut self,
        events: &[SecurityEvent],
        contamination: f64,
    ) -> Result<TrainingInfo, SentinelError> {
        if events.is_empty() {
            return Err(SentinelError::Training(
                "training requires at least one event".into(),
            ));
        }

        let feature_names: Vec<String> = FEATURE_NAMES.iter().map(|s| s.to_string()).collect();
        let flat: Vec<f64> = events
            .iter()
            .flat_map(|e| EventFeatures::extract(e).to_vector())
            .collect();
        let matrix = Array2::from_shape_vec((events.len(), feature_names.len()), flat)
            .map_err(|e| SentinelError::Training(e.to_string()))?;

        let scaler = StandardScaler::fit(&matrix);
        let scaled = scaler.transform(&matrix);
        let forest = IsolationForest::fit(&scaled, DEFAULT_TREES, contamination, TRAIN_SEED);

        self.scaler = Some(scaler);
        self.forest = Some(forest);
        self.feature_names = feature_names;
        self.trained = true;

        Ok(TrainingInfo {
            model_type: "isolation_forest".into(),
            sample_count: events.len(),
            feature_count: self.feature_names.len(),
            contamination,
        })
    }

    /// Score one event. Untrained instances return the explicit degraded
    /// verdict instead of failing, so the pipeline stays usable before any
    /// model exists.
    pub fn predict(&self, event: &SecurityEvent) -> AnomalyVerdict {
        let (Some(scaler), Some(forest)) = (&self.scaler, &self.forest) else {
            return AnomalyVerdict::Untrained;
        };

        let features = EventFeatures::extract(event);
        // Zero-fill against the frozen schema so vectors from a newer
        // extractor still line up with what the forest was fitted on.
        let row: Vec<f64> = self
            .feature_names
            .iter()
            .map(|name| features.value(name).unwrap_or(0.0))
            .collect();
        let scaled = scaler.transform_row(&row);
        let sample = ndarray::ArrayView1::from(scaled.as_slice());

        let score = forest.score(sample);
        AnomalyVerdict::Scored {
            is_anomaly: forest.is_anomalous(score),
            score,
        }
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialized artifact: scaler, estimator, and schema as one atomic unit.
#[derive(Serialize, Deserialize)]
struct ArtifactBundle {
    scaler: StandardScaler,
    forest: IsolationForest,
    feature_names: Vec<String>,
}

/// Named save/load of model bundles under a base directory
#[derive(Debug, Clone)]
pub struct ModelArtifactStore {
    dir: PathBuf,
}

impl ModelArtifactStore {
    /// Artifact store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn artifact_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Persist a trained detector. Fails with [`SentinelError::NotTrained`]
    /// for untrained instances.
    pub fn save(&self, name: &str, detector: &AnomalyDetector) -> Result<PathBuf, SentinelError> {
        let (Some(scaler), Some(forest)) = (&detector.scaler, &detector.forest) else {
            return Err(SentinelError::NotTrained);
        };

        std::fs::create_dir_all(&self.dir)?;
        let bundle = ArtifactBundle {
            scaler: scaler.clone(),
            forest: forest.clone(),
            feature_names: detector.feature_names.clone(),
        };

        // Write-then-rename keeps the bundle atomic on disk.
        let path = self.artifact_path(name);
        let tmp = self.dir.join(format!("{name}.json.tmp"));
        std::fs::write(&tmp, serde_json::to_vec(&bundle)?)?;
        std::fs::rename(&tmp, &path)?;

        tracing::info!(model = name, path = %path.display(), "model artifact saved");
        Ok(path)
    }

    /// Restore a detector from a named artifact. A missing artifact surfaces
    /// as [`SentinelError::ArtifactNotFound`] and leaves callers' current
    /// model untouched.
    pub fn load(&self, name: &str) -> Result<AnomalyDetector, SentinelError> {
        let path = self.artifact_path(name);
        if !path.exists() {
            return Err(SentinelError::ArtifactNotFound(name.into()));
        }

        let raw = std::fs::read(&path)?;
        let bundle: ArtifactBundle = serde_json::from_slice(&raw)?;
        Ok(AnomalyDetector {
            scaler: Some(bundle.scaler),
            forest: Some(bundle.forest),
            feature_names: bundle.feature_names,
            trained: true,
        })
    }

    /// Base directory of this store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Shared slot holding the active production model.
///
/// One writer swaps, many concurrent readers keep scoring against the Arc
/// snapshot they already hold; activation never leaves zero or two models
/// active.
#[derive(Debug, Default)]
pub struct ModelSlot {
    active: RwLock<Option<Arc<AnomalyDetector>>>,
}

impl ModelSlot {
    /// Slot with no active model; predictions degrade to untrained verdicts.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Current active model, if any.
    pub fn snapshot(&self) -> Option<Arc<AnomalyDetector>> {
        self.active.read().clone()
    }

    /// Atomically replace the active model, returning the superseded one.
    pub fn activate(&self, detector: Arc<AnomalyDetector>) -> Option<Arc<AnomalyDetector>> {
        self.active.write().replace(detector)
    }

    /// Score against the active model, degrading when the slot is empty.
    pub fn predict(&self, event: &SecurityEvent) -> AnomalyVerdict {
        match self.snapshot() {
            Some(model) => model.predict(event),
            None => AnomalyVerdict::Untrained,
        }
    }
}

/// Registry metadata for one trained model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Unique model name, also the artifact name
    pub name: String,
    /// Estimator family
    pub model_type: String,
    /// Artifact version tag
    pub version: String,
    /// Frozen schema width
    pub feature_count: usize,
    /// Training sample count
    pub sample_count: usize,
    /// Contamination used at fit time
    pub contamination: f64,
    /// Whether this is the production model
    pub is_active: bool,
    /// Fit completion time
    pub trained_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventStatus;
    use chrono::TimeZone;

    fn training_events(n: usize) -> Vec<SecurityEvent> {
        (0..n)
            .map(|i| {
                let mut event = SecurityEvent::new("AWS", "CloudTrail", {
                    if i % 2 == 0 {
                        "ConsoleLogin"
                    } else {
                        "GetObject"
                    }
                });
                event.actor_id = Some(format!("user_{}", i % 10));
                event.ip_address = Some(format!("192.168.1.{}", i % 255));
                event.status = EventStatus::Success;
                event.occurred_at = Utc
                    .with_ymd_and_hms(2024, 3, 1, (9 + i % 8) as u32, 0, 0)
                    .unwrap();
                event
            })
            .collect()
    }

    #[test]
    fn test_untrained_predict_is_conservative() {
        let detector = AnomalyDetector::new();
        let verdict = detector.predict(&SecurityEvent::new("AWS", "CloudTrail", "ConsoleLogin"));

        assert_eq!(verdict, AnomalyVerdict::Untrained);
        assert!(!verdict.is_anomaly());
        assert_eq!(verdict.score(), 0.5);
    }

    #[test]
    fn test_train_freezes_schema() {
        let mut detector = AnomalyDetector::new();
        let info = detector.train(&training_events(100), 0.1).unwrap();

        assert!(detector.is_trained());
        assert_eq!(info.model_type, "isolation_forest");
        assert_eq!(info.sample_count, 100);
        assert_eq!(info.feature_count, FEATURE_NAMES.len());
        assert_eq!(detector.feature_names().len(), FEATURE_NAMES.len());
    }

    #[test]
    fn test_train_rejects_empty_input() {
        let mut detector = AnomalyDetector::new();
        assert!(matches!(
            detector.train(&[], 0.1),
            Err(SentinelError::Training(_))
        ));
        assert!(!detector.is_trained());
    }

    #[test]
    fn test_trained_predict_scores_in_range() {
        let events = training_events(100);
        let mut detector = AnomalyDetector::new();
        detector.train(&events, 0.1).unwrap();

        let verdict = detector.predict(&events[0]);
        let AnomalyVerdict::Scored { score, .. } = verdict else {
            panic!("expected scored verdict");
        };
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn test_artifact_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelArtifactStore::new(dir.path());

        let events = training_events(60);
        let mut detector = AnomalyDetector::new();
        detector.train(&events, 0.1).unwrap();

        store.save("baseline", &detector).unwrap();
        let restored = store.load("baseline").unwrap();

        assert!(restored.is_trained());
        assert_eq!(restored.feature_names(), detector.feature_names());
        for event in &events[..10] {
            assert_eq!(restored.predict(event), detector.predict(event));
        }
    }

    #[test]
    fn test_save_untrained_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelArtifactStore::new(dir.path());
        let detector = AnomalyDetector::new();

        assert!(matches!(
            store.save("nope", &detector),
            Err(SentinelError::NotTrained)
        ));
    }

    #[test]
    fn test_load_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelArtifactStore::new(dir.path());

        assert!(matches!(
            store.load("ghost"),
            Err(SentinelError::ArtifactNotFound(name)) if name == "ghost"
        ));
    }

    #[test]
    fn test_slot_swap_supersedes_exactly_one() {
        let slot = ModelSlot::empty();
        assert!(slot.snapshot().is_none());

        let mut first = AnomalyDetector::new();
        first.train(&training_events(50), 0.1).unwrap();
        assert!(slot.activate(Arc::new(first)).is_none());

        let mut second = AnomalyDetector::new();
        second.train(&training_events(80), 0.1).unwrap();
        let superseded = slot.activate(Arc::new(second));

        assert!(superseded.is_some());
        assert!(slot.snapshot().is_some());
    }
}
