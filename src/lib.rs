//! CloudSentinel detection-and-response engine
//!
//! Ingests normalized cloud audit events, scores them against a trained
//! anomaly model, refines the score with event context and external
//! intelligence, and drives alerting and automated containment.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     DETECTION PIPELINE                           │
//! │                                                                  │
//! │  ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────────┐  │
//! │  │ Feature  │──▶│ Anomaly  │──▶│  Threat  │──▶│ Categorizer  │  │
//! │  │ Extract  │   │  Model   │   │  Scorer  │   │ (rule table) │  │
//! │  └──────────┘   └──────────┘   └──────────┘   └──────┬───────┘  │
//! │                      ▲                               │          │
//! │               ┌──────┴──────┐                 ┌──────▼───────┐  │
//! │               │ Model Slot  │                 │    Alert     │  │
//! │               │ (hot swap)  │                 │  Lifecycle   │  │
//! │               └─────────────┘                 └──────┬───────┘  │
//! │                                                      │          │
//! │  ┌──────────────┐  ┌──────────────┐           ┌──────▼───────┐  │
//! │  │ Threat Intel │  │   Notifier   │           │   Response   │  │
//! │  │   (lookup)   │  │ (crit/high)  │           │    Policy    │  │
//! │  └──────────────┘  └──────────────┘           └──────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod alerts;
pub mod config;
pub mod event;
pub mod features;
pub mod intel;
pub mod isolation;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod response;
pub mod scoring;
pub mod store;

use thiserror::Error;
use uuid::Uuid;

pub use alerts::{AlertManager, AlertStatus, AlertUpdate, AnalystFeedback, ThreatAlert};
pub use config::SentinelConfig;
pub use event::{EventStatus, GeoLocation, SecurityEvent};
pub use features::EventFeatures;
pub use intel::{Enrichment, ThreatIntel};
pub use model::{AnomalyDetector, AnomalyVerdict, ModelSlot, TrainingInfo};
pub use pipeline::Pipeline;
pub use response::{ActionOutcome, ResponseAction, ResponseEngine};
pub use scoring::{Severity, ThreatCategory};
pub use store::{MemoryStore, SecurityStore};

/// Engine error taxonomy
///
/// An untrained model is deliberately absent here: prediction before training
/// is a defined degraded mode ([`AnomalyVerdict::Untrained`]), not a failure.
#[derive(Debug, Error)]
pub enum SentinelError {
    /// The requested model artifact does not exist in the artifact store.
    #[error("model artifact not found: {0}")]
    ArtifactNotFound(String),
    /// Training was rejected or failed before a model was produced.
    #[error("training error: {0}")]
    Training(String),
    /// The model has no fitted state for the requested operation.
    #[error("model is not trained")]
    NotTrained,
    /// Persistence collaborator failure. Fatal to the current pipeline run.
    #[error("store error: {0}")]
    Store(String),
    /// No alert exists with the given identifier.
    #[error("alert not found: {0}")]
    AlertNotFound(Uuid),
    /// Filesystem failure while reading or writing a model artifact.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Artifact or payload (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
