//! Pluggable tolerance models.
//!
//! A model turns historical knowledge about a metric into an opinion about a
//! new source/destination pair. Opinions from all registered models are
//! combined into one weighted score per metric (see `compare`).

mod averages;
mod linreg;
mod store;

pub use averages::BuildAverages;
pub use linreg::{LinearModel, StdevModel};
pub use store::{ModelEntry, ModelMeta, ModelState};

use std::collections::BTreeMap;

use thiserror::Error;

use crate::measurement::MetricValue;

/// Training input: `test_name -> {sample_id -> value}`.
pub type TrainingData = BTreeMap<String, BTreeMap<String, MetricValue>>;

/// Errors from model construction, training and persistence.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown model identifier: {0}")]
    UnknownIdentifier(String),

    #[error("model has not been trained; nothing to save")]
    Untrained,

    #[error("failed to read model file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to write model file {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid model format in {path}: {source}")]
    Format {
        path: String,
        source: serde_json::Error,
    },
}

/// One model's view of a single metric comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Opinion {
    /// Short label identifying the contribution in report text.
    pub label: &'static str,
    /// Predicted difference (percentage for mean metrics).
    pub difference: f64,
    /// Weight of this opinion in the combined score; `0.0` is informational.
    pub weight: f64,
    /// Optional corrected source value backing the prediction.
    pub corrected_src: Option<MetricValue>,
}

impl Opinion {
    pub fn new(label: &'static str, difference: f64, weight: f64) -> Self {
        Self {
            label,
            difference,
            weight,
            corrected_src: None,
        }
    }

    pub fn with_src(mut self, src: MetricValue) -> Self {
        self.corrected_src = Some(src);
        self
    }
}

/// A tolerance model: trainable from historical samples, consultable for any
/// metric comparison. An empty opinion list means "no opinion on this one".
pub trait Model: Send + Sync + std::fmt::Debug {
    /// Registry identifier of this model kind.
    fn name(&self) -> &'static str;

    /// Train the model from historical data, returning the new state.
    fn identify(&mut self, data: &TrainingData) -> &ModelState;

    /// Apply the model to one metric comparison.
    fn check_result(&self, test_name: &str, src: &MetricValue, dst: &MetricValue) -> Vec<Opinion>;

    /// Trained state (for persistence).
    fn state(&self) -> &ModelState;
}

/// Resolve a model constructor by its registry name.
///
/// This is a static registry: the two supported identifiers map directly to
/// constructors, and anything else is rejected up front.
pub fn model_by_name(name: &str, tolerance: f64) -> Result<Box<dyn Model>, ModelError> {
    match name {
        "linear-regression" => Ok(Box::new(LinearModel::new(tolerance))),
        "stddev" => Ok(Box::new(StdevModel::new(tolerance))),
        other => Err(ModelError::UnknownIdentifier(other.to_string())),
    }
}

/// Registry names accepted by [`model_by_name`].
pub fn model_names() -> &'static [&'static str] {
    &["linear-regression", "stddev"]
}
