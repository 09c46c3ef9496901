//! Trained-model state and its on-disk JSON format.
//!
//! The current format stores one entry per metric plus a `__metadata__`
//! record carrying the tolerance the model was trained with:
//!
//! ```json
//! {
//!   "__metadata__": {"version": 1, "tolerance": 5.0},
//!   "suite/test/0000:./iter/throughput/tps.mean": {
//!     "equation": [0.05, -4.0],
//!     "raw": 100.0
//!   }
//! }
//! ```
//!
//! Older files stored the bare equation per metric with no metadata; they
//! load as `{equation, raw: null}`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ModelError;

/// Trained knowledge about a single metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Linear mapping from destination value to predicted difference:
    /// `difference = equation[0] * dst + equation[1]`.
    pub equation: [f64; 2],
    /// Historical baseline average, when known.
    pub raw: Option<f64>,
}

/// Metadata recorded at training time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMeta {
    pub version: u32,
    pub tolerance: f64,
}

/// Complete trained state of a model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelState {
    /// Present once the model was trained (or loaded from a current-format
    /// file); legacy files carry no metadata.
    pub meta: Option<ModelMeta>,
    pub entries: BTreeMap<String, ModelEntry>,
}

/// Current-format file layout: metadata key plus flattened metric entries.
#[derive(Debug, Serialize, Deserialize)]
struct ModelFile {
    #[serde(rename = "__metadata__")]
    meta: ModelMeta,
    #[serde(flatten)]
    entries: BTreeMap<String, ModelEntry>,
}

/// The two supported on-disk layouts, selected once at load time.
#[derive(Debug)]
enum ModelFormat {
    Current(ModelFile),
    Legacy(BTreeMap<String, [f64; 2]>),
}

impl ModelFormat {
    fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let is_current = value
            .as_object()
            .is_some_and(|object| object.contains_key("__metadata__"));
        if is_current {
            Ok(ModelFormat::Current(serde_json::from_value(value)?))
        } else {
            Ok(ModelFormat::Legacy(serde_json::from_value(value)?))
        }
    }

    fn into_state(self) -> ModelState {
        match self {
            ModelFormat::Current(file) => ModelState {
                meta: Some(file.meta),
                entries: file.entries,
            },
            ModelFormat::Legacy(equations) => ModelState {
                meta: None,
                entries: equations
                    .into_iter()
                    .map(|(test, equation)| {
                        (
                            test,
                            ModelEntry {
                                equation,
                                raw: None,
                            },
                        )
                    })
                    .collect(),
            },
        }
    }
}

impl ModelState {
    /// Load trained state from a JSON file, accepting both formats.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let text = std::fs::read_to_string(path).map_err(|source| ModelError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ModelError::Format {
            path: path.display().to_string(),
            source,
        })
    }

    /// Parse trained state from JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Ok(ModelFormat::from_value(value)?.into_state())
    }

    /// Serialize to the current JSON format.
    ///
    /// Fails with [`ModelError::Untrained`] when no metadata is present,
    /// which means `identify` was never run.
    pub fn to_json(&self) -> Result<String, ModelError> {
        let meta = self.meta.clone().ok_or(ModelError::Untrained)?;
        let file = ModelFile {
            meta,
            entries: self.entries.clone(),
        };
        serde_json::to_string_pretty(&file).map_err(|source| ModelError::Format {
            path: "<memory>".to_string(),
            source,
        })
    }

    /// Write the current JSON format to a file.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|source| ModelError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn get(&self, test_name: &str) -> Option<&ModelEntry> {
        self.entries.get(test_name)
    }

    /// Record training metadata, keeping an existing version number.
    pub(super) fn stamp_metadata(&mut self, tolerance: f64) {
        let version = self.meta.as_ref().map_or(1, |meta| meta.version);
        self.meta = Some(ModelMeta { version, tolerance });
    }
}
