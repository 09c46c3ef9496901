//! Flat measurement tuples produced by a measurement source.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A metric value as found in result files: numeric for scores, textual for
/// captured error payloads.
///
/// Textual values that parse as numbers behave numerically wherever the
/// engine needs a float, mirroring how loosely typed result files store
/// numbers as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Num(f64),
    Text(String),
}

impl MetricValue {
    /// Numeric view of the value, parsing numeric strings.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Num(value) => Some(*value),
            MetricValue::Text(text) => text.trim().parse().ok(),
        }
    }

    /// Convert a raw JSON scalar into a metric value. Objects/arrays have no
    /// meaning as scores and map to their JSON text form.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(number) => {
                MetricValue::Num(number.as_f64().unwrap_or(f64::NAN))
            }
            serde_json::Value::String(text) => MetricValue::Text(text.clone()),
            other => MetricValue::Text(other.to_string()),
        }
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Num(value) => write!(f, "{value:.2}"),
            MetricValue::Text(text) => f.write_str(text),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Num(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::Text(value.to_string())
    }
}

/// Free-form `key -> value` parameters attached to a measurement
/// (benchmark parameters, file hashes of error directories, ...).
pub type Params = BTreeMap<String, String>;

/// One named, comparable measurement from a benchmark run.
///
/// `name` is hierarchical and ends in `.mean`, `.stddev` or `.error`; the
/// stem before the suffix identifies the metric.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub name: String,
    pub value: MetricValue,
    pub primary: bool,
    pub params: Params,
}

impl Measurement {
    pub fn new(
        name: impl Into<String>,
        value: impl Into<MetricValue>,
        primary: bool,
        params: Params,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            primary,
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_strings_behave_numerically() {
        assert_eq!(MetricValue::Text("12.5".into()).as_f64(), Some(12.5));
        assert_eq!(MetricValue::Text(" 3 ".into()).as_f64(), Some(3.0));
        assert_eq!(MetricValue::Text("oops".into()).as_f64(), None);
        assert_eq!(MetricValue::Num(7.0).as_f64(), Some(7.0));
    }

    #[test]
    fn from_json_scalars() {
        assert_eq!(
            MetricValue::from_json(&serde_json::json!(4.5)),
            MetricValue::Num(4.5)
        );
        assert_eq!(
            MetricValue::from_json(&serde_json::json!("err")),
            MetricValue::Text("err".into())
        );
    }

    #[test]
    fn equality_across_kinds() {
        assert_ne!(MetricValue::Num(1.0), MetricValue::Text("1".into()));
        assert_eq!(MetricValue::Text("a".into()), MetricValue::Text("a".into()));
    }
}
