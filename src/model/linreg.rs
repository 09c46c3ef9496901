//! Linear-regression tolerance models.
//!
//! Both models fit, per metric, a line mapping the historical value range
//! onto the tolerance band: the low end of the range maps to `-tolerance`,
//! the high end to `+tolerance`. They differ only in how the range is
//! derived from historical samples.

use tracing::debug;

use crate::measurement::MetricValue;
use crate::stats;

use super::store::{ModelEntry, ModelState};
use super::{Model, Opinion, TrainingData};

/// Solve the 2x2 system mapping `(low -> -tolerance, high -> +tolerance)`
/// into line coefficients `(slope, intercept)`. A singular system
/// (`low == high`) has no usable mapping.
fn fit_equation(low: f64, high: f64, tolerance: f64) -> Option<[f64; 2]> {
    let det = high - low;
    if det == 0.0 {
        return None;
    }
    let slope = 2.0 * tolerance / det;
    let intercept = tolerance - slope * high;
    Some([slope, intercept])
}

/// Extract the numeric samples for one metric; `None` when any sample is
/// non-numeric (error payloads and the like are not trainable).
fn numeric_samples(samples: &std::collections::BTreeMap<String, MetricValue>) -> Option<Vec<f64>> {
    let values: Option<Vec<f64>> = samples.values().map(MetricValue::as_f64).collect();
    values.filter(|values| !values.is_empty())
}

/// Shared check: apply the trained line to the destination value and, when a
/// historical baseline is known, add an informational raw-vs-history opinion.
fn check_state(
    state: &ModelState,
    test_name: &str,
    src: &MetricValue,
    dst: &MetricValue,
) -> Vec<Opinion> {
    let Some(entry) = state.get(test_name) else {
        return Vec::new();
    };
    let Some(dst_value) = dst.as_f64() else {
        return Vec::new();
    };
    let [slope, intercept] = entry.equation;
    let mut model_opinion = Opinion::new("model", slope * dst_value + intercept, 1.0);
    if let Some(raw) = entry.raw {
        model_opinion = model_opinion.with_src(MetricValue::Num(raw));
    }
    let mut out = vec![model_opinion];
    if let Some(raw) = entry.raw {
        let difference = if test_name.ends_with("mean") {
            if src.as_f64() == Some(0.0) {
                0.0
            } else {
                (dst_value - raw) / raw.abs() * 100.0
            }
        } else {
            raw - dst_value
        };
        out.push(Opinion::new("mraw", difference, 0.0));
    }
    out
}

/// Model deriving the expected range directly from historical min/max values.
///
/// When historical samples cluster more tightly than the configured
/// tolerance, the range is widened toward `average * (1 ± tolerance/100/1.1)`
/// so the model never becomes meaningfully stricter than the nominal
/// tolerance.
#[derive(Debug)]
pub struct LinearModel {
    tolerance: f64,
    state: ModelState,
}

impl LinearModel {
    /// Coefficient softening the widened range so model-based criteria stay
    /// slightly stricter than the raw tolerance, but not much.
    const TOO_STRICT_COEFFICIENT: f64 = 1.1;

    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            state: ModelState::default(),
        }
    }

    /// Wrap an already-trained state (e.g. loaded from disk) for checking.
    pub fn with_state(tolerance: f64, state: ModelState) -> Self {
        Self { tolerance, state }
    }

    fn identify_range(&mut self, test: &str, average: f64, low: f64, high: f64) {
        match fit_equation(low, high, self.tolerance) {
            Some(equation) => {
                self.state.entries.insert(
                    test.to_string(),
                    ModelEntry {
                        equation,
                        raw: Some(average),
                    },
                );
            }
            None => {
                debug!("{test}: singular matrix, skipping...");
            }
        }
    }
}

impl Model for LinearModel {
    fn name(&self) -> &'static str {
        "linear-regression"
    }

    fn identify(&mut self, data: &TrainingData) -> &ModelState {
        self.state.stamp_metadata(self.tolerance);
        let too_strict = self.tolerance / 100.0 / Self::TOO_STRICT_COEFFICIENT;
        for (test, samples) in data {
            let Some(values) = numeric_samples(samples) else {
                continue;
            };
            let average = stats::mean(&values);
            let mut max_value = stats::max(&values);
            let highest = average * (1.0 + too_strict);
            if highest > max_value {
                debug!("{test}: adjusting max_value from {max_value:.2} to {highest:.2}");
                max_value = highest;
            }
            let mut min_value = stats::min(&values);
            let lowest = average * (1.0 - too_strict);
            if lowest < min_value {
                debug!("{test}: adjusting min_value from {min_value:.2} to {lowest:.2}");
                min_value = lowest;
            }
            self.identify_range(test, average, min_value, max_value);
        }
        &self.state
    }

    fn check_result(&self, test_name: &str, src: &MetricValue, dst: &MetricValue) -> Vec<Opinion> {
        check_state(&self.state, test_name, src, dst)
    }

    fn state(&self) -> &ModelState {
        &self.state
    }
}

/// Model deriving the expected range from the historical mean plus/minus
/// three standard deviations, widened by the sample-count uncertainty
/// correction.
#[derive(Debug)]
pub struct StdevModel {
    inner: LinearModel,
}

impl StdevModel {
    const ERROR_COEFFICIENT: f64 = 3.0;

    pub fn new(tolerance: f64) -> Self {
        Self {
            inner: LinearModel::new(tolerance),
        }
    }
}

impl Model for StdevModel {
    fn name(&self) -> &'static str {
        "stddev"
    }

    fn identify(&mut self, data: &TrainingData) -> &ModelState {
        self.inner.state.stamp_metadata(self.inner.tolerance);
        for (test, samples) in data {
            let Some(values) = numeric_samples(samples) else {
                continue;
            };
            let uncertainty = stats::uncertainty(values.len());
            let average = stats::mean(&values);
            let max_stddev = Self::ERROR_COEFFICIENT * stats::stddev(&values);
            let max_value = average + max_stddev * uncertainty;
            let min_value = average - max_stddev * uncertainty;
            self.inner.identify_range(test, average, min_value, max_value);
        }
        &self.inner.state
    }

    fn check_result(&self, test_name: &str, src: &MetricValue, dst: &MetricValue) -> Vec<Opinion> {
        self.inner.check_result(test_name, src, dst)
    }

    fn state(&self) -> &ModelState {
        self.inner.state()
    }
}
