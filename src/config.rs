//! Configuration for the comparison engine.

use serde::{Deserialize, Serialize};

/// Tolerances and weights driving metric classification.
///
/// Tolerances are percentages for `mean` metrics and absolute deltas for
/// `stddev` metrics. The builds-average weight controls how strongly the
/// cross-build averages opinion pulls the combined score on the last run of a
/// sequence; at `0.0` it is recorded for information only.
///
/// # Example
/// ```
/// use perfcmp::config::CompareConfig;
///
/// let config = CompareConfig::default();
/// assert_eq!(config.mean_tolerance, 5.0);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareConfig {
    /// Maximum acceptable percentage deviation for `mean` metrics.
    pub mean_tolerance: f64,

    /// Maximum acceptable absolute deviation for `stddev` metrics.
    pub stddev_tolerance: f64,

    /// Weight of the cross-build averages opinion (0 = informational only).
    pub builds_average_weight: f64,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            mean_tolerance: 5.0,
            stddev_tolerance: 5.0,
            builds_average_weight: 0.0,
        }
    }
}

impl CompareConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.mean_tolerance < 0.0 {
            return Err(format!(
                "mean_tolerance must be non-negative, got {}",
                self.mean_tolerance
            ));
        }
        if self.stddev_tolerance < 0.0 {
            return Err(format!(
                "stddev_tolerance must be non-negative, got {}",
                self.stddev_tolerance
            ));
        }
        if self.builds_average_weight < 0.0 {
            return Err(format!(
                "builds_average_weight must be non-negative, got {}",
                self.builds_average_weight
            ));
        }
        Ok(())
    }
}
