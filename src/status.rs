//! Per-metric comparison statuses.
//!
//! The numeric values carry the pass/fail convention used throughout the
//! engine and reports: non-negative statuses pass, negative statuses fail.
//! Out-of-tolerance *gains* are deliberately classified apart from losses:
//! an unexpectedly large improvement is suspicious (wrong units, broken
//! benchmark, dropped work) and is surfaced as a skip in xunit output rather
//! than a hard failure.

use serde::{Deserialize, Serialize};

/// Classification of a single metric comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// Within half of the tolerance band.
    Pass,
    /// Gain between half tolerance and full tolerance; still passing.
    MinorGain,
    /// Loss between half tolerance and full tolerance; still passing.
    MinorLoss,
    /// Loss beyond tolerance; hard failure.
    FailLoss,
    /// Broken or unmatched metric.
    Error,
    /// Gain beyond tolerance; soft failure reported as a skip.
    FailGain,
    /// Comparison was skipped entirely.
    Skip,
}

impl Status {
    /// Numeric value preserving the ordering convention: `>= 0` passes,
    /// `< 0` fails, `Skip` stays out of both failure counting and xunit
    /// failure elements.
    pub fn value(self) -> i32 {
        match self {
            Status::Pass => 0,
            Status::MinorGain => 1,
            Status::MinorLoss => 2,
            Status::FailLoss => -1,
            Status::Error => -2,
            Status::FailGain => -3,
            Status::Skip => 99,
        }
    }

    /// Whether this status counts as a failed check.
    pub fn is_failure(self) -> bool {
        self.value() < 0
    }

    /// Report label, padded to four characters like the log output expects.
    pub fn label(self) -> &'static str {
        match self {
            Status::Pass | Status::MinorGain | Status::MinorLoss => "PASS",
            Status::FailLoss => "FAIL",
            Status::Error | Status::FailGain | Status::Skip => "ERR ",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_convention() {
        assert!(!Status::Pass.is_failure());
        assert!(!Status::MinorGain.is_failure());
        assert!(!Status::MinorLoss.is_failure());
        assert!(Status::FailLoss.is_failure());
        assert!(Status::Error.is_failure());
        assert!(Status::FailGain.is_failure());
        assert!(!Status::Skip.is_failure());
    }

    #[test]
    fn labels_collapse_to_three_classes() {
        assert_eq!(Status::MinorLoss.label(), "PASS");
        assert_eq!(Status::FailLoss.label(), "FAIL");
        assert_eq!(Status::FailGain.label(), "ERR ");
        assert_eq!(Status::Skip.label(), "ERR ");
    }

    #[test]
    fn values_are_stable() {
        assert_eq!(Status::Pass.value(), 0);
        assert_eq!(Status::MinorGain.value(), 1);
        assert_eq!(Status::MinorLoss.value(), 2);
        assert_eq!(Status::FailLoss.value(), -1);
        assert_eq!(Status::Error.value(), -2);
        assert_eq!(Status::FailGain.value(), -3);
        assert_eq!(Status::Skip.value(), 99);
    }
}
