//! Cross-build averages model.

use std::collections::BTreeMap;

use crate::stats::uncertainty;

use super::Opinion;

/// Accumulates per-metric scores across an ordered sequence of destination
/// runs sharing one baseline, and contributes one extra weighted opinion once
/// the last run of the sequence is being evaluated.
///
/// The doubled average deliberately amplifies small systematic shifts that
/// stay inside tolerance on every individual build but point the same way on
/// all of them.
#[derive(Debug, Default)]
pub struct BuildAverages {
    averages: BTreeMap<String, (f64, usize)>,
    weight: f64,
    last: bool,
}

impl BuildAverages {
    /// Amplification applied to the accumulated average.
    const COEFFICIENT: f64 = 2.0;

    pub fn new(weight: f64) -> Self {
        Self {
            averages: BTreeMap::new(),
            weight,
            last: false,
        }
    }

    /// Signal that the next evaluated run is the final one of the sequence.
    pub fn mark_last(&mut self) {
        self.last = true;
    }

    pub fn is_last(&self) -> bool {
        self.last
    }

    /// Fold one metric score into the running average. Returns no opinion
    /// until the last run has been signalled; the opinion weight shrinks by
    /// the uncertainty coefficient while fewer than eight builds contributed.
    pub fn check_result(&mut self, name: &str, score: f64) -> Vec<Opinion> {
        let entry = self.averages.entry(name.to_string()).or_insert((0.0, 0));
        entry.0 += score;
        entry.1 += 1;
        if !self.last {
            return Vec::new();
        }
        let (sum, count) = *entry;
        let average = sum / count as f64 * Self::COEFFICIENT;
        let weight = if count < 8 {
            self.weight / uncertainty(count)
        } else {
            self.weight
        };
        vec![Opinion::new("avg", average, weight)]
    }
}
