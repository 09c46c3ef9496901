//! Closest-run matching.
//!
//! Given one reference measurement set and several candidate sets, pick the
//! candidate that statistically resembles the reference most closely. Each
//! metric contributes a similarity score through one of two modes: a
//! normalized probability density when standard deviations are known, or a
//! normalized-distance fallback when they are not.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use tracing::debug;

use crate::measurement::{Measurement, MetricValue};
use crate::stats;

#[derive(Debug, Clone, Default)]
struct Candidate {
    value: Option<MetricValue>,
    stddev: Option<f64>,
}

#[derive(Debug)]
struct Reference {
    value: Option<MetricValue>,
    primary: bool,
    stddev: Option<f64>,
}

/// Normalized normal probability density.
///
/// The plain density is rescaled by the standard deviation so the peak is
/// always ~1 regardless of the deviation used; that keeps per-metric scores
/// comparable when accumulating across metrics with very different spreads.
fn norm_normpdf(x: f64, mean: f64, sd: f64) -> f64 {
    let var = sd * sd;
    let denom = (2.0 * std::f64::consts::PI * var).sqrt();
    let num = (-(x - mean).powi(2) / (2.0 * var)).exp();
    num / denom * sd * 2.51
}

/// Distance between a candidate value and the reference value: absolute for
/// two numbers, equality (0/1) otherwise.
fn distance(candidate: &MetricValue, reference: &Option<MetricValue>) -> f64 {
    if let (MetricValue::Num(a), Some(MetricValue::Num(b))) = (candidate, reference.as_ref()) {
        return (a - b).abs();
    }
    if reference.as_ref() == Some(candidate) {
        0.0
    } else {
        1.0
    }
}

/// Merge the mean and stddev measurements of the reference run per metric
/// stem.
fn reference_map(src: &[Measurement]) -> BTreeMap<String, Reference> {
    let mut map: BTreeMap<String, Reference> = BTreeMap::new();
    for measurement in src {
        if let Some(stem) = measurement.name.strip_suffix(".stddev") {
            map.entry(stem.to_string())
                .and_modify(|entry| entry.stddev = measurement.value.as_f64())
                .or_insert_with(|| Reference {
                    value: None,
                    primary: measurement.primary,
                    stddev: measurement.value.as_f64(),
                });
        } else {
            let stem = measurement
                .name
                .rsplit_once('.')
                .map_or(measurement.name.as_str(), |(stem, _)| stem);
            map.entry(stem.to_string())
                .and_modify(|entry| {
                    entry.value = Some(measurement.value.clone());
                    entry.primary |= measurement.primary;
                })
                .or_insert_with(|| Reference {
                    value: Some(measurement.value.clone()),
                    primary: measurement.primary,
                    stddev: None,
                });
        }
    }
    map
}

/// Collect candidate values per metric stem, one slot per candidate run.
/// Zero stddevs are dropped (they carry no spread information).
fn candidate_map(candidates: &[Vec<Measurement>]) -> BTreeMap<String, Vec<Candidate>> {
    let slots = candidates.len();
    let mut map: BTreeMap<String, Vec<Candidate>> = BTreeMap::new();
    for (idx, run) in candidates.iter().enumerate() {
        for measurement in run {
            if let Some(stem) = measurement.name.strip_suffix(".stddev") {
                if matches!(measurement.value, MetricValue::Num(v) if v == 0.0) {
                    continue;
                }
                map.entry(stem.to_string())
                    .or_insert_with(|| vec![Candidate::default(); slots])[idx]
                    .stddev = measurement.value.as_f64();
            } else {
                let stem = measurement
                    .name
                    .rsplit_once('.')
                    .map_or(measurement.name.as_str(), |(stem, _)| stem);
                map.entry(stem.to_string())
                    .or_insert_with(|| vec![Candidate::default(); slots])[idx]
                    .value = Some(measurement.value.clone());
            }
        }
    }
    map
}

enum Selection {
    Unique(usize),
    Tied(Vec<usize>),
}

/// Highest total among the selected candidates; unique winner or the set of
/// tied indices. The match count deliberately looks at all candidates so a
/// non-selected candidate sharing the top score keeps the tie alive.
fn process_score(totals: &[f64], selection: &[usize]) -> Selection {
    let score = selection
        .iter()
        .map(|idx| totals[*idx])
        .fold(f64::NEG_INFINITY, f64::max);
    let count = totals.iter().filter(|value| **value == score).count();
    debug!("Score: {score} (matching {count} result(s))");
    if count == 1 {
        if let Some(winner) = selection.iter().find(|idx| totals[**idx] == score) {
            return Selection::Unique(*winner);
        }
    }
    let tied: Vec<usize> = selection
        .iter()
        .copied()
        .filter(|idx| totals[*idx] == score)
        .collect();
    if tied.is_empty() {
        Selection::Tied(selection.to_vec())
    } else {
        Selection::Tied(tied)
    }
}

/// Select the candidate run that most closely resembles the reference run.
///
/// Only metrics present in the reference contribute: extra metrics of a
/// candidate are no evidence of dissimilarity. Primary metrics are summed
/// apart from secondary ones; selection first maximizes the primary total
/// and falls back to the secondary total only to break ties. The returned
/// index is always within `0..candidates.len()`.
pub fn closest_run(src: &[Measurement], candidates: &[Vec<Measurement>]) -> Result<usize> {
    if candidates.is_empty() {
        bail!("no candidate runs to compare against");
    }
    let reference = reference_map(src);
    let storage = candidate_map(candidates);
    let slots = candidates.len();
    let mut totals = [vec![0.0; slots], vec![0.0; slots]];

    for (name, entry) in &reference {
        let Some(this) = storage.get(name) else {
            continue;
        };
        let category = usize::from(!entry.primary);
        let src_stddev = entry.stddev.filter(|stddev| *stddev != 0.0);
        let stddev_known = src_stddev.is_some() || this.iter().any(|c| c.stddev.is_some());
        let src_value = entry.value.as_ref().and_then(MetricValue::as_f64);

        let scores: Vec<f64> = match (stddev_known, src_value) {
            (true, Some(reference_value)) => {
                // Pooled deviation over every sample that knows one, widened
                // by the uncertainty correction and doubled to absorb
                // machine-to-machine jitter.
                let mut stddevs: Vec<f64> = this.iter().filter_map(|c| c.stddev).collect();
                if let Some(stddev) = src_stddev {
                    stddevs.push(stddev);
                }
                let norm_stddev =
                    stats::mean(&stddevs) * stats::uncertainty(stddevs.len()) * 2.0;
                this.iter()
                    .map(|candidate| {
                        match candidate.value.as_ref().and_then(MetricValue::as_f64) {
                            Some(value) => norm_normpdf(value, reference_value, norm_stddev),
                            None => 0.0,
                        }
                    })
                    .collect()
            }
            _ => {
                let raw: Vec<Option<f64>> = this
                    .iter()
                    .map(|candidate| {
                        candidate
                            .value
                            .as_ref()
                            .map(|value| distance(value, &entry.value))
                    })
                    .collect();
                let known: Vec<f64> = raw.iter().filter_map(|d| *d).collect();
                if known.is_empty() {
                    debug!("{name}: SKIP - no candidate values");
                    continue;
                }
                let min_distance = stats::min(&known);
                let max_distance = stats::max(&known);
                let distances: Vec<f64> = if raw.iter().any(Option::is_none) {
                    // Missing results pay twice the worst known distance.
                    let mut penalty = if min_distance == max_distance {
                        min_distance * 2.0
                    } else {
                        max_distance * 2.0
                    };
                    if min_distance == 0.0 {
                        penalty = 1.0;
                    }
                    raw.into_iter().map(|d| d.unwrap_or(penalty)).collect()
                } else if min_distance == max_distance {
                    // Identical distances carry no discriminating signal.
                    debug!("{name}: SKIP - same distances");
                    continue;
                } else {
                    raw.into_iter().flatten().collect()
                };
                // Normalize into 0-3 and score through the simplified
                // normal; halved so this mode stays weaker than the
                // stddev-aware one.
                let one_third_of_max = stats::max(&distances) / 3.0;
                distances
                    .iter()
                    .map(|d| (-0.5 * (d / one_third_of_max).powi(2)).exp() / 2.0)
                    .collect()
            }
        };
        for (idx, score) in scores.iter().enumerate() {
            totals[category][idx] += score;
        }
        debug!(
            "{} {name}: {scores:?}",
            if entry.primary { "P" } else { "S" }
        );
    }

    let mut selection: Vec<usize> = (0..slots).collect();
    for category_totals in &totals {
        match process_score(category_totals, &selection) {
            Selection::Unique(winner) => return Ok(winner),
            Selection::Tied(tied) => selection = tied,
        }
    }
    Ok(selection[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Params;

    fn m(name: &str, value: f64, primary: bool) -> Measurement {
        Measurement::new(name, value, primary, Params::new())
    }

    const X_MEAN: &str = "p/t/0000:./i/throughput/x.mean";
    const X_STD: &str = "p/t/0000:./i/throughput/x.stddev";
    const Y_MEAN: &str = "p/t/0000:./i/throughput/y.mean";

    #[test]
    fn rejects_empty_candidate_list() {
        assert!(closest_run(&[m(X_MEAN, 1.0, true)], &[]).is_err());
    }

    #[test]
    fn picks_closer_candidate_without_stddevs() {
        let src = vec![m(X_MEAN, 100.0, true)];
        let far = vec![m(X_MEAN, 150.0, true)];
        let near = vec![m(X_MEAN, 101.0, true)];
        assert_eq!(closest_run(&src, &[far.clone(), near.clone()]).unwrap(), 1);
        assert_eq!(closest_run(&src, &[near, far]).unwrap(), 0);
    }

    #[test]
    fn missing_metric_penalizes_but_does_not_break() {
        let src = vec![m(X_MEAN, 100.0, true), m(Y_MEAN, 10.0, true)];
        let complete = vec![m(X_MEAN, 101.5, true), m(Y_MEAN, 10.2, true)];
        let incomplete = vec![m(X_MEAN, 101.0, true)];
        // The incomplete candidate is slightly closer on x but pays the
        // missing-metric penalty on y.
        let winner = closest_run(&src, &[complete, incomplete]).unwrap();
        assert_eq!(winner, 0);
    }

    #[test]
    fn index_is_always_in_bounds() {
        let src = vec![m(X_MEAN, 100.0, true)];
        let candidates = vec![
            vec![m(X_MEAN, 100.0, true)],
            vec![m(X_MEAN, 100.0, true)],
            vec![m(X_MEAN, 100.0, true)],
        ];
        let winner = closest_run(&src, &candidates).unwrap();
        assert!(winner < candidates.len());
    }

    #[test]
    fn stddev_mode_prefers_values_near_the_reference() {
        let src = vec![m(X_MEAN, 100.0, true), m(X_STD, 5.0, true)];
        let near = vec![m(X_MEAN, 102.0, true)];
        let far = vec![m(X_MEAN, 130.0, true)];
        assert_eq!(closest_run(&src, &[far, near]).unwrap(), 1);
    }

    #[test]
    fn zero_stddev_is_ignored() {
        // A zero stddev on the candidate side carries no information, so the
        // distance mode applies and the nearer candidate still wins.
        let src = vec![m(X_MEAN, 100.0, true)];
        let near = vec![m(X_MEAN, 101.0, true), m(X_STD, 0.0, true)];
        let far = vec![m(X_MEAN, 140.0, true)];
        assert_eq!(closest_run(&src, &[far, near]).unwrap(), 1);
    }

    #[test]
    fn secondary_metrics_break_primary_ties() {
        // No primary metrics at all: the primary totals tie at zero and the
        // secondary totals decide.
        let src = vec![m(X_MEAN, 100.0, false), m(Y_MEAN, 10.0, false)];
        let far = vec![m(X_MEAN, 120.0, false), m(Y_MEAN, 30.0, false)];
        let near = vec![m(X_MEAN, 101.0, false), m(Y_MEAN, 11.0, false)];
        assert_eq!(closest_run(&src, &[far, near]).unwrap(), 1);
    }

    #[test]
    fn full_tie_returns_first_survivor() {
        let src = vec![m(X_MEAN, 100.0, true)];
        let same = vec![m(X_MEAN, 105.0, true)];
        assert_eq!(closest_run(&src, &[same.clone(), same]).unwrap(), 0);
    }

    #[test]
    fn candidate_only_metrics_are_ignored() {
        let src = vec![m(X_MEAN, 100.0, true)];
        let with_extra = vec![m(X_MEAN, 110.0, true), m(Y_MEAN, 999.0, true)];
        let plain = vec![m(X_MEAN, 101.0, true)];
        assert_eq!(closest_run(&src, &[with_extra, plain]).unwrap(), 1);
    }

    #[test]
    fn textual_values_compare_by_equality() {
        let src = vec![Measurement::new(
            "p/t/0000:./ERROR/ERROR/ERROR.error",
            "boom",
            true,
            Params::new(),
        )];
        let matching = vec![Measurement::new(
            "p/t/0000:./ERROR/ERROR/ERROR.error",
            "boom",
            true,
            Params::new(),
        )];
        let other = vec![Measurement::new(
            "p/t/0000:./ERROR/ERROR/ERROR.error",
            "different failure",
            true,
            Params::new(),
        )];
        assert_eq!(closest_run(&src, &[other, matching]).unwrap(), 1);
    }

    #[test]
    fn normpdf_peak_is_near_one() {
        for sd in [0.5, 1.0, 5.0, 100.0] {
            let peak = norm_normpdf(0.0, 0.0, sd);
            assert!((peak - 1.0).abs() < 0.02, "peak {peak} for sd {sd}");
        }
    }
}
