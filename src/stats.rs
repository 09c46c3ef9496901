//! Shared statistics primitives for the comparison engine.
//!
//! Everything here operates on plain `f64` slices: the engine needs
//! deterministic arithmetic for model round-trips and exit-code decisions, so
//! summary statistics are computed directly rather than through an
//! approximate SIMD path.

/// Empirical correction coefficients widening effective tolerance when only a
/// few samples back a model. Index 0 corresponds to a single sample.
const UNCERTAINTY: [f64; 8] = [7.0, 2.3, 1.7, 1.4, 1.3, 1.3, 1.2, 1.2];

/// Return the uncertainty coefficient for a given number of samples.
///
/// The coefficient is non-increasing for `1..=8` samples and `1.0` beyond.
///
/// # Panics
///
/// Panics when `no_samples` is zero; callers are expected to have at least
/// one sample, so a zero count is a programming error rather than a runtime
/// condition.
pub fn uncertainty(no_samples: usize) -> f64 {
    assert!(
        no_samples > 0,
        "number of samples must be > 0 ({no_samples})"
    );
    if no_samples <= UNCERTAINTY.len() {
        UNCERTAINTY[no_samples - 1]
    } else {
        1.0
    }
}

/// Arithmetic mean; `0.0` for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation; `0.0` for an empty slice.
pub fn stddev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let avg = mean(values);
    let var = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Minimum of a slice; `0.0` for an empty slice.
pub fn min(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

/// Maximum of a slice; `0.0` for an empty slice.
pub fn max(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Calculate a percentile (0-100) using linear interpolation between the two
/// nearest ranks.
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    if values.len() == 1 {
        return values[0];
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let index = (pct / 100.0) * (sorted.len() - 1) as f64;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;

    if lower == upper {
        sorted[lower]
    } else {
        let weight = index - lower as f64;
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}

/// Median (50th percentile).
pub fn median(values: &[f64]) -> f64 {
    percentile(values, 50.0)
}
