//! Container driving a whole multi-destination comparison run.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::compare::{RunComparison, BROKEN_SCORE};
use crate::config::CompareConfig;
use crate::measurement::{Measurement, MetricValue, Params};
use crate::model::{BuildAverages, Model};
use crate::report::SharedSink;
use crate::source::{self, Metadata};

/// Baseline measurement set plus one [`RunComparison`] per destination run.
///
/// The cross-build averages model is shared across all comparisons of the
/// set; destinations must be added in build order and the final one flagged
/// with `last` so the model knows when to contribute its opinion.
pub struct ComparisonSet {
    config: CompareConfig,
    models: Arc<Vec<Box<dyn Model>>>,
    averages: Arc<Mutex<BuildAverages>>,
    sink: SharedSink,
    src_name: String,
    src_results: BTreeMap<String, (MetricValue, bool, Params)>,
    src_metadata: Metadata,
    results: Vec<(String, RunComparison)>,
}

impl ComparisonSet {
    /// Build a set from an already-loaded baseline measurement list.
    pub fn with_baseline(
        config: CompareConfig,
        models: Vec<Box<dyn Model>>,
        src_name: &str,
        baseline: Vec<Measurement>,
        src_metadata: Metadata,
        sink: SharedSink,
    ) -> Self {
        let averages = Arc::new(Mutex::new(BuildAverages::new(config.builds_average_weight)));
        let src_results = baseline
            .into_iter()
            .map(|m| (m.name, (m.value, m.primary, m.params)))
            .collect();
        Self {
            config,
            models: Arc::new(models),
            averages,
            sink,
            src_name: src_name.to_string(),
            src_results,
            src_metadata,
            results: Vec::new(),
        }
    }

    /// Build a set by reading the baseline from a results directory,
    /// filtering out incorrect iterations.
    pub fn new(
        config: CompareConfig,
        models: Vec<Box<dyn Model>>,
        src_name: &str,
        src_path: &Path,
        sink: SharedSink,
    ) -> Result<Self> {
        let baseline = source::iter_results(src_path, true)?;
        let metadata = Metadata::parse(src_name, src_path);
        Ok(Self::with_baseline(
            config, models, src_name, baseline, metadata, sink,
        ))
    }

    pub fn src_name(&self) -> &str {
        &self.src_name
    }

    pub fn src_metadata(&self) -> &Metadata {
        &self.src_metadata
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, RunComparison)> {
        self.results.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut (String, RunComparison)> {
        self.results.iter_mut()
    }

    /// Compare one destination run, read from a results directory.
    pub fn add_result_by_path(&mut self, name: &str, path: &Path, last: bool) -> Result<()> {
        let measurements = source::iter_results(path, true)?;
        let metadata = Metadata::parse(name, path);
        self.add_result(name, measurements, metadata, last);
        Ok(())
    }

    /// Compare one destination run against the baseline.
    ///
    /// Destination metrics missing from the baseline and baseline metrics
    /// missing from the destination both become broken results instead of
    /// aborting the comparison.
    pub fn add_result(
        &mut self,
        name: &str,
        measurements: Vec<Measurement>,
        metadata: Metadata,
        last: bool,
    ) {
        if last {
            self.averages
                .lock()
                .unwrap_or_else(|poison| poison.into_inner())
                .mark_last();
        }
        let mut res = RunComparison::new(
            self.config.clone(),
            self.models.clone(),
            self.averages.clone(),
            metadata,
            self.sink.clone(),
        );
        let mut unmatched: Vec<&String> = self.src_results.keys().collect();
        for measurement in measurements {
            match self.src_results.get(&measurement.name) {
                Some((src_value, _, _)) if unmatched.contains(&&measurement.name) => {
                    unmatched.retain(|test| **test != measurement.name);
                    res.record_result(
                        &measurement.name,
                        src_value.clone(),
                        measurement.value,
                        measurement.primary,
                        measurement.params,
                    );
                }
                _ => {
                    res.record_broken(
                        &measurement.name,
                        &format!("Not present in source results ({}).", measurement.value),
                        measurement.primary,
                        measurement.params,
                    );
                }
            }
        }
        for missing in unmatched {
            let (_, primary, _) = &self.src_results[missing];
            res.record_broken(
                missing,
                &format!("Not present in target results ({})", BROKEN_SCORE as i64),
                *primary,
                Params::new(),
            );
        }
        self.results.push((name.to_string(), res));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{self, MemorySink};
    use crate::status::Status;

    fn measurement(name: &str, value: f64, primary: bool) -> Measurement {
        Measurement::new(name, value, primary, Params::new())
    }

    fn set_with(baseline: Vec<Measurement>) -> ComparisonSet {
        ComparisonSet::with_baseline(
            CompareConfig::default(),
            Vec::new(),
            "base",
            baseline,
            Metadata::default(),
            report::shared(MemorySink::new()),
        )
    }

    const TPS: &str = "p/t/0000:./i-x/throughput/tps.mean";
    const LAT: &str = "p/t/0000:./i-x/latency/usec.mean";

    #[test]
    fn matches_metrics_between_runs() {
        let mut set = set_with(vec![
            measurement(TPS, 100.0, true),
            measurement(LAT, 50.0, false),
        ]);
        set.add_result(
            "build-1",
            vec![measurement(TPS, 101.0, true), measurement(LAT, 49.5, false)],
            Metadata::default(),
            true,
        );
        let (name, res) = &set.iter().next().unwrap();
        assert_eq!(name, "build-1");
        assert_eq!(res.records().len(), 2);
        assert!(res.records().iter().all(|r| r.status == Status::Pass));
        assert_eq!(res.finish(), 0);
    }

    #[test]
    fn destination_only_metric_is_broken() {
        let mut set = set_with(vec![measurement(TPS, 100.0, true)]);
        set.add_result(
            "build-1",
            vec![
                measurement(TPS, 100.0, true),
                measurement("p/t/0001:./i-y/throughput/new.mean", 5.0, true),
            ],
            Metadata::default(),
            true,
        );
        let (_, res) = set.iter().next().unwrap();
        let broken = res
            .records()
            .iter()
            .find(|r| r.name().contains("new"))
            .unwrap();
        assert_eq!(broken.status, Status::Error);
        assert_eq!(broken.score, BROKEN_SCORE);
        assert!(broken
            .details
            .as_deref()
            .unwrap()
            .contains("Not present in source results"));
    }

    #[test]
    fn baseline_only_metric_is_broken_with_sentinel_score() {
        let mut set = set_with(vec![
            measurement(TPS, 100.0, true),
            measurement(LAT, 50.0, true),
        ]);
        set.add_result(
            "build-1",
            vec![measurement(TPS, 100.0, true)],
            Metadata::default(),
            true,
        );
        let (_, res) = set.iter().next().unwrap();
        let broken = res
            .records()
            .iter()
            .find(|r| r.name().contains("usec"))
            .unwrap();
        assert_eq!(broken.status, Status::Error);
        assert_eq!(broken.score, -100.0);
        assert!(broken
            .details
            .as_deref()
            .unwrap()
            .contains("Not present in target results (-100)"));
        assert_eq!(res.finish(), 2);
    }

    #[test]
    fn duplicate_destination_metric_matches_once() {
        let mut set = set_with(vec![measurement(TPS, 100.0, true)]);
        set.add_result(
            "build-1",
            vec![measurement(TPS, 100.0, true), measurement(TPS, 100.0, true)],
            Metadata::default(),
            true,
        );
        let (_, res) = set.iter().next().unwrap();
        assert_eq!(res.records().len(), 2);
        assert_eq!(res.records()[0].status, Status::Pass);
        assert_eq!(res.records()[1].status, Status::Error);
    }

    #[test]
    fn multiple_destinations_keep_insertion_order() {
        let mut set = set_with(vec![measurement(TPS, 100.0, true)]);
        set.add_result(
            "build-1",
            vec![measurement(TPS, 101.0, true)],
            Metadata::default(),
            false,
        );
        set.add_result(
            "build-2",
            vec![measurement(TPS, 102.0, true)],
            Metadata::default(),
            true,
        );
        let names: Vec<&str> = set.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["build-1", "build-2"]);
        assert_eq!(set.len(), 2);
    }
}
