//! Measurement source: discovery and parsing of result trees.
//!
//! A results directory has the layout
//! `<dir>/<profile>/<test>/<serial>/result.json`, where each `result.json`
//! holds a list of benchmark iterations. Failed executions leave
//! `__error*__` directories behind; those surface as synthetic `.error`
//! measurements so a broken run still produces comparable entries.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, error, warn};

use crate::measurement::{Measurement, MetricValue, Params};

/// Metadata sidecar filename inside a results directory.
pub const METADATA_FILENAME: &str = "PERFCMP_METADATA";

fn failed_iteration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r".*-fail\d+$").expect("failed-iteration pattern is valid"))
}

/// Key/value metadata describing a run, parsed from the sidecar file.
///
/// Unknown keys read as `"Unknown"`.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    entries: BTreeMap<String, String>,
}

impl Metadata {
    /// Parse the sidecar of a results directory. A missing file yields empty
    /// metadata; malformed lines are logged and skipped.
    pub fn parse(name: &str, path: &Path) -> Self {
        let metadata_path = path.join(METADATA_FILENAME);
        let mut entries = BTreeMap::new();
        let Ok(text) = std::fs::read_to_string(&metadata_path) else {
            return Self { entries };
        };
        for line in text.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once(':') {
                Some((key, value)) => {
                    entries.insert(key.to_string(), value.trim().to_string());
                }
                None => {
                    warn!("Unable to parse metadata of {name}: {line}");
                }
            }
        }
        Self { entries }
    }

    /// Value for a key, defaulting to `"Unknown"`.
    pub fn get(&self, key: &str) -> &str {
        self.entries.get(key).map_or("Unknown", String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

/// Sorted subdirectories of `path`; empty when unreadable.
fn subdirs(path: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                dirs.push(entry.path());
            }
        }
    }
    dirs.sort();
    dirs
}

fn dir_name(path: &Path) -> &str {
    path.file_name().and_then(|name| name.to_str()).unwrap_or("")
}

/// Paths of `result.json` files under `<path>/<profile>/<test>/<serial>/`.
///
/// With `skip_incorrect`, only serial directories whose name starts with `0`
/// or `9` are considered (re-runs of incorrect executions get other
/// prefixes).
fn result_json_paths(path: &Path, skip_incorrect: bool) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for profile in subdirs(path) {
        for test in subdirs(&profile) {
            for serial in subdirs(&test) {
                if skip_incorrect && !matches!(dir_name(&serial).chars().next(), Some('0' | '9')) {
                    continue;
                }
                let result = serial.join("result.json");
                if result.is_file() {
                    out.push(result);
                }
            }
        }
    }
    out
}

/// `__error*__` directories up to three levels below `path`, paired with
/// their depth.
fn error_dirs(path: &Path) -> Vec<(usize, PathBuf)> {
    fn is_error_dir(name: &str) -> bool {
        name.starts_with("__error") && name.ends_with("__")
    }

    let mut out = Vec::new();
    let mut level_dirs = vec![path.to_path_buf()];
    for level in 0..4 {
        let mut next = Vec::new();
        for dir in &level_dirs {
            for sub in subdirs(dir) {
                if is_error_dir(dir_name(&sub)) {
                    out.push((level, sub));
                } else {
                    next.push(sub);
                }
            }
        }
        level_dirs = next;
    }
    out
}

/// Recursively hash all files inside `path`, keyed by relative path.
/// Unreadable files map to `"ERROR READING"`.
pub fn list_dir_hashes(path: &Path) -> Params {
    fn walk(base: &Path, dir: &Path, entries: &mut Params) {
        let Ok(dir_entries) = std::fs::read_dir(dir) else {
            return;
        };
        let mut paths: Vec<PathBuf> = dir_entries.flatten().map(|entry| entry.path()).collect();
        paths.sort();
        for entry_path in paths {
            if entry_path.is_dir() {
                walk(base, &entry_path, entries);
            } else {
                let key = entry_path
                    .strip_prefix(base)
                    .unwrap_or(&entry_path)
                    .display()
                    .to_string();
                match std::fs::read(&entry_path) {
                    Ok(content) => {
                        let digest = Sha256::digest(&content);
                        entries.insert(key, hex::encode(digest));
                    }
                    Err(_) => {
                        entries.insert(key, "ERROR READING".to_string());
                    }
                }
            }
        }
    }

    let mut entries = Params::new();
    walk(path, path, &mut entries);
    entries
}

/// JSON scalar rendered the way parameter blobs expect.
fn param_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Measurements of one benchmark iteration.
fn handle_iteration(
    result_id: &str,
    iteration_name: &str,
    data: &serde_json::Value,
) -> Vec<Measurement> {
    let mut out = Vec::new();
    let mut primary_metrics: Vec<String> = Vec::new();
    let mut test_params = Params::new();
    if let Some(benchmarks) = data
        .pointer("/parameters/benchmark")
        .and_then(|v| v.as_array())
    {
        for (index, benchmark) in benchmarks.iter().enumerate() {
            if let Some(primary) = benchmark.get("primary_metric").and_then(|v| v.as_str()) {
                primary_metrics.push(primary.to_string());
            }
            if let Some(object) = benchmark.as_object() {
                let blob = object
                    .iter()
                    .map(|(key, value)| format!("{key}:{}", param_text(value)))
                    .collect::<Vec<_>>()
                    .join("\n");
                test_params.insert(index.to_string(), blob);
            }
        }
    }
    if let Some(users) = data.pointer("/parameters/user").and_then(|v| v.as_array()) {
        for (index, user) in users.iter().enumerate() {
            if let Some(profile) = user.get("profile") {
                test_params.insert(format!("user{index}"), format!("profile: {}", param_text(profile)));
            }
        }
    }
    for workflow in ["throughput", "latency"] {
        let Some(items) = data.get(workflow).and_then(|v| v.as_object()) else {
            continue;
        };
        for (workflow_type, results) in items {
            let test = format!("{result_id}:./{iteration_name}/{workflow}/{workflow_type}.mean");
            let Some(results) = results.as_array() else {
                continue;
            };
            let all = results.iter().find(|res| {
                res.get("client_hostname").and_then(|v| v.as_str()) == Some("all")
            });
            let Some(all) = all else {
                error!("Unable to find client_hostname==all for {test}");
                continue;
            };
            let primary = primary_metrics.iter().any(|metric| metric == workflow_type);
            let mean = all.get("mean").cloned().unwrap_or(serde_json::Value::Null);
            let stddev = all
                .get("stddevpct")
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            out.push(Measurement::new(
                test,
                MetricValue::from_json(&mean),
                primary,
                test_params.clone(),
            ));
            out.push(Measurement::new(
                format!("{result_id}:./{iteration_name}/{workflow}/{workflow_type}.stddev"),
                MetricValue::from_json(&stddev),
                primary,
                test_params.clone(),
            ));
        }
    }
    out
}

/// Read all measurements of a results directory.
///
/// With `skip_incorrect`, incorrect serial directories and failed iterations
/// are dropped. Execution errors yield synthetic
/// `<id>:./ERROR/ERROR/ERROR.error` measurements carrying the captured
/// exception text and a per-file content-hash map for forensics.
pub fn iter_results(path: &Path, skip_incorrect: bool) -> Result<Vec<Measurement>> {
    debug!("Processing {}", path.display());
    let mut out = Vec::new();
    for json_path in result_json_paths(path, skip_incorrect) {
        let text = std::fs::read_to_string(&json_path)
            .with_context(|| format!("reading {}", json_path.display()))?;
        let parsed: serde_json::Value = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", json_path.display()))?;
        let components: Vec<&str> = json_path
            .parent()
            .map(|dir| {
                dir.iter()
                    .filter_map(|part| part.to_str())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let result_id = components
            .iter()
            .rev()
            .take(3)
            .rev()
            .copied()
            .collect::<Vec<_>>()
            .join("/");
        let Some(iterations) = parsed.as_array() else {
            warn!("{} is not a list of iterations", json_path.display());
            continue;
        };
        for iteration in iterations {
            let Some(iteration_name) = iteration.get("iteration_name").and_then(|v| v.as_str())
            else {
                warn!("Iteration without a name in {}", json_path.display());
                continue;
            };
            if skip_incorrect && failed_iteration_pattern().is_match(iteration_name) {
                continue;
            }
            if let Some(data) = iteration.get("iteration_data") {
                out.extend(handle_iteration(&result_id, iteration_name, data));
            }
        }
    }
    for (level, error_path) in error_dirs(path) {
        let mut components: Vec<String> = error_path
            .strip_prefix(path)
            .map(|relative| {
                relative
                    .iter()
                    .filter_map(|part| part.to_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        // Drop the error directory itself and pad the id to three levels.
        components.pop();
        while components.len() < 3 {
            components.push("*".to_string());
        }
        let result_id = components.join("/");
        let exception_path = error_path.join("exception");
        let exception = std::fs::read_to_string(&exception_path)
            .unwrap_or_else(|_| "<Unknown exception>".to_string());
        debug!("Error dir at level {level}: {}", error_path.display());
        out.push(Measurement::new(
            format!("{result_id}:./ERROR/ERROR/ERROR.error"),
            MetricValue::Text(exception),
            true,
            list_dir_hashes(&error_path),
        ));
    }
    Ok(out)
}
