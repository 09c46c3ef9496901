//! Evaluated per-metric comparison results and their canonical names.

use std::sync::OnceLock;

use regex::Regex;

use crate::measurement::{MetricValue, Params};
use crate::status::Status;

/// Fields of a canonical result name that can be collapsed when grouping
/// related metrics.
///
/// A canonical name has the shape
/// `profile/test/serial:./iteration[-extra]/workflow/workflow_type.check_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeField {
    Profile,
    Test,
    Serial,
    IterationName,
    IterationNameExtra,
    Workflow,
    WorkflowType,
    CheckType,
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([^/]+)/([^/]+)/([^:]+):\./([^/]+)/([^/]+)/([^.]+)\.(.+)$")
            .expect("canonical name pattern is valid")
    })
}

/// One evaluated metric comparison. Immutable once built.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub status: Status,
    pub score: f64,
    classname: String,
    testname: String,
    pub src: MetricValue,
    pub dst: MetricValue,
    pub details: Option<String>,
    pub primary: bool,
    pub params: Params,
}

impl CheckResult {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        status: Status,
        score: f64,
        test: &str,
        src: MetricValue,
        dst: MetricValue,
        details: Option<String>,
        primary: bool,
        params: Params,
    ) -> Self {
        let (classname, testname) = match test.rsplit_once('/') {
            Some((class, name)) => (class.to_string(), name.to_string()),
            None => ("<undefined>".to_string(), test.to_string()),
        };
        Self {
            status,
            score,
            classname,
            testname,
            src,
            dst,
            details,
            primary,
            params,
        }
    }

    /// Directory-like prefix of the result name.
    pub fn classname(&self) -> &str {
        &self.classname
    }

    /// Final component of the result name.
    pub fn testname(&self) -> &str {
        &self.testname
    }

    /// Full result name.
    pub fn name(&self) -> String {
        format!("{}/{}", self.classname, self.testname)
    }

    /// Whether this is a `stddev` result (as opposed to mean or error).
    pub fn is_stddev(&self) -> bool {
        self.testname.ends_with("stddev")
    }

    /// Full result name with the fields listed in `merge` replaced by `*`,
    /// collapsing otherwise distinct metrics into one group.
    ///
    /// Names that do not follow the canonical pattern are returned unchanged.
    pub fn merged_name(&self, merge: &[MergeField]) -> String {
        let name = self.name();
        if merge.is_empty() {
            return name;
        }
        let Some(captures) = name_pattern().captures(&name) else {
            return name;
        };
        let field = |index: usize, field: MergeField| -> String {
            if merge.contains(&field) {
                "*".to_string()
            } else {
                captures[index].to_string()
            }
        };
        let (iteration_name, iteration_extra) = match captures[4].split_once('-') {
            Some((name, extra)) => (name.to_string(), extra.to_string()),
            None => (captures[4].to_string(), "*".to_string()),
        };
        let iteration_name = if merge.contains(&MergeField::IterationName) {
            "*".to_string()
        } else {
            iteration_name
        };
        let iteration_extra = if merge.contains(&MergeField::IterationNameExtra) {
            "*".to_string()
        } else {
            iteration_extra
        };
        format!(
            "{}/{}/{}:./{}-{}/{}/{}.{}",
            field(1, MergeField::Profile),
            field(2, MergeField::Test),
            field(3, MergeField::Serial),
            iteration_name,
            iteration_extra,
            field(5, MergeField::Workflow),
            field(6, MergeField::WorkflowType),
            field(7, MergeField::CheckType),
        )
    }
}

impl std::fmt::Display for CheckResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.details {
            Some(details) => write!(
                f,
                "{}: {} {:.2} ({})",
                self.status.label(),
                self.name(),
                self.score,
                details
            ),
            None => write!(f, "{}: {}", self.status.label(), self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn result(test: &str) -> CheckResult {
        CheckResult::new(
            Status::Pass,
            0.0,
            test,
            MetricValue::Num(1.0),
            MetricValue::Num(1.0),
            None,
            true,
            BTreeMap::new(),
        )
    }

    #[test]
    fn splits_class_and_test_name() {
        let res = result("Default/fio/0000:./read-4KiB/throughput/iops_sec.mean");
        assert_eq!(res.classname(), "Default/fio/0000:./read-4KiB/throughput");
        assert_eq!(res.testname(), "iops_sec.mean");
        assert_eq!(
            res.name(),
            "Default/fio/0000:./read-4KiB/throughput/iops_sec.mean"
        );
    }

    #[test]
    fn bare_name_gets_undefined_class() {
        let res = result("standalone.mean");
        assert_eq!(res.classname(), "<undefined>");
        assert_eq!(res.testname(), "standalone.mean");
    }

    #[test]
    fn stddev_detection() {
        assert!(result("a/b/0000:./i/w/t.stddev").is_stddev());
        assert!(!result("a/b/0000:./i/w/t.mean").is_stddev());
    }

    #[test]
    fn merged_name_replaces_fields() {
        let res = result("Default/fio/0000:./read-4KiB/throughput/iops_sec.mean");
        assert_eq!(
            res.merged_name(&[MergeField::Serial]),
            "Default/fio/*:./read-4KiB/throughput/iops_sec.mean"
        );
        assert_eq!(
            res.merged_name(&[MergeField::IterationNameExtra, MergeField::Profile]),
            "*/fio/0000:./read-*/throughput/iops_sec.mean"
        );
    }

    #[test]
    fn merged_name_without_iteration_extra() {
        let res = result("Default/fio/0000:./read/throughput/iops_sec.mean");
        assert_eq!(
            res.merged_name(&[MergeField::Serial]),
            "Default/fio/*:./read-*/throughput/iops_sec.mean"
        );
    }

    #[test]
    fn merged_name_keeps_unparseable_names() {
        let res = result("weird-name.mean");
        assert_eq!(
            res.merged_name(&[MergeField::Profile]),
            "<undefined>/weird-name.mean"
        );
    }

    #[test]
    fn empty_merge_is_identity() {
        let res = result("Default/fio/0000:./read-4KiB/throughput/iops_sec.mean");
        assert_eq!(res.merged_name(&[]), res.name());
    }

    #[test]
    fn display_includes_details() {
        let mut res = result("a/b.mean");
        res.details = Some("raw 1.00%".to_string());
        assert_eq!(format!("{res}"), "PASS: a/b.mean 0.00 (raw 1.00%)");
    }
}
