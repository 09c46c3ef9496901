//! Report sinks and report rendering.
//!
//! The engine never talks to a global logger: it receives a [`ReportSink`]
//! and sends every per-check line and summary table through it. The CLI wires
//! in the tracing-backed sink; tests use [`MemorySink`] and assert on the
//! captured lines.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use quick_xml::events::{BytesDecl, BytesStart, Event};
use quick_xml::Writer;

use crate::record::CheckResult;
use crate::status::Status;

/// Severity of a report line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkLevel {
    Info,
    Warning,
    Error,
}

/// Destination for engine-generated report lines.
pub trait ReportSink: Send {
    fn emit(&mut self, level: SinkLevel, message: &str);

    fn info(&mut self, message: &str) {
        self.emit(SinkLevel::Info, message);
    }

    fn warning(&mut self, message: &str) {
        self.emit(SinkLevel::Warning, message);
    }

    fn error(&mut self, message: &str) {
        self.emit(SinkLevel::Error, message);
    }
}

/// Shared handle so one sink can serve a whole comparison set.
pub type SharedSink = Arc<Mutex<dyn ReportSink>>;

/// Wrap a sink into a [`SharedSink`].
pub fn shared(sink: impl ReportSink + 'static) -> SharedSink {
    Arc::new(Mutex::new(sink))
}

/// Sink forwarding report lines to the `tracing` subscriber.
#[derive(Debug, Default)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn emit(&mut self, level: SinkLevel, message: &str) {
        match level {
            SinkLevel::Info => tracing::info!("{message}"),
            SinkLevel::Warning => tracing::warn!("{message}"),
            SinkLevel::Error => tracing::error!("{message}"),
        }
    }
}

/// Sink capturing report lines in memory for deterministic tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub lines: Vec<(SinkLevel, String)>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured messages at the given level.
    pub fn messages(&self, level: SinkLevel) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.as_str())
            .collect()
    }

    /// Whether any captured line contains the needle.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|(_, m)| m.contains(needle))
    }
}

impl ReportSink for MemorySink {
    fn emit(&mut self, level: SinkLevel, message: &str) {
        self.lines.push((level, message.to_string()));
    }
}

/// Pretty, aligned text representation of a matrix with a header row.
///
/// Column widths are derived from the widest cell per column; the last cell
/// of each row is not padded.
pub fn tabular(matrix: &[Vec<String>], header: &[&str]) -> String {
    let mut widths: Vec<usize> = Vec::new();
    let header_row: Vec<String> = header.iter().map(|s| s.to_string()).collect();
    let all_rows: Vec<&Vec<String>> = if header.is_empty() {
        matrix.iter().collect()
    } else {
        std::iter::once(&header_row).chain(matrix.iter()).collect()
    };
    for row in &all_rows {
        for (i, cell) in row.iter().enumerate() {
            if i >= widths.len() {
                widths.push(cell.len());
            } else if cell.len() > widths[i] {
                widths[i] = cell.len();
            }
        }
    }
    let mut lines = Vec::new();
    for row in &all_rows {
        if row.is_empty() {
            continue;
        }
        let mut cells = Vec::new();
        for (i, cell) in row.iter().enumerate() {
            if i + 1 == row.len() {
                cells.push(cell.clone());
            } else {
                cells.push(format!("{cell:<width$}", width = widths[i]));
            }
        }
        lines.push(cells.join(" ").trim_end().to_string());
    }
    lines.join("\n")
}

/// Escape characters outside the printable ASCII set as `\xHH`, keeping
/// newlines, carriage returns and spaces.
pub fn escape_nonprintable(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        let printable = ch.is_ascii_alphanumeric()
            || ch.is_ascii_punctuation()
            || ch == ' '
            || ch == '\n'
            || ch == '\r';
        if printable {
            out.push(ch);
        } else {
            out.push_str(&format!("\\x{:02x}", ch as u32));
        }
    }
    out
}

/// Seconds since the Unix epoch, for the testsuite timestamp.
fn unix_timestamp() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}", duration.as_secs())
}

/// Render the xunit XML report for one comparison.
///
/// Only primary results become testcases. Out-of-tolerance gains are written
/// as `skipped` so CI dashboards separate them from genuine failures; losses
/// become `failure` elements and everything else negative an `error`.
pub fn xunit_report(records: &[CheckResult], grouped_records: &[CheckResult]) -> Result<String> {
    let mut writer = Writer::new_with_indent(std::io::Cursor::new(Vec::new()), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut errors = 0usize;
    let mut failures = 0usize;
    let mut skipped = 0usize;
    let primaries: Vec<&CheckResult> = records
        .iter()
        .chain(grouped_records.iter())
        .filter(|record| record.primary)
        .collect();
    for record in &primaries {
        if record.status.value() < Status::Pass.value() {
            match record.status {
                Status::FailGain => skipped += 1,
                Status::FailLoss => failures += 1,
                _ => errors += 1,
            }
        }
    }

    let mut testsuite = BytesStart::new("testsuite");
    testsuite.push_attribute(("name", "perfcmp"));
    testsuite.push_attribute(("timestamp", unix_timestamp().as_str()));
    testsuite.push_attribute(("tests", records.len().to_string().as_str()));
    testsuite.push_attribute(("errors", errors.to_string().as_str()));
    testsuite.push_attribute(("failures", failures.to_string().as_str()));
    testsuite.push_attribute(("skipped", skipped.to_string().as_str()));
    testsuite.push_attribute(("time", "0.000"));
    writer.write_event(Event::Start(testsuite))?;

    for record in &primaries {
        let mut testcase = BytesStart::new("testcase");
        testcase.push_attribute((
            "classname",
            escape_nonprintable(record.classname()).as_str(),
        ));
        testcase.push_attribute(("name", escape_nonprintable(record.testname()).as_str()));
        testcase.push_attribute(("time", "0.000"));
        if record.status.value() < Status::Pass.value() {
            let element_type = match record.status {
                Status::FailGain => "skipped",
                Status::FailLoss => "failure",
                _ => "error",
            };
            writer.write_event(Event::Start(testcase))?;
            let mut element = BytesStart::new(element_type);
            element.push_attribute(("type", element_type));
            let message = record.details.clone().unwrap_or_default();
            element.push_attribute(("message", escape_nonprintable(&message).as_str()));
            writer.write_event(Event::Empty(element))?;
            writer.write_event(Event::End(quick_xml::events::BytesEnd::new("testcase")))?;
        } else {
            writer.write_event(Event::Empty(testcase))?;
        }
    }

    writer.write_event(Event::End(quick_xml::events::BytesEnd::new("testsuite")))?;
    let bytes = writer.into_inner().into_inner();
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::MetricValue;
    use std::collections::BTreeMap;

    fn record(test: &str, status: Status, primary: bool) -> CheckResult {
        CheckResult::new(
            status,
            0.0,
            test,
            MetricValue::Num(1.0),
            MetricValue::Num(1.0),
            Some("details".to_string()),
            primary,
            BTreeMap::new(),
        )
    }

    #[test]
    fn memory_sink_captures_levels() {
        let mut sink = MemorySink::new();
        sink.info("all fine");
        sink.error("broken");
        assert_eq!(sink.messages(SinkLevel::Info), vec!["all fine"]);
        assert_eq!(sink.messages(SinkLevel::Error), vec!["broken"]);
        assert!(sink.contains("fine"));
        assert!(!sink.contains("warning"));
    }

    #[test]
    fn tabular_aligns_columns() {
        let matrix = vec![
            vec!["a".to_string(), "10.0".to_string(), "x".to_string()],
            vec!["longer".to_string(), "7".to_string(), "y".to_string()],
        ];
        let table = tabular(&matrix, &["id", "value", "tag"]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "id     value tag");
        assert_eq!(lines[1], "a      10.0  x");
        assert_eq!(lines[2], "longer 7     y");
    }

    #[test]
    fn tabular_without_header() {
        let matrix = vec![vec!["a".to_string(), "b".to_string()]];
        assert_eq!(tabular(&matrix, &[]), "a b");
    }

    #[test]
    fn escaping_keeps_printables() {
        assert_eq!(escape_nonprintable("abc XY-12\n"), "abc XY-12\n");
        assert_eq!(escape_nonprintable("a\tb"), "a\\x09b");
        assert_eq!(escape_nonprintable("n\u{00e9}"), "n\\xe9");
    }

    #[test]
    fn xunit_classifies_statuses() {
        let records = vec![
            record("a/t.mean", Status::Pass, true),
            record("a/u.mean", Status::FailLoss, true),
            record("a/v.mean", Status::FailGain, true),
            record("a/w.mean", Status::Error, true),
            record("a/x.mean", Status::FailLoss, false),
        ];
        let xml = xunit_report(&records, &[]).unwrap();
        assert!(xml.contains(r#"tests="5""#));
        assert!(xml.contains(r#"failures="1""#));
        assert!(xml.contains(r#"skipped="1""#));
        assert!(xml.contains(r#"errors="1""#));
        // non-primary failure must not appear as a testcase
        assert!(!xml.contains(r#"name="x.mean""#));
        assert!(xml.contains("<failure"));
        assert!(xml.contains("<skipped"));
        assert!(xml.contains("<error"));
    }

    #[test]
    fn xunit_escapes_messages() {
        let mut broken = record("a/t.mean", Status::Error, true);
        broken.details = Some("bad\u{0007}payload".to_string());
        let xml = xunit_report(&[broken], &[]).unwrap();
        assert!(xml.contains("bad\\x07payload"));
    }

    #[test]
    fn xunit_includes_grouped_records() {
        let grouped = vec![record("*/t/*:./i-*/w/x.mean", Status::FailLoss, true)];
        let xml = xunit_report(&[], &grouped).unwrap();
        assert!(xml.contains(r#"tests="0""#));
        assert!(xml.contains(r#"failures="1""#));
    }
}
