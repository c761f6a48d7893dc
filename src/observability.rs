//! # Observations
//!
//! Structured records describing what a run did, one JSON object per
//! executed test case plus info/alert/error messages. The record layout is
//! the only contract with external tooling; draw sequences are never exposed
//! except through the reproduction call in a failing case's metadata.
//!
//! Records are pushed to every registered [`ObservationSink`]. Nothing is
//! built when no sink is registered.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::data::PredicateCounts;

/// Seconds since the Unix epoch, as used for `run_start`.
pub fn unix_timestamp(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CaseMetadata {
    pub traceback: Option<String>,
    /// The `Settings` call that replays this case, for failures.
    pub reproduction_decorator: Option<String>,
    /// How often each named filter was satisfied while drawing.
    pub predicates: BTreeMap<String, PredicateCounts>,
    pub notes: Vec<String>,
    pub draws: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TestCaseObservation {
    pub run_start: f64,
    pub property: String,
    pub status: String,
    pub status_reason: String,
    pub representation: String,
    pub arguments: BTreeMap<String, serde_json::Value>,
    pub how_generated: String,
    pub features: BTreeMap<String, String>,
    /// Line coverage is not collected.
    pub coverage: Option<BTreeMap<String, Vec<u32>>>,
    /// Seconds per phase, keyed `generate:<argument>` and `execute:test`.
    pub timing: BTreeMap<String, f64>,
    pub metadata: CaseMetadata,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MessageObservation {
    pub title: String,
    pub content: String,
    pub property: String,
    pub run_start: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Observation {
    TestCase(TestCaseObservation),
    Info(MessageObservation),
    Alert(MessageObservation),
    Error(MessageObservation),
}

impl Observation {
    pub fn kind(&self) -> &'static str {
        match self {
            Observation::TestCase(_) => "test_case",
            Observation::Info(_) => "info",
            Observation::Alert(_) => "alert",
            Observation::Error(_) => "error",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

pub trait ObservationSink: Send {
    fn deliver(&mut self, observation: &Observation);
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> ObservationSink for JsonLinesSink<W> {
    fn deliver(&mut self, observation: &Observation) {
        let written = serde_json::to_writer(&mut self.writer, observation)
            .map_err(std::io::Error::from)
            .and_then(|()| self.writer.write_all(b"\n"));
        if let Err(e) = written {
            log::warn!("failed to write {} observation: {}", observation.kind(), e);
        }
    }
}

/// Keeps every record as JSON in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    records: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<serde_json::Value> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl ObservationSink for CollectingSink {
    fn deliver(&mut self, observation: &Observation) {
        if let Ok(mut records) = self.records.lock() {
            records.push(observation.to_json());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> MessageObservation {
        MessageObservation {
            title: "Health check failed".to_string(),
            content: "too much filtering".to_string(),
            property: "test_prop".to_string(),
            run_start: 1.5,
        }
    }

    #[test]
    fn test_message_record_layout() {
        let json = Observation::Alert(message()).to_json();
        assert_eq!(json["type"], "alert");
        assert_eq!(json["title"], "Health check failed");
        assert_eq!(json["property"], "test_prop");
        assert_eq!(json["run_start"], 1.5);
    }

    #[test]
    fn test_case_record_layout() {
        let observation = Observation::TestCase(TestCaseObservation {
            run_start: 0.0,
            property: "test_prop".to_string(),
            status: "failed".to_string(),
            status_reason: "boom".to_string(),
            representation: "(x=3)".to_string(),
            arguments: [("x".to_string(), serde_json::json!(3))].into_iter().collect(),
            how_generated: "generated".to_string(),
            features: BTreeMap::new(),
            coverage: None,
            timing: [("execute:test".to_string(), 0.25)].into_iter().collect(),
            metadata: CaseMetadata {
                traceback: Some("boom".to_string()),
                reproduction_decorator: Some(".reproduce(\"Q0oB\")".to_string()),
                predicates: [(
                    "even".to_string(),
                    PredicateCounts {
                        satisfied: 1,
                        unsatisfied: 2,
                    },
                )]
                .into_iter()
                .collect(),
                notes: Vec::new(),
                draws: 1,
            },
        });
        let json = observation.to_json();
        assert_eq!(json["type"], "test_case");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["arguments"]["x"], 3);
        assert!(json["coverage"].is_null());
        assert_eq!(json["metadata"]["reproduction_decorator"], ".reproduce(\"Q0oB\")");
        assert_eq!(json["metadata"]["predicates"]["even"]["satisfied"], 1);
        assert_eq!(json["metadata"]["predicates"]["even"]["unsatisfied"], 2);
    }

    #[test]
    fn test_json_lines_sink() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.deliver(&Observation::Info(message()));
        sink.deliver(&Observation::Error(message()));
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "info");
    }

    #[test]
    fn test_collecting_sink_shares_buffer() {
        let sink = CollectingSink::new();
        let mut handle = sink.clone();
        handle.deliver(&Observation::Info(message()));
        assert_eq!(sink.records().len(), 1);
    }
}
