use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why a record was dropped by the validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    NotAnObject,
    MissingKeys(Vec<&'static str>),
    EmptyValues(Vec<&'static str>),
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::NotAnObject => f.write_str("record is not an object"),
            RejectionReason::MissingKeys(keys) => {
                write!(f, "missing required key: {}", keys.join(", "))
            }
            RejectionReason::EmptyValues(keys) => {
                write!(f, "empty required value: {}", keys.join(", "))
            }
        }
    }
}

/// A single dropped record, with its position in the input array.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub index: usize,
    pub reason: RejectionReason,
    pub record: Value,
}

/// Destination for per-record rejection reports.
///
/// The validator only ever appends; a failing sink never aborts validation.
pub trait RejectionSink {
    fn record(&mut self, rejection: &Rejection) -> io::Result<()>;
}

impl RejectionSink for Vec<Rejection> {
    fn record(&mut self, rejection: &Rejection) -> io::Result<()> {
        self.push(rejection.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticsMode {
    #[default]
    Overwrite,
    Append,
}

/// Line-oriented rejection log: `<timestamp> - Malformed event (<reason>): <record>`.
pub struct RejectionLog<W: Write> {
    writer: W,
    written: usize,
}

impl RejectionLog<LineWriter<File>> {
    pub fn open(path: &Path, mode: DiagnosticsMode) -> io::Result<Self> {
        let mut options = OpenOptions::new();
        options.create(true);
        match mode {
            DiagnosticsMode::Overwrite => options.write(true).truncate(true),
            DiagnosticsMode::Append => options.append(true),
        };
        let file = options.open(path)?;
        Ok(Self::new(LineWriter::new(file)))
    }
}

impl<W: Write> RejectionLog<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RejectionSink for RejectionLog<W> {
    fn record(&mut self, rejection: &Rejection) -> io::Result<()> {
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        writeln!(
            self.writer,
            "{} - Malformed event ({}): {}",
            stamp, rejection.reason, rejection.record
        )?;
        self.written += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn log_line_names_reason_and_record() {
        let mut log = RejectionLog::new(Vec::new());
        log.record(&Rejection {
            index: 3,
            reason: RejectionReason::MissingKeys(vec!["event_type"]),
            record: json!({"user_id": "u1"}),
        })
        .unwrap();

        assert_eq!(log.written(), 1);
        let text = String::from_utf8(log.into_inner()).unwrap();
        assert!(text.ends_with(
            " - Malformed event (missing required key: event_type): {\"user_id\":\"u1\"}\n"
        ));
    }
}
