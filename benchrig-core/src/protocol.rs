// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Worker output protocol.
//!
//! Workers write one event per line on stdout:
//!
//! ```text
//! MEASUREMENT key=value [key=value ...]
//! DONE
//! ERROR <message>
//! ```
//!
//! Blank lines are ignored. Anything else is a protocol violation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::TrialError;

/// One parsed line of worker output.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Measurement(Measurement),
    Done,
    Error(String),
}

/// A single measurement reported by a worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Measurement {
    pub values: BTreeMap<String, String>,
}

impl Measurement {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Numeric value of `key`, if present and parseable.
    pub fn value_as_f64(&self, key: &str) -> Option<f64> {
        self.get(key)?.parse().ok()
    }
}

/// Parse one line of worker output. Returns `Ok(None)` for blank lines.
pub fn parse_line(line: &str) -> Result<Option<WorkerEvent>, TrialError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let (keyword, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (trimmed, ""),
    };

    let violation = |reason: &str| TrialError::Protocol {
        line: line.to_string(),
        reason: reason.to_string(),
    };

    match keyword {
        "DONE" if rest.is_empty() => Ok(Some(WorkerEvent::Done)),
        "DONE" => Err(violation("DONE takes no arguments")),
        "ERROR" => Ok(Some(WorkerEvent::Error(rest.to_string()))),
        "MEASUREMENT" => {
            let mut values = BTreeMap::new();
            for pair in rest.split_whitespace() {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| violation("measurement field is not key=value"))?;
                if key.is_empty() {
                    return Err(violation("measurement field has an empty key"));
                }
                if values.insert(key.to_string(), value.to_string()).is_some() {
                    return Err(violation("duplicate measurement key"));
                }
            }
            if values.is_empty() {
                return Err(violation("measurement has no fields"));
            }
            Ok(Some(WorkerEvent::Measurement(Measurement { values })))
        }
        _ => Err(violation("unknown event")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement() {
        let event = parse_line("MEASUREMENT value=12.5 unit=ns").unwrap().unwrap();
        let WorkerEvent::Measurement(m) = event else {
            panic!("expected measurement");
        };
        assert_eq!(m.get("unit"), Some("ns"));
        assert_eq!(m.value_as_f64("value"), Some(12.5));
        assert_eq!(m.value_as_f64("unit"), None);
    }

    #[test]
    fn test_done_and_error() {
        assert_eq!(parse_line("DONE").unwrap(), Some(WorkerEvent::Done));
        assert_eq!(parse_line("  DONE  ").unwrap(), Some(WorkerEvent::Done));
        assert_eq!(
            parse_line("ERROR out of memory").unwrap(),
            Some(WorkerEvent::Error("out of memory".to_string()))
        );
        assert_eq!(
            parse_line("ERROR").unwrap(),
            Some(WorkerEvent::Error(String::new()))
        );
    }

    #[test]
    fn test_blank_lines_ignored() {
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("   \t").unwrap(), None);
    }

    #[test]
    fn test_protocol_violations() {
        for line in [
            "hello world",
            "MEASUREMENT",
            "MEASUREMENT value",
            "MEASUREMENT =3",
            "MEASUREMENT a=1 a=2",
            "DONE now",
            "done",
        ] {
            assert!(
                matches!(parse_line(line), Err(TrialError::Protocol { .. })),
                "{line:?} should be rejected"
            );
        }
    }
}
