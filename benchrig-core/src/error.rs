// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for benchrig.
//!
//! Explicit enum error types only. No `Box<dyn Error>`, no `anyhow::Result`.
//! Configuration and device errors abort a run before any trial starts;
//! trial errors are isolated per experiment.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the experiment orchestrator.
#[derive(Debug, Error)]
pub enum RigError {
    // =========================================================================
    // Configuration Errors - Fail-Fast Before Any Trial Runs
    // =========================================================================
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(#[from] InvalidConfigurationError),

    #[error("Missing configuration: {0}")]
    MissingConfiguration(#[from] MissingConfigurationError),

    // =========================================================================
    // Device Errors - Fatal to the Run
    // =========================================================================
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    // =========================================================================
    // Trial Errors - Isolated per Experiment
    // =========================================================================
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(#[from] StateTransitionError),

    #[error("Trial error: {0}")]
    Trial(#[from] TrialError),

    // =========================================================================
    // Sink Errors - Logged, Never Fail a Trial
    // =========================================================================
    #[error("Result processor error: {0}")]
    Sink(#[from] SinkError),
}

impl RigError {
    /// True when the error reflects a user-named entity that is not configured
    /// at all (usually a typo on the command line) rather than a broken
    /// configuration file.
    pub fn is_usage_error(&self) -> bool {
        matches!(self, Self::MissingConfiguration(_))
    }
}

/// A configuration key is present but malformed or contradictory.
#[derive(Debug, Error)]
pub enum InvalidConfigurationError {
    #[error("Missing required key: {key} ({context})")]
    MissingRequiredKey { key: String, context: String },

    #[error("Unknown device type '{value}' for device '{device}'")]
    UnknownDeviceType { device: String, value: String },

    #[error("Invalid value for {key}: '{value}' - {reason}")]
    InvalidKeyValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Invalid {kind} name '{name}': {reason}")]
    InvalidEntityName {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("Unknown result processor class '{class}' configured under results.{name}")]
    UnknownResultProcessorClass { name: String, class: String },

    #[error("Cannot read configuration file {path}: {reason}")]
    FileRead { path: PathBuf, reason: String },

    #[error("Cannot parse configuration {source_name}: {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    #[error("Invalid run option: {field} = {value} - {reason}")]
    InvalidRunOption {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// A required key for a user-named entity is entirely absent.
#[derive(Debug, Error)]
pub enum MissingConfigurationError {
    #[error("Instrument '{name}' is not configured (no instrument.{name}.class); configured instruments: [{}]", .configured.join(", "))]
    Instrument {
        name: String,
        configured: Vec<String>,
    },

    #[error("No result processor with class '{class}' is configured")]
    ResultProcessor { class: String },
}

/// Device-level failures. These abort the run instead of failing one trial,
/// except `SpawnFailed` which the trial runner treats as a crashed attempt.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Device '{device}' is unavailable: {reason}")]
    Unavailable { device: String, reason: String },

    #[error("Failed to push {artifact} to device '{device}': {reason}")]
    PushFailed {
        device: String,
        artifact: PathBuf,
        reason: String,
    },

    #[error("Failed to spawn worker '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },
}

/// State transition errors for the trial state machine.
#[derive(Debug, Error)]
pub enum StateTransitionError {
    #[error("Cannot transition from {from} to {to} for experiment {experiment}")]
    InvalidTransition {
        experiment: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("Experiment {experiment} is in terminal state: {state}")]
    TerminalState {
        experiment: String,
        state: &'static str,
    },
}

/// Failure of a single trial attempt.
#[derive(Debug, Error)]
pub enum TrialError {
    #[error("Worker could not be started: {reason}")]
    SpawnFailed { reason: String },

    #[error("Worker crashed: {status}")]
    Crashed { status: String },

    #[error("Worker exceeded the trial timeout of {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },

    #[error("Protocol violation: {reason} (line: {line:?})")]
    Protocol { line: String, reason: String },

    #[error("Worker finished with {received} measurement(s), expected at least {expected}")]
    InsufficientMeasurements { expected: usize, received: usize },

    #[error("Worker reported error: {message}")]
    WorkerReported { message: String },

    #[error("cancelled")]
    Cancelled,
}

impl TrialError {
    /// Crashes and timeouts are transient and may be retried. Protocol
    /// violations and worker-reported errors are deterministic.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::SpawnFailed { .. } | Self::Crashed { .. } | Self::TimedOut { .. }
        )
    }
}

/// Result processor failures.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to open result processor '{class}': {reason}")]
    Open { class: String, reason: String },

    #[error("Result processor '{class}' failed to process trial: {reason}")]
    Write { class: String, reason: String },

    #[error("Result processor '{class}' failed to close: {reason}")]
    Close { class: String, reason: String },

    #[error("Result processor '{class}' did not finish within {timeout_ms}ms")]
    TimedOut { class: String, timeout_ms: u64 },

    #[error("Result processor '{class}' panicked")]
    Panicked { class: String },
}

/// Result type alias using RigError.
pub type RigResult<T> = Result<T, RigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_instrument_display() {
        let err = MissingConfigurationError::Instrument {
            name: "runtme".to_string(),
            configured: vec!["allocation".to_string(), "runtime".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("runtme"));
        assert!(message.contains("allocation, runtime"));
    }

    #[test]
    fn test_usage_error_classification() {
        let missing: RigError = MissingConfigurationError::ResultProcessor {
            class: "json".to_string(),
        }
        .into();
        assert!(missing.is_usage_error());

        let invalid: RigError = InvalidConfigurationError::UnknownDeviceType {
            device: "local".to_string(),
            value: "toaster".to_string(),
        }
        .into();
        assert!(!invalid.is_usage_error());
        assert!(matches!(invalid, RigError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_transient_trial_errors() {
        assert!(TrialError::TimedOut { timeout_ms: 10 }.is_transient());
        assert!(TrialError::Crashed {
            status: "signal 9".to_string()
        }
        .is_transient());
        assert!(!TrialError::Protocol {
            line: "garbage".to_string(),
            reason: "unknown event".to_string()
        }
        .is_transient());
        assert!(!TrialError::WorkerReported {
            message: "boom".to_string()
        }
        .is_transient());
        assert!(!TrialError::Cancelled.is_transient());
    }
}
