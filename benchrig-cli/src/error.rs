// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI error type and exit codes.

use std::path::PathBuf;

use benchrig_core::RigError;
use thiserror::Error;

/// Exit code for a run in which some trial failed permanently.
pub const EXIT_TRIAL_FAILURE: i32 = 3;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Rig(#[from] RigError),

    #[error("Cannot read scenario file {path}: {reason}")]
    ScenarioFile { path: PathBuf, reason: String },

    #[error("Invalid scenario file {path}: {reason}")]
    ScenarioParse { path: PathBuf, reason: String },

    #[error("Invalid option: {0}")]
    Usage(String),
}

impl CliError {
    /// 2 for mistakes on the command line, 1 for broken configuration or an
    /// unusable device.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Rig(err) if err.is_usage_error() => 2,
            Self::Usage(_) => 2,
            _ => 1,
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use benchrig_core::{InvalidConfigurationError, MissingConfigurationError};

    #[test]
    fn test_exit_codes() {
        let missing: CliError = RigError::from(MissingConfigurationError::Instrument {
            name: "runtiem".to_string(),
            configured: vec!["runtime".to_string()],
        })
        .into();
        assert_eq!(missing.exit_code(), 2);

        let invalid: CliError = RigError::from(InvalidConfigurationError::UnknownDeviceType {
            device: "local".to_string(),
            value: "toaster".to_string(),
        })
        .into();
        assert_eq!(invalid.exit_code(), 1);

        assert_eq!(CliError::Usage("--trials 0".to_string()).exit_code(), 2);
    }
}
