// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! All types validate their invariants at creation time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::InvalidConfigurationError;

/// Maximum length of a configuration entity name.
const MAX_NAME_LEN: usize = 128;

/// Validated name of a configured entity (device, vm, instrument, result
/// processor). Names are a single segment of a dotted configuration key, so
/// they must be non-empty and contain neither dots nor whitespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityName(String);

impl EntityName {
    /// Create a new EntityName with validation. `kind` only feeds the error.
    pub fn new(kind: &'static str, name: impl Into<String>) -> Result<Self, InvalidConfigurationError> {
        let name = name.into();

        if name.is_empty() {
            return Err(InvalidConfigurationError::InvalidEntityName {
                kind,
                name,
                reason: "name cannot be empty".to_string(),
            });
        }

        if name.len() > MAX_NAME_LEN {
            return Err(InvalidConfigurationError::InvalidEntityName {
                kind,
                reason: format!("name too long: {} chars (max {})", name.len(), MAX_NAME_LEN),
                name,
            });
        }

        if name.chars().any(|c| c == '.' || c.is_whitespace()) {
            return Err(InvalidConfigurationError::InvalidEntityName {
                kind,
                name,
                reason: "name must not contain dots or whitespace".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for EntityName {
    type Error = InvalidConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new("entity", value)
    }
}

impl From<EntityName> for String {
    fn from(name: EntityName) -> Self {
        name.0
    }
}

/// Validated worker process ID.
/// Must be positive (non-zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId(u32);

impl ProcessId {
    /// Create a new ProcessId. Returns None for 0, which the OS never
    /// hands out for a spawned child.
    pub fn new(pid: u32) -> Option<Self> {
        if pid == 0 {
            None
        } else {
            Some(Self(pid))
        }
    }

    /// Get the inner PID value.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ProcessId> for u32 {
    fn from(pid: ProcessId) -> Self {
        pid.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_name_valid() {
        assert!(EntityName::new("vm", "jdk-21").is_ok());
        assert!(EntityName::new("instrument", "runtime").is_ok());
        assert!(EntityName::new("device", "Pixel_7").is_ok());
    }

    #[test]
    fn test_entity_name_invalid() {
        assert!(EntityName::new("vm", "").is_err());
        assert!(EntityName::new("vm", "a".repeat(129)).is_err());
        assert!(EntityName::new("vm", "has.dot").is_err());
        assert!(EntityName::new("vm", "has space").is_err());
    }

    #[test]
    fn test_entity_name_error_names_kind() {
        let err = EntityName::new("instrument", "a.b").unwrap_err();
        assert!(err.to_string().contains("instrument"));
        assert!(err.to_string().contains("a.b"));
    }

    #[test]
    fn test_process_id() {
        assert!(ProcessId::new(0).is_none());
        assert_eq!(ProcessId::new(4242).unwrap().value(), 4242);
    }
}
