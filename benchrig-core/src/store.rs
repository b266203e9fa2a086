// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Flat, prefix-namespaced configuration store.
//!
//! A `ConfigStore` maps dotted keys (`device.local.type`, `vm.args`, ...) to
//! string values. It is assembled once from layered sources (built-in
//! defaults, global file, user file, explicit overrides) and is immutable
//! afterwards, so it can be shared freely between concurrent trials.
//!
//! Files are YAML. Nested mappings flatten into dotted keys, so
//!
//! ```yaml
//! device:
//!   local:
//!     type: local
//! ```
//!
//! and `"device.local.type": local` describe the same entry.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_yaml::Value;

use crate::error::{InvalidConfigurationError, RigResult};

/// Built-in defaults, the lowest-precedence layer.
pub const DEFAULT_CONFIG: &str = r#"
device:
  local:
    type: local
instrument:
  runtime:
    class: runtime
  allocation:
    class: allocation
"#;

/// System-wide configuration file, loaded when present.
pub const GLOBAL_CONFIG_PATH: &str = "/etc/benchrig/config.yaml";

/// Per-user configuration file, relative to `$HOME`.
pub const USER_CONFIG_RELATIVE_PATH: &str = ".benchrig/config.yaml";

/// Immutable mapping from dotted configuration keys to string values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigStore {
    entries: Arc<BTreeMap<String, String>>,
}

impl ConfigStore {
    /// Create a store from explicit key/value pairs.
    pub fn new<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: Arc::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Start a layered builder.
    pub fn builder() -> ConfigStoreBuilder {
        ConfigStoreBuilder::default()
    }

    /// Look up a single key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Check whether a key is set.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Entries under `prefix.`, with the prefix stripped.
    pub fn sub_view(&self, prefix: &str) -> ConfigStore {
        let dotted = format!("{}.", prefix);
        ConfigStore::new(
            self.entries
                .range(dotted.clone()..)
                .take_while(|(k, _)| k.starts_with(&dotted))
                .map(|(k, v)| (k[dotted.len()..].to_string(), v.clone())),
        )
    }

    /// The option bag of an entity: everything under `prefix.options.`.
    /// Values are passed through verbatim.
    pub fn options(&self, prefix: &str) -> BTreeMap<String, String> {
        self.sub_view(&format!("{}.options", prefix))
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Distinct first key segments under `prefix.`.
    pub fn child_names(&self, prefix: &str) -> BTreeSet<String> {
        self.sub_view(prefix)
            .iter()
            .filter_map(|(k, _)| k.split('.').next())
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Layered builder. Later layers override earlier ones key by key.
#[derive(Debug, Default)]
pub struct ConfigStoreBuilder {
    entries: BTreeMap<String, String>,
}

impl ConfigStoreBuilder {
    /// The standard layering: built-in defaults, the global file if present,
    /// then the user file. An explicitly named user file must exist; the
    /// implicit `$HOME/.benchrig/config.yaml` is optional.
    pub fn standard(user_file: Option<&Path>) -> RigResult<Self> {
        let builder = Self::default()
            .defaults()?
            .optional_file(GLOBAL_CONFIG_PATH)?;

        match user_file {
            Some(path) => builder.file(path),
            None => match std::env::var_os("HOME") {
                Some(home) => builder.optional_file(PathBuf::from(home).join(USER_CONFIG_RELATIVE_PATH)),
                None => Ok(builder),
            },
        }
    }

    /// Apply the built-in defaults layer.
    pub fn defaults(self) -> RigResult<Self> {
        self.yaml_str("built-in defaults", DEFAULT_CONFIG)
    }

    /// Apply a YAML document as a layer.
    pub fn yaml_str(mut self, source_name: &str, content: &str) -> RigResult<Self> {
        let value: Value =
            serde_yaml::from_str(content).map_err(|e| InvalidConfigurationError::Parse {
                source_name: source_name.to_string(),
                message: format!("YAML parse error: {}", e),
            })?;

        match value {
            Value::Null => {}
            Value::Mapping(_) => flatten("", &value, &mut self.entries, source_name)?,
            _ => {
                return Err(InvalidConfigurationError::Parse {
                    source_name: source_name.to_string(),
                    message: "top level must be a mapping".to_string(),
                }
                .into())
            }
        }

        Ok(self)
    }

    /// Apply a YAML file that must exist.
    pub fn file(self, path: impl AsRef<Path>) -> RigResult<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| InvalidConfigurationError::FileRead {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        tracing::debug!(path = %path.display(), "Loaded configuration layer");
        self.yaml_str(&path.display().to_string(), &content)
    }

    /// Apply a YAML file if it exists.
    pub fn optional_file(self, path: impl AsRef<Path>) -> RigResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            self.file(path)
        } else {
            Ok(self)
        }
    }

    /// Set a single key.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Apply explicit overrides, the highest-precedence layer.
    pub fn overrides<K, V>(mut self, overrides: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.entries
            .extend(overrides.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Freeze the layers into an immutable store.
    pub fn build(self) -> ConfigStore {
        ConfigStore {
            entries: Arc::new(self.entries),
        }
    }
}

/// Parse a `key=value` override.
pub fn parse_override(raw: &str) -> Result<(String, String), InvalidConfigurationError> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(InvalidConfigurationError::Parse {
            source_name: "command line override".to_string(),
            message: format!("expected key=value, got '{}'", raw),
        }),
    }
}

fn flatten(
    prefix: &str,
    value: &Value,
    out: &mut BTreeMap<String, String>,
    source_name: &str,
) -> Result<(), InvalidConfigurationError> {
    match value {
        Value::Null => {}
        Value::Tagged(tagged) => flatten(prefix, &tagged.value, out, source_name)?,
        Value::Mapping(map) => {
            for (k, v) in map {
                let segment = scalar_to_string(k).ok_or_else(|| InvalidConfigurationError::Parse {
                    source_name: source_name.to_string(),
                    message: format!("non-scalar key under '{}'", prefix),
                })?;
                let key = if prefix.is_empty() {
                    segment
                } else {
                    format!("{}.{}", prefix, segment)
                };
                flatten(&key, v, out, source_name)?;
            }
        }
        Value::Sequence(items) => {
            // Sequences become argument strings; escape so they tokenize back
            // into exactly these items.
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                let text = scalar_to_string(item).ok_or_else(|| InvalidConfigurationError::Parse {
                    source_name: source_name.to_string(),
                    message: format!("sequence under '{}' must contain only scalars", prefix),
                })?;
                parts.push(escape_token(&text));
            }
            out.insert(prefix.to_string(), parts.join(" "));
        }
        scalar => {
            if let Some(text) = scalar_to_string(scalar) {
                out.insert(prefix.to_string(), text);
            }
        }
    }
    Ok(())
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn escape_token(token: &str) -> String {
    let mut escaped = String::with_capacity(token.len());
    for c in token.chars() {
        if c == '\\' || c.is_whitespace() {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
