// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Typed configuration resolved from a [`ConfigStore`].
//!
//! Resolution is strict: a device without a known `type` is an
//! [`InvalidConfigurationError`], while an instrument or result processor
//! that was never configured is a [`MissingConfigurationError`]. The two
//! kinds stay separate because the second one is usually a typo on the
//! command line, not a broken file.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{InvalidConfigurationError, MissingConfigurationError, RigResult};
use crate::store::ConfigStore;
use crate::types::EntityName;

/// Device used when none is selected explicitly.
pub const DEFAULT_DEVICE_NAME: &str = "local";

/// Option key naming the worker executable of a VM.
pub const VM_EXECUTABLE_OPTION: &str = "executable";

/// Split an argument string on runs of whitespace. A backslash escapes the
/// following character; an escaped whitespace character becomes a literal
/// space inside the current token.
///
/// `-a=string\ with\ spa\ces -b` yields `["-a=string with spaces", "-b"]`.
pub fn split_args(raw: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c == '\\' {
            in_token = true;
            match chars.next() {
                Some(escaped) if escaped.is_whitespace() => current.push(' '),
                Some(escaped) => current.push(escaped),
                None => current.push('\\'),
            }
        } else if c.is_whitespace() {
            if in_token {
                tokens.push(std::mem::take(&mut current));
                in_token = false;
            }
        } else {
            in_token = true;
            current.push(c);
        }
    }

    if in_token {
        tokens.push(current);
    }
    tokens
}

/// Kind of execution target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Workers run on this host.
    Local,
    /// Workers run on a host reached through an out-of-process transport.
    Remote,
}

impl DeviceKind {
    /// Parse a `device.<name>.type` value.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "remote" | "ssh" | "adb" => Some(Self::Remote),
            _ => None,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Resolved `device.<name>.*` configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub kind: DeviceKind,
    pub options: BTreeMap<String, String>,
}

impl DeviceConfig {
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

/// Resolved runtime variant a worker runs under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VmConfig {
    pub name: String,
    pub home: Option<PathBuf>,
    pub args: Vec<String>,
    pub options: BTreeMap<String, String>,
}

impl VmConfig {
    /// A config with only a name set.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            home: None,
            args: Vec::new(),
            options: BTreeMap::new(),
        }
    }

    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Path of the worker executable.
    ///
    /// `options.executable` wins (relative values resolve against `home`);
    /// otherwise `<home>/bin/<name>`; with no home, the bare name.
    pub fn executable(&self) -> PathBuf {
        match (self.options.get(VM_EXECUTABLE_OPTION), &self.home) {
            (Some(exe), Some(home)) if Path::new(exe).is_relative() => home.join(exe),
            (Some(exe), _) => PathBuf::from(exe),
            (None, Some(home)) => home.join("bin").join(&self.name),
            (None, None) => PathBuf::from(&self.name),
        }
    }
}

/// Resolved `instrument.<name>.*` configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub class_name: String,
    pub options: BTreeMap<String, String>,
}

impl InstrumentConfig {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Resolved `results.<name>.*` configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultProcessorConfig {
    pub class_name: String,
    pub options: BTreeMap<String, String>,
}

impl ResultProcessorConfig {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Turns store sub-views into typed configuration objects.
///
/// Derived configs are cached per name. The store is read-only, so the
/// resolver can be shared across trials behind an `Arc`.
#[derive(Debug)]
pub struct ConfigResolver {
    store: ConfigStore,
    ambient_home: Option<PathBuf>,
    vm_cache: DashMap<String, VmConfig>,
    instrument_cache: DashMap<String, InstrumentConfig>,
}

impl ConfigResolver {
    /// Create a resolver whose ambient runtime home is the directory holding
    /// the current executable.
    pub fn new(store: ConfigStore) -> Self {
        let ambient_home = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        Self::with_ambient_home(store, ambient_home)
    }

    /// Create a resolver with an explicit ambient runtime home.
    pub fn with_ambient_home(store: ConfigStore, ambient_home: Option<PathBuf>) -> Self {
        Self {
            store,
            ambient_home,
            vm_cache: DashMap::new(),
            instrument_cache: DashMap::new(),
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn ambient_home(&self) -> Option<&Path> {
        self.ambient_home.as_deref()
    }

    /// Resolve the selected device, or [`DEFAULT_DEVICE_NAME`] if none is
    /// selected.
    pub fn device_config(&self, selected: Option<&str>) -> RigResult<DeviceConfig> {
        let name = EntityName::new("device", selected.unwrap_or(DEFAULT_DEVICE_NAME))?;
        let prefix = format!("device.{}", name);
        let type_key = format!("{}.type", prefix);

        let raw_type = self.store.get(&type_key).ok_or_else(|| {
            InvalidConfigurationError::MissingRequiredKey {
                key: type_key.clone(),
                context: format!("device '{}'", name),
            }
        })?;

        let kind = DeviceKind::parse(raw_type).ok_or_else(|| {
            InvalidConfigurationError::UnknownDeviceType {
                device: name.to_string(),
                value: raw_type.to_string(),
            }
        })?;

        Ok(DeviceConfig {
            name: name.into(),
            kind,
            options: self.store.options(&prefix),
        })
    }

    /// Global `vm.args`, tokenized.
    pub fn global_vm_args(&self) -> Vec<String> {
        self.store.get("vm.args").map(split_args).unwrap_or_default()
    }

    /// Resolve a runtime variant by name.
    ///
    /// Arguments are the global `vm.args` followed by `vm.<name>.args`.
    /// Home is `vm.<name>.home`, else `vm.baseDirectory/<name>`, else the
    /// ambient runtime home.
    pub fn vm_config(&self, name: &str) -> RigResult<VmConfig> {
        if let Some(cached) = self.vm_cache.get(name) {
            return Ok(cached.clone());
        }

        let name = EntityName::new("vm", name)?;
        let prefix = format!("vm.{}", name);

        let mut args = self.global_vm_args();
        if let Some(own) = self.store.get(&format!("{}.args", prefix)) {
            args.extend(split_args(own));
        }

        let home = match (
            self.store.get(&format!("{}.home", prefix)),
            self.store.get("vm.baseDirectory"),
        ) {
            (Some(home), _) => Some(PathBuf::from(home)),
            (None, Some(base)) => Some(Path::new(base).join(name.as_str())),
            (None, None) => self.ambient_home.clone(),
        };

        let config = VmConfig {
            name: name.to_string(),
            home,
            args,
            options: self.store.options(&prefix),
        };

        tracing::debug!(vm = %name, args = config.args.len(), "Resolved vm config");
        self.vm_cache.insert(name.into(), config.clone());
        Ok(config)
    }

    /// Resolve an instrument by name. Fails with a missing-configuration
    /// error when `instrument.<name>.class` is absent, even if options exist.
    pub fn instrument_config(&self, name: &str) -> RigResult<InstrumentConfig> {
        if let Some(cached) = self.instrument_cache.get(name) {
            return Ok(cached.clone());
        }

        let prefix = format!("instrument.{}", name);
        let class_name = match self.store.get(&format!("{}.class", prefix)) {
            Some(class) => class.to_string(),
            None => {
                return Err(MissingConfigurationError::Instrument {
                    name: name.to_string(),
                    configured: self.configured_instruments().into_iter().collect(),
                }
                .into())
            }
        };

        let config = InstrumentConfig {
            class_name,
            options: self.store.options(&prefix),
        };
        self.instrument_cache.insert(name.to_string(), config.clone());
        Ok(config)
    }

    /// Every name with an `instrument.<name>.class` key.
    pub fn configured_instruments(&self) -> BTreeSet<String> {
        self.names_with_class("instrument")
    }

    /// Class identifiers of every `results.<name>.class` entry.
    pub fn configured_result_processors(&self) -> BTreeSet<String> {
        self.names_with_class("results")
            .into_iter()
            .filter_map(|name| self.store.get(&format!("results.{}.class", name)))
            .map(str::to_string)
            .collect()
    }

    /// Names of the `results.<name>` entries, paired with their class.
    pub fn result_processor_entries(&self) -> Vec<(String, String)> {
        self.names_with_class("results")
            .into_iter()
            .filter_map(|name| {
                self.store
                    .get(&format!("results.{}.class", name))
                    .map(|class| (name.clone(), class.to_string()))
            })
            .collect()
    }

    /// Resolve the result processor configured with the given class. When
    /// several entries share a class, the first by name wins.
    pub fn result_processor_config(&self, class_name: &str) -> RigResult<ResultProcessorConfig> {
        let name = self
            .result_processor_entries()
            .into_iter()
            .find(|(_, class)| class == class_name)
            .map(|(name, _)| name)
            .ok_or_else(|| MissingConfigurationError::ResultProcessor {
                class: class_name.to_string(),
            })?;

        Ok(ResultProcessorConfig {
            class_name: class_name.to_string(),
            options: self.store.options(&format!("results.{}", name)),
        })
    }

    fn names_with_class(&self, namespace: &str) -> BTreeSet<String> {
        self.store
            .child_names(namespace)
            .into_iter()
            .filter(|name| {
                self.store
                    .contains_key(&format!("{}.{}.class", namespace, name))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RigError;

    fn device_test_store() -> ConfigStore {
        ConfigStore::new([
            ("device.local.type", "local"),
            ("device.local.options.defaultVm", "jvm"),
            ("device.android.type", "adb"),
            ("device.android.options.defaultVm", "android"),
        ])
    }

    fn resolver(entries: &[(&str, &str)]) -> ConfigResolver {
        ConfigResolver::with_ambient_home(
            ConfigStore::new(entries.iter().copied()),
            Some(PathBuf::from("/opt/ambient")),
        )
    }

    #[test]
    fn test_split_args_escaped_spaces() {
        assert_eq!(
            split_args("-a=string\\ with\\ spa\\ces -b -c"),
            vec!["-a=string with spaces", "-b", "-c"]
        );
    }

    #[test]
    fn test_split_args_whitespace_runs() {
        assert_eq!(split_args(" -d     -e     "), vec!["-d", "-e"]);
        assert_eq!(split_args("\t-a\n-b"), vec!["-a", "-b"]);
        assert!(split_args("   ").is_empty());
        assert!(split_args("").is_empty());
    }

    #[test]
    fn test_split_args_escaped_tab_becomes_space() {
        assert_eq!(split_args("a\\\tb c"), vec!["a b", "c"]);
        assert_eq!(split_args("\\ "), vec![" "]);
        assert_eq!(split_args("trailing\\"), vec!["trailing\\"]);
    }

    #[test]
    fn test_default_device_config() {
        let resolver = ConfigResolver::new(device_test_store());
        let device = resolver.device_config(None).unwrap();
        assert_eq!(device.name, "local");
        assert_eq!(device.kind, DeviceKind::Local);
    }

    #[test]
    fn test_device_config() {
        let resolver = ConfigResolver::new(device_test_store());
        let device = resolver.device_config(Some("local")).unwrap();
        assert_eq!(device.name, "local");
        assert_eq!(device.kind, DeviceKind::Local);
        assert_eq!(device.option("defaultVm"), Some("jvm"));
        assert_eq!(device.option("vmBaseDirectory"), None);
    }

    #[test]
    fn test_device_config_non_local() {
        let resolver = ConfigResolver::new(device_test_store());
        let device = resolver.device_config(Some("android")).unwrap();
        assert_eq!(device.name, "android");
        assert_eq!(device.kind, DeviceKind::Remote);
        assert_eq!(device.option("defaultVm"), Some("android"));
    }

    #[test]
    fn test_device_config_missing_type() {
        let resolver = resolver(&[
            ("device.local.typo", "local"),
            ("device.local.options.defaultVm", "jvm"),
        ]);
        let err = resolver.device_config(Some("local")).unwrap_err();
        assert!(matches!(err, RigError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_device_config_unknown_type() {
        let resolver = resolver(&[("device.lab.type", "toaster")]);
        let err = resolver.device_config(Some("lab")).unwrap_err();
        assert!(matches!(
            err,
            RigError::InvalidConfiguration(InvalidConfigurationError::UnknownDeviceType { .. })
        ));
    }

    #[test]
    fn test_vm_config_base_directory_and_name() {
        let resolver = resolver(&[("vm.baseDirectory", "/opt/vms")]);
        assert_eq!(
            resolver.vm_config("test").unwrap(),
            VmConfig::named("test").with_home("/opt/vms/test")
        );
    }

    #[test]
    fn test_vm_config_explicit_home_beats_base_directory() {
        let resolver = resolver(&[
            ("vm.baseDirectory", "/opt/vms"),
            ("vm.test.home", "test-home"),
        ]);
        assert_eq!(
            resolver.vm_config("test").unwrap(),
            VmConfig::named("test").with_home("test-home")
        );
    }

    #[test]
    fn test_vm_config_ambient_home() {
        let resolver = resolver(&[]);
        assert_eq!(
            resolver.vm_config("test").unwrap().home,
            Some(PathBuf::from("/opt/ambient"))
        );
    }

    #[test]
    fn test_vm_config_merges_args_in_order() {
        let resolver = resolver(&[
            ("vm.args", "-a -b   -c"),
            ("vm.test.home", "/jdk"),
            ("vm.test.args", " -d     -e     "),
        ]);
        assert_eq!(
            resolver.vm_config("test").unwrap(),
            VmConfig::named("test")
                .with_home("/jdk")
                .with_arg("-a")
                .with_arg("-b")
                .with_arg("-c")
                .with_arg("-d")
                .with_arg("-e")
        );
    }

    #[test]
    fn test_vm_config_escaped_spaces_in_args() {
        let resolver = resolver(&[
            ("vm.args", "-a=string\\ with\\ spa\\ces -b -c"),
            ("vm.test.home", "/jdk"),
        ]);
        assert_eq!(
            resolver.vm_config("test").unwrap().args,
            vec!["-a=string with spaces", "-b", "-c"]
        );
    }

    #[test]
    fn test_vm_config_options_and_cache() {
        let resolver = resolver(&[
            ("vm.test.options.executable", "bin/worker"),
            ("vm.test.options.unknownKey", "kept verbatim"),
        ]);
        let first = resolver.vm_config("test").unwrap();
        assert_eq!(first.options["unknownKey"], "kept verbatim");
        assert_eq!(first.executable(), PathBuf::from("/opt/ambient/bin/worker"));
        assert_eq!(resolver.vm_config("test").unwrap(), first);
    }

    #[test]
    fn test_vm_config_rejects_dotted_name() {
        let resolver = resolver(&[]);
        assert!(matches!(
            resolver.vm_config("a.b"),
            Err(RigError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_vm_executable_resolution() {
        assert_eq!(
            VmConfig::named("jdk").with_home("/usr/lib/jdk").executable(),
            PathBuf::from("/usr/lib/jdk/bin/jdk")
        );
        assert_eq!(
            VmConfig::named("jdk")
                .with_home("/usr/lib/jdk")
                .with_option("executable", "/bin/worker")
                .executable(),
            PathBuf::from("/bin/worker")
        );
        assert_eq!(VmConfig::named("worker").executable(), PathBuf::from("worker"));
    }

    #[test]
    fn test_instrument_config() {
        let resolver = resolver(&[
            ("instrument.test.class", "test.ClassName"),
            ("instrument.test.options.a", "1"),
            ("instrument.test.options.b", "excited b b excited"),
        ]);
        assert_eq!(
            resolver.instrument_config("test").unwrap(),
            InstrumentConfig::new("test.ClassName")
                .with_option("a", "1")
                .with_option("b", "excited b b excited")
        );
    }

    #[test]
    fn test_instrument_config_not_configured() {
        let resolver = resolver(&[
            ("instrument.test.options.a", "1"),
            ("instrument.test.options.b", "excited b b excited"),
        ]);
        let err = resolver.instrument_config("test").unwrap_err();
        assert!(err.is_usage_error());
        assert!(matches!(
            err,
            RigError::MissingConfiguration(MissingConfigurationError::Instrument { .. })
        ));
    }

    #[test]
    fn test_configured_instruments() {
        let resolver = resolver(&[
            ("instrument.test.class", "test.ClassName"),
            ("instrument.test2.class", "test.ClassName"),
            ("instrument.test3.options.a", "1"),
            ("instrument.test4.class", "test.ClassName"),
            ("instrument.test4.options.b", "excited b b excited"),
        ]);
        let expected: BTreeSet<String> = ["test", "test2", "test4"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(resolver.configured_instruments(), expected);
    }

    #[test]
    fn test_configured_result_processors() {
        assert!(resolver(&[]).configured_result_processors().is_empty());

        let resolver = resolver(&[("results.test.class", "json")]);
        let expected: BTreeSet<String> = ["json".to_string()].into_iter().collect();
        assert_eq!(resolver.configured_result_processors(), expected);
    }

    #[test]
    fn test_result_processor_config() {
        let resolver = resolver(&[
            ("results.test.class", "json"),
            ("results.test.options.g", "ak"),
            ("results.test.options.c", "aliper"),
        ]);
        assert_eq!(
            resolver.result_processor_config("json").unwrap(),
            ResultProcessorConfig::new("json")
                .with_option("g", "ak")
                .with_option("c", "aliper")
        );

        let err = resolver.result_processor_config("csv").unwrap_err();
        assert!(err.is_usage_error());
    }
}
