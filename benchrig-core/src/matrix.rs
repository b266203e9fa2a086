// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Experiment matrix expansion.
//!
//! Scenarios × VMs × instruments, in scenario-major order. Identical inputs
//! always produce the identical sequence.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigResolver, InstrumentConfig, VmConfig};
use crate::error::RigResult;
use crate::trial::min_measurements;

/// A benchmark routine plus the parameter values it runs with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.parameters.is_empty() {
            let params: Vec<String> = self
                .parameters
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, "{{{}}}", params.join(","))?;
        }
        Ok(())
    }
}

/// A fully-resolved point in the matrix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Experiment {
    pub scenario: Scenario,
    pub vm: VmConfig,
    pub instrument_name: String,
    pub instrument: InstrumentConfig,
}

impl Experiment {
    /// Short human-readable identity: `scenario/vm/instrument`.
    pub fn label(&self) -> String {
        format!("{}/{}/{}", self.scenario, self.vm.name, self.instrument_name)
    }
}

impl fmt::Display for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Collects the three matrix dimensions.
#[derive(Debug, Default, Clone)]
pub struct ExperimentMatrixBuilder {
    scenarios: Vec<Scenario>,
    vms: Vec<VmConfig>,
    instruments: Vec<String>,
}

impl ExperimentMatrixBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scenario(mut self, scenario: Scenario) -> Self {
        self.scenarios.push(scenario);
        self
    }

    pub fn scenarios(mut self, scenarios: impl IntoIterator<Item = Scenario>) -> Self {
        self.scenarios.extend(scenarios);
        self
    }

    pub fn vm(mut self, vm: VmConfig) -> Self {
        self.vms.push(vm);
        self
    }

    pub fn vms(mut self, vms: impl IntoIterator<Item = VmConfig>) -> Self {
        self.vms.extend(vms);
        self
    }

    pub fn instrument(mut self, name: impl Into<String>) -> Self {
        self.instruments.push(name.into());
        self
    }

    pub fn instruments<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.instruments.extend(names.into_iter().map(Into::into));
        self
    }

    /// Expand the product. Instruments are resolved and their options
    /// checked first so a misspelled name or a malformed option fails before
    /// anything runs. Repeated entries in a dimension are collapsed to their
    /// first occurrence.
    pub fn build(self, resolver: &ConfigResolver) -> RigResult<ExperimentMatrix> {
        let scenarios = dedup(self.scenarios, |s| s.clone());
        let vms = dedup(self.vms, |vm| vm.name.clone());
        let instrument_names = dedup(self.instruments, |name| name.clone());

        let instruments = instrument_names
            .into_iter()
            .map(|name| {
                let config = resolver.instrument_config(&name)?;
                min_measurements(&config)?;
                Ok((name, config))
            })
            .collect::<RigResult<Vec<_>>>()?;

        let mut experiments =
            Vec::with_capacity(scenarios.len() * vms.len() * instruments.len());
        for scenario in &scenarios {
            for vm in &vms {
                for (name, instrument) in &instruments {
                    experiments.push(Arc::new(Experiment {
                        scenario: scenario.clone(),
                        vm: vm.clone(),
                        instrument_name: name.clone(),
                        instrument: instrument.clone(),
                    }));
                }
            }
        }

        tracing::debug!(
            scenarios = scenarios.len(),
            vms = vms.len(),
            instruments = instruments.len(),
            experiments = experiments.len(),
            "Experiment matrix built"
        );

        Ok(ExperimentMatrix { experiments })
    }
}

fn dedup<T, K: Eq + std::hash::Hash>(items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    let mut seen = std::collections::HashSet::new();
    items.into_iter().filter(|item| seen.insert(key(item))).collect()
}

/// Ordered, immutable sequence of experiments.
#[derive(Debug, Clone, Default)]
pub struct ExperimentMatrix {
    experiments: Vec<Arc<Experiment>>,
}

impl ExperimentMatrix {
    pub fn experiments(&self) -> &[Arc<Experiment>] {
        &self.experiments
    }

    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Experiment>> {
        self.experiments.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{InvalidConfigurationError, MissingConfigurationError, RigError};
    use crate::store::ConfigStore;

    fn resolver() -> ConfigResolver {
        ConfigResolver::with_ambient_home(
            ConfigStore::new([
                ("instrument.runtime.class", "runtime"),
                ("instrument.allocation.class", "allocation"),
            ]),
            None,
        )
    }

    fn labels(matrix: &ExperimentMatrix) -> Vec<String> {
        matrix.iter().map(|e| e.label()).collect()
    }

    #[test]
    fn test_scenario_major_order() {
        let matrix = ExperimentMatrixBuilder::new()
            .scenario(Scenario::new("sort"))
            .scenario(Scenario::new("hash"))
            .vm(VmConfig::named("a"))
            .vm(VmConfig::named("b"))
            .instruments(["runtime", "allocation"])
            .build(&resolver())
            .unwrap();

        assert_eq!(
            labels(&matrix),
            vec![
                "sort/a/runtime",
                "sort/a/allocation",
                "sort/b/runtime",
                "sort/b/allocation",
                "hash/a/runtime",
                "hash/a/allocation",
                "hash/b/runtime",
                "hash/b/allocation",
            ]
        );
    }

    #[test]
    fn test_identical_inputs_identical_order() {
        let build = || {
            ExperimentMatrixBuilder::new()
                .scenarios([
                    Scenario::new("sort").with_parameter("size", "10"),
                    Scenario::new("sort").with_parameter("size", "100"),
                ])
                .vms([VmConfig::named("a"), VmConfig::named("b")])
                .instruments(["allocation", "runtime"])
                .build(&resolver())
                .unwrap()
        };
        let first = build();
        let second = build();
        assert_eq!(first.len(), 8);
        assert_eq!(first.experiments(), second.experiments());
    }

    #[test]
    fn test_duplicates_collapse() {
        let matrix = ExperimentMatrixBuilder::new()
            .scenario(Scenario::new("sort"))
            .scenario(Scenario::new("sort"))
            .vm(VmConfig::named("a"))
            .vm(VmConfig::named("a").with_arg("-x"))
            .instruments(["runtime", "runtime"])
            .build(&resolver())
            .unwrap();
        assert_eq!(matrix.len(), 1);
        assert!(matrix.experiments()[0].vm.args.is_empty());
    }

    #[test]
    fn test_empty_dimension() {
        let matrix = ExperimentMatrixBuilder::new()
            .scenario(Scenario::new("sort"))
            .instrument("runtime")
            .build(&resolver())
            .unwrap();
        assert!(matrix.is_empty());
    }

    #[test]
    fn test_unknown_instrument_is_usage_error() {
        let err = ExperimentMatrixBuilder::new()
            .scenario(Scenario::new("sort"))
            .vm(VmConfig::named("a"))
            .instrument("runtiem")
            .build(&resolver())
            .unwrap_err();
        assert!(err.is_usage_error());
        assert!(matches!(
            err,
            RigError::MissingConfiguration(MissingConfigurationError::Instrument { .. })
        ));
    }

    #[test]
    fn test_malformed_instrument_option_fails_build() {
        let resolver = ConfigResolver::with_ambient_home(
            ConfigStore::new([
                ("instrument.runtime.class", "runtime"),
                ("instrument.bad.class", "runtime"),
                ("instrument.bad.options.minMeasurements", "lots"),
            ]),
            None,
        );
        let err = ExperimentMatrixBuilder::new()
            .scenario(Scenario::new("sort"))
            .vm(VmConfig::named("a"))
            .instruments(["runtime", "bad"])
            .build(&resolver)
            .unwrap_err();
        assert!(!err.is_usage_error());
        assert!(matches!(
            err,
            RigError::InvalidConfiguration(InvalidConfigurationError::InvalidKeyValue { .. })
        ));
    }

    #[test]
    fn test_scenario_display() {
        let scenario = Scenario::new("sort")
            .with_parameter("size", "10")
            .with_parameter("algo", "quick");
        assert_eq!(scenario.to_string(), "sort{algo=quick,size=10}");
    }
}
