// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules.

pub mod list;
pub mod run;
pub mod validate;

use std::path::Path;
use std::sync::Arc;

use benchrig_core::store::parse_override;
use benchrig_core::{ConfigResolver, ConfigStore, ProcessorRegistry, RigError};

use crate::error::CliResult;
use crate::metrics::MetricsProcessor;

/// Build the layered store and its resolver.
pub fn load_resolver(
    config_file: Option<&Path>,
    overrides: &[String],
) -> CliResult<Arc<ConfigResolver>> {
    let overrides = overrides
        .iter()
        .map(|raw| parse_override(raw))
        .collect::<Result<Vec<_>, _>>()
        .map_err(RigError::from)?;

    let store: ConfigStore = benchrig_core::ConfigStoreBuilder::standard(config_file)?
        .overrides(overrides)
        .build();

    tracing::debug!(keys = store.len(), "Configuration loaded");
    Ok(Arc::new(ConfigResolver::new(store)))
}

/// Built-in result processors plus the CLI's `metrics` class.
pub fn processor_registry() -> ProcessorRegistry {
    let mut registry = ProcessorRegistry::builtin();
    registry.register(MetricsProcessor::CLASS, MetricsProcessor::factory);
    registry
}
