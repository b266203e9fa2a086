// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Execution targets for worker processes.
//!
//! A [`Device`] is selected by name from `device.<name>.*`. The `type` key
//! picks the variant; everything else is passed through as options.

pub mod local;
pub mod process;
pub mod remote;

use std::sync::Arc;

use crate::config::{ConfigResolver, DeviceConfig, DeviceKind, VmConfig};
use crate::error::{DeviceError, InvalidConfigurationError, RigResult};

pub use local::LocalDevice;
pub use process::{WorkerCommand, WorkerProcess};
pub use remote::RemoteDevice;

/// Option naming the maximum number of concurrent workers.
pub const WORKERS_OPTION: &str = "workers";

/// Option naming the VM used when none is requested.
pub const DEFAULT_VM_OPTION: &str = "defaultVm";

/// A configured execution target.
#[derive(Debug)]
pub enum Device {
    Local(LocalDevice),
    Remote(RemoteDevice),
}

impl Device {
    /// Build the device variant named by `config.kind`.
    pub fn from_config(config: DeviceConfig, resolver: Arc<ConfigResolver>) -> RigResult<Self> {
        let device = match config.kind {
            DeviceKind::Local => Self::Local(LocalDevice::new(config, resolver)?),
            DeviceKind::Remote => Self::Remote(RemoteDevice::new(config, resolver)?),
        };
        tracing::debug!(
            device = %device.name(),
            kind = %device.kind(),
            slots = device.worker_slots(),
            "Device configured"
        );
        Ok(device)
    }

    /// Resolve `device.<selected>` and build it.
    pub fn resolve(resolver: Arc<ConfigResolver>, selected: Option<&str>) -> RigResult<Self> {
        let config = resolver.device_config(selected)?;
        Self::from_config(config, resolver)
    }

    /// Prepare the device for launches. Local devices are always ready.
    pub async fn connect(&self) -> Result<(), DeviceError> {
        match self {
            Self::Local(_) => Ok(()),
            Self::Remote(remote) => remote.connect().await,
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        match self {
            Self::Local(local) => local.config(),
            Self::Remote(remote) => remote.config(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config().name
    }

    pub fn kind(&self) -> DeviceKind {
        self.config().kind
    }

    /// Maximum number of workers that may run at once.
    pub fn worker_slots(&self) -> usize {
        match self {
            Self::Local(local) => local.worker_slots(),
            Self::Remote(remote) => remote.worker_slots(),
        }
    }

    /// Whether workers may run concurrently. Devices without this capability
    /// get a single worker slot.
    pub fn supports_parallel_workers(&self) -> bool {
        self.worker_slots() > 1
    }

    /// True when the default VM falls back to running the current
    /// executable as its worker.
    pub fn uses_ambient_worker(&self) -> bool {
        match self {
            Self::Local(local) => local.uses_ambient_worker(),
            Self::Remote(_) => false,
        }
    }

    pub fn default_vm_config(&self) -> RigResult<VmConfig> {
        match self {
            Self::Local(local) => local.default_vm_config(),
            Self::Remote(remote) => remote.default_vm_config(),
        }
    }

    /// Launch a worker for `vm` with the given arguments and environment.
    pub async fn new_worker_process(
        &self,
        vm: &VmConfig,
        command: &WorkerCommand,
    ) -> Result<WorkerProcess, DeviceError> {
        match self {
            Self::Local(local) => local.new_worker_process(vm, command),
            Self::Remote(remote) => remote.new_worker_process(vm, command).await,
        }
    }
}

/// Parse the `workers` option. Absent means one slot.
pub(crate) fn worker_slots(config: &DeviceConfig) -> Result<usize, InvalidConfigurationError> {
    let Some(raw) = config.option(WORKERS_OPTION) else {
        return Ok(1);
    };
    match raw.trim().parse::<usize>() {
        Ok(slots) if slots > 0 => Ok(slots),
        _ => Err(InvalidConfigurationError::InvalidKeyValue {
            key: format!("device.{}.options.{}", config.name, WORKERS_OPTION),
            value: raw.to_string(),
            reason: "must be a positive integer".to_string(),
        }),
    }
}

pub(crate) fn default_vm_option(config: &DeviceConfig) -> Option<&str> {
    config
        .option(DEFAULT_VM_OPTION)
        .map(str::trim)
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RigError;
    use crate::store::ConfigStore;

    fn resolver(entries: &[(&str, &str)]) -> Arc<ConfigResolver> {
        Arc::new(ConfigResolver::with_ambient_home(
            ConfigStore::new(entries.iter().copied()),
            None,
        ))
    }

    #[test]
    fn test_resolve_local_by_default() {
        let device = Device::resolve(resolver(&[("device.local.type", "local")]), None).unwrap();
        assert_eq!(device.name(), "local");
        assert_eq!(device.kind(), DeviceKind::Local);
        assert!(!device.supports_parallel_workers());
    }

    #[test]
    fn test_resolve_remote() {
        let device = Device::resolve(
            resolver(&[
                ("device.phone.type", "adb"),
                ("device.phone.options.host", "pixel"),
                ("device.phone.options.workers", "2"),
            ]),
            Some("phone"),
        )
        .unwrap();
        assert_eq!(device.kind(), DeviceKind::Remote);
        assert_eq!(device.worker_slots(), 2);
        assert!(device.supports_parallel_workers());
    }

    #[test]
    fn test_invalid_worker_count() {
        for bad in ["0", "-1", "many"] {
            let err = Device::resolve(
                resolver(&[
                    ("device.local.type", "local"),
                    ("device.local.options.workers", bad),
                ]),
                None,
            )
            .unwrap_err();
            assert!(matches!(
                err,
                RigError::InvalidConfiguration(InvalidConfigurationError::InvalidKeyValue { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_local_connect_is_noop() {
        let device = Device::resolve(resolver(&[("device.local.type", "local")]), None).unwrap();
        device.connect().await.unwrap();
    }
}
