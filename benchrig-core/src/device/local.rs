// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Local device: workers run on this host.

use std::process::Command;
use std::sync::Arc;

use crate::config::{ConfigResolver, DeviceConfig, VmConfig, VM_EXECUTABLE_OPTION};
use crate::error::{DeviceError, RigResult};

use super::process::{WorkerCommand, WorkerProcess};
use super::{default_vm_option, worker_slots};

/// Name of the VM config synthesised from the ambient runtime.
pub const AMBIENT_VM_NAME: &str = "default";

/// Runs worker processes on the local host.
#[derive(Debug)]
pub struct LocalDevice {
    config: DeviceConfig,
    resolver: Arc<ConfigResolver>,
    slots: usize,
}

impl LocalDevice {
    pub fn new(config: DeviceConfig, resolver: Arc<ConfigResolver>) -> RigResult<Self> {
        let slots = worker_slots(&config)?;
        Ok(Self {
            config,
            resolver,
            slots,
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn worker_slots(&self) -> usize {
        self.slots
    }

    /// True when no `defaultVm` is configured, so the default VM runs the
    /// current executable as its worker.
    pub fn uses_ambient_worker(&self) -> bool {
        default_vm_option(&self.config).is_none()
    }

    /// The device's `defaultVm` if configured, otherwise a config seeded from
    /// the ambient runtime: its home, the current executable as the worker,
    /// and the global `vm.args`.
    pub fn default_vm_config(&self) -> RigResult<VmConfig> {
        if let Some(name) = default_vm_option(&self.config) {
            return self.resolver.vm_config(name);
        }

        tracing::warn!(
            device = %self.config.name,
            "No defaultVm configured; using the current executable as the worker"
        );
        let mut vm = VmConfig::named(AMBIENT_VM_NAME);
        vm.home = self.resolver.ambient_home().map(|p| p.to_path_buf());
        vm.args = self.resolver.global_vm_args();
        if let Ok(exe) = std::env::current_exe() {
            vm.options.insert(
                VM_EXECUTABLE_OPTION.to_string(),
                exe.to_string_lossy().into_owned(),
            );
        }
        Ok(vm)
    }

    pub fn new_worker_process(
        &self,
        vm: &VmConfig,
        command: &WorkerCommand,
    ) -> Result<WorkerProcess, DeviceError> {
        let program = vm.executable();
        let mut process = Command::new(&program);
        process.args(&command.args).envs(&command.env);

        tracing::debug!(
            device = %self.config.name,
            vm = %vm.name,
            program = %program.display(),
            "Launching local worker"
        );

        WorkerProcess::spawn(process, program.display().to_string())
    }
}
