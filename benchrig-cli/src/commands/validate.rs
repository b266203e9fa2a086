// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `benchrig validate` command - Resolve the configuration and report it.

use std::sync::Arc;

use benchrig_core::{ConfigResolver, Device};

use crate::error::CliResult;

pub async fn execute(
    resolver: Arc<ConfigResolver>,
    device_name: Option<&str>,
    vm_names: &[String],
) -> CliResult<i32> {
    tracing::info!(device = ?device_name, "Validating configuration");

    let device = Device::resolve(Arc::clone(&resolver), device_name)?;
    let mut vms = vec![device.default_vm_config()?];
    for name in vm_names {
        vms.push(resolver.vm_config(name)?);
    }

    let instruments = resolver
        .configured_instruments()
        .into_iter()
        .map(|name| {
            let config = resolver.instrument_config(&name)?;
            Ok((name, config))
        })
        .collect::<benchrig_core::RigResult<Vec<_>>>()?;

    let registry = super::processor_registry();
    registry.validate(&resolver)?;

    println!("✓ Configuration is valid");
    println!();
    println!("Device:");
    println!("  Name:    {}", device.name());
    println!("  Type:    {}", device.kind());
    println!("  Workers: {}", device.worker_slots());
    println!(
        "  Parallel: {}",
        if device.supports_parallel_workers() { "yes" } else { "no" }
    );
    for (key, value) in &device.config().options {
        println!("  {}: {}", key, value);
    }
    if device.uses_ambient_worker() {
        println!(
            "  ⚠ No defaultVm set: runs without --vm use this executable as the worker"
        );
    }

    println!();
    println!("VMs ({}):", vms.len());
    for vm in &vms {
        println!(
            "  - {} (executable: {}, args: [{}])",
            vm.name,
            vm.executable().display(),
            vm.args.join(" ")
        );
    }

    println!();
    println!("Instruments ({}):", instruments.len());
    for (name, config) in &instruments {
        println!("  - {} (class: {})", name, config.class_name);
    }

    let processors = resolver.result_processor_entries();
    println!();
    println!("Result processors ({}):", processors.len());
    for (name, class) in &processors {
        println!("  - {} (class: {})", name, class);
    }

    Ok(0)
}
