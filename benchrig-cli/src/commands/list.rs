// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `benchrig list` command - List configured instruments and result processors.

use std::sync::Arc;

use benchrig_core::ConfigResolver;

use crate::error::CliResult;

pub async fn execute(resolver: Arc<ConfigResolver>) -> CliResult<i32> {
    let instruments = resolver.configured_instruments();
    let processors = resolver.result_processor_entries();

    println!("╔═══════════════════════════╦═══════════════════════════╗");
    println!("║ Instrument                ║ Class                     ║");
    println!("╠═══════════════════════════╬═══════════════════════════╣");
    for name in &instruments {
        let class = resolver
            .store()
            .get(&format!("instrument.{}.class", name))
            .unwrap_or("");
        println!("║ {:<25} ║ {:<25} ║", name, class);
    }
    println!("╚═══════════════════════════╩═══════════════════════════╝");
    println!("Total: {} instrument(s)", instruments.len());
    println!();

    if processors.is_empty() {
        println!("No result processors configured.");
        return Ok(0);
    }

    println!("╔═══════════════════════════╦═══════════════════════════╗");
    println!("║ Result processor          ║ Class                     ║");
    println!("╠═══════════════════════════╬═══════════════════════════╣");
    for (name, class) in &processors {
        println!("║ {:<25} ║ {:<25} ║", name, class);
    }
    println!("╚═══════════════════════════╩═══════════════════════════╝");
    println!("Total: {} result processor(s)", processors.len());

    Ok(0)
}
