// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Benchrig CLI
//!
//! Command-line interface for the benchrig benchmark runner.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod error;
mod metrics;

use commands::run::RunArgs;

/// Benchrig - Runs benchmark scenarios across devices, VMs and instruments
#[derive(Parser)]
#[command(name = "benchrig")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (defaults to ~/.benchrig/config.yaml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override a configuration key (key=value, repeatable)
    #[arg(short = 'C', long = "set", value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run scenarios through the experiment matrix
    Run(RunArgs),

    /// Resolve and print the configuration
    Validate {
        /// Device to resolve (defaults to `local`)
        #[arg(short = 'e', long)]
        device: Option<String>,

        /// Additional VM configurations to resolve
        #[arg(long = "vm")]
        vms: Vec<String>,
    },

    /// List configured instruments and result processors
    List,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .init();

    let result = match commands::load_resolver(cli.config.as_deref(), &cli.overrides) {
        Ok(resolver) => match cli.command {
            Commands::Run(args) => commands::run::execute(resolver, args).await,
            Commands::Validate { device, vms } => {
                commands::validate::execute(resolver, device.as_deref(), &vms).await
            }
            Commands::List => commands::list::execute(resolver).await,
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("✗ {}", e);
            std::process::exit(e.exit_code());
        }
    }
}
