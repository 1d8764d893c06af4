// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! vcable CLI
//!
//! Command-line interface for configuring vcable sessions and running the
//! tick engine against them.

use clap::{Parser, Subcommand};

mod commands;
mod cpu_affinity;
mod metrics;
mod provision;

/// vcable - shared-buffer virtual audio cable driver
#[derive(Parser)]
#[command(name = "vcable")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "vcable.yaml")]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        file: String,
    },

    /// Show the region geometry and ring placement for the configuration
    Layout,

    /// Create the configured endpoints and run the tick engine
    Run {
        /// Stop after this many seconds instead of waiting for Ctrl+C
        #[arg(short, long)]
        seconds: Option<u64>,

        /// Print the final session statistics as JSON
        #[arg(long)]
        json: bool,

        /// Serve Prometheus metrics on this port
        #[arg(long)]
        metrics_port: Option<u16>,
    },

    /// List configured endpoints
    List,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    // Dispatch to command handlers
    match cli.command {
        Commands::Validate { file } => commands::validate::execute(&file).await,
        Commands::Layout => commands::layout::execute(&cli.config).await,
        Commands::Run {
            seconds,
            json,
            metrics_port,
        } => commands::run::execute(&cli.config, seconds, json, metrics_port).await,
        Commands::List => commands::list::execute(&cli.config).await,
    }
}
