// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Lambdaward CLI
//!
//! Command-line interface for the lambdaward worker core.

use clap::{Parser, Subcommand};

mod commands;

/// Lambdaward - sandbox lifecycle core for a serverless worker
#[derive(Parser)]
#[command(name = "ward")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "lambdaward.yaml")]
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

    /// Admit and complete requests for a function against local sandboxes
    Invoke {
        /// Function name in the local registry
        function: String,

        /// Number of sequential requests
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,

        /// Print the final handler table and counters as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    match cli.command {
        Commands::Validate { file } => commands::validate::execute(&file).await,
        Commands::Invoke {
            function,
            count,
            json,
        } => commands::invoke::execute(&cli.config, &function, count, json).await,
    }
}
