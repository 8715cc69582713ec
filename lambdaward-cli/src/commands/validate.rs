// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `ward validate` command - Validate configuration file.

use lambdaward_core::ConfigLoader;

pub async fn execute(file: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file, "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Worker Settings:");
            println!("  Worker Directory:   {}", config.worker_dir.display());
            println!("  Registry Directory: {}", config.registry_dir.display());
            println!(
                "  Pip Mirror:         {}",
                config.pip_mirror.as_deref().unwrap_or("(none)")
            );
            println!("  Handler Cache:      {} KiB", config.handler_cache_size_kb);
            println!(
                "  Ready Timeout:      {}ms (poll {}ms)",
                config.ready_timeout.as_millis(),
                config.ready_poll_interval.as_millis()
            );
            println!(
                "  Reaper Interval:    {}ms",
                config.reaper_interval.as_millis()
            );
            println!("  Runtime Command:    {}", config.runtime_command.join(" "));
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
