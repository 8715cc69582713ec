// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `ward invoke` command - Drive requests through a local handler set.
//!
//! Each request is admitted with RunStart and immediately completed with
//! RunFinish, so every iteration after the first resumes a paused sandbox.

use std::time::Instant;

use lambdaward_core::{ConfigLoader, FunctionName, HandlerSet, HandlerStatus, StatsSnapshot};
use serde::Serialize;

#[derive(Serialize)]
struct Report {
    handlers: Vec<HandlerStatus>,
    stats: StatsSnapshot,
}

pub async fn execute(
    config_path: &str,
    function: &str,
    count: u32,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_file(config_path)?;
    let name = FunctionName::new(function)?;
    let set = HandlerSet::local(config, None)?;
    let handler = set.get(&name);

    tracing::info!(
        function = %name,
        worker_dir = %set.config().worker_dir.display(),
        count,
        "Invoking function"
    );

    for i in 1..=count {
        let started = Instant::now();
        let channel = handler.run_start().await?;
        let admitted_ms = started.elapsed().as_secs_f64() * 1000.0;

        if !json {
            println!(
                "request {:>3}: admitted in {:>8.2}ms via {}",
                i,
                admitted_ms,
                channel.socket_path().display()
            );
        }

        handler.run_finish().await;
    }

    let report = Report {
        handlers: set.dump(),
        stats: set.stats(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!("{:<24} {:<14} {:>8} {:>12}", "FUNCTION", "STATE", "RUNNERS", "USAGE (KiB)");
    for row in &report.handlers {
        println!(
            "{:<24} {:<14} {:>8} {:>12}",
            row.name.as_str(),
            row.state.to_string(),
            row.runners,
            row.usage_kb
        );
    }
    println!();
    println!(
        "handler hits: {}  import hits: {}  misses: {}",
        report.stats.handler_hits, report.stats.import_hits, report.stats.misses
    );

    Ok(())
}
