// certwatch - Leaf X.509 certificate monitor
// Copyright (C) 2025 Marc Rivero (@seifreed)
// Licensed under GPL-3.0
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.

use anyhow::{Context, Result};
use certwatch::{Args, MonitorConfig, MonitorDaemon};
use clap::Parser;
use std::fs::{self, OpenOptions};
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Defaults < YAML file < CLI flags < environment
    let mut config = match &args.config {
        Some(path) => MonitorConfig::parse_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => MonitorConfig::default(),
    };
    args.apply_to(&mut config);
    config.apply_env_overrides(|key| std::env::var(key).ok());

    init_logging(&config)?;

    // Handle --check-config (validate and exit)
    if args.check_config {
        return match config.validate() {
            Ok(()) => {
                println!("Configuration is valid");
                println!("  cert_dirs: {:?}", config.cert_dirs);
                println!("  listen:    {}", config.listen_address());
                println!("  workers:   {}", config.num_workers);
                Ok(())
            }
            Err(e) => {
                eprintln!("Configuration is invalid: {}", e);
                std::process::exit(1);
            }
        };
    }

    config.validate().context("Invalid configuration")?;

    let dry_run = config.dry_run;
    let daemon = MonitorDaemon::new(config)?;

    if dry_run {
        info!("Running in dry-run mode, metrics and cache file are left untouched");
        daemon.run_dry().await?;
        return Ok(());
    }

    info!("certwatch v{} starting", env!("CARGO_PKG_VERSION"));
    daemon.run().await?;

    Ok(())
}

/// Initialize logging - respect RUST_LOG, default to info.
///
/// Output goes to the configured log file unless running in dry-run mode.
fn init_logging(config: &MonitorConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_file().filter(|_| !config.dry_run) {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to set subscriber: {}", e))
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to set subscriber: {}", e)),
    }
}
