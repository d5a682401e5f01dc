// CLI module - Command line interface and argument parsing
// Copyright (C) 2025 Marc Rivero (@seifreed)
// Licensed under GPL-3.0

use crate::config::MonitorConfig;
use clap::Parser;
use std::path::PathBuf;

/// certwatch - Leaf X.509 certificate monitor
///
/// Watches certificate directories, extracts the leaf certificate of every
/// PEM/DER file and exports expiry, issuer and weak-crypto facts as
/// Prometheus metrics.
///
/// Settings are layered: defaults, then the YAML file given by --config,
/// then these flags, then environment variables.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "certwatch")]
#[command(author = "Marc Rivero <mriverolopez@gmail.com>")]
#[command(version)]
#[command(about = "Leaf X.509 certificate monitor with Prometheus metrics", long_about = None)]
pub struct Args {
    /// YAML configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Certificate directory to monitor (repeatable)
    #[arg(short = 'd', long = "cert-dir", value_name = "DIR")]
    pub cert_dirs: Vec<PathBuf>,

    /// Log file (stdout when unset or in dry-run mode)
    #[arg(long = "log-file", value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// HTTP port for /metrics, /healthz and /certs
    #[arg(short = 'p', long = "port", value_name = "PORT")]
    pub port: Option<u16>,

    /// HTTP bind address
    #[arg(long = "bind-address", value_name = "ADDR")]
    pub bind_address: Option<String>,

    /// Number of scan workers
    #[arg(short = 'w', long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// Scan once without writing metrics or the cache file, then exit
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Days before expiry at which a certificate counts as expiring soon
    #[arg(long = "expiry-threshold-days", value_name = "DAYS")]
    pub expiry_threshold_days: Option<u32>,

    /// Clear the in-memory cache at the start of every scan pass
    #[arg(long = "clear-cache-on-reload")]
    pub clear_cache_on_reload: bool,

    /// Export weak key and deprecated signature counters
    #[arg(long = "enable-weak-crypto-metrics")]
    pub enable_weak_crypto_metrics: bool,

    /// Cache file (empty string disables persistence)
    #[arg(long = "cache-file", value_name = "FILE")]
    pub cache_file: Option<PathBuf>,

    /// TLS certificate for the HTTP server (requires --tls-key-file)
    #[arg(long = "tls-cert-file", value_name = "FILE")]
    pub tls_cert_file: Option<PathBuf>,

    /// TLS private key for the HTTP server (requires --tls-cert-file)
    #[arg(long = "tls-key-file", value_name = "FILE")]
    pub tls_key_file: Option<PathBuf>,

    /// Export process CPU, memory and file descriptor metrics
    #[arg(long = "enable-runtime-metrics")]
    pub enable_runtime_metrics: bool,

    /// Load and validate the configuration, then exit
    #[arg(long = "check-config")]
    pub check_config: bool,
}

impl Args {
    /// Apply flags that were given on top of `config`
    pub fn apply_to(&self, config: &mut MonitorConfig) {
        if !self.cert_dirs.is_empty() {
            config.cert_dirs = self.cert_dirs.clone();
        }
        if let Some(log_file) = &self.log_file {
            config.log_file = Some(log_file.clone());
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind_address) = &self.bind_address {
            config.bind_address = bind_address.clone();
        }
        if let Some(workers) = self.workers {
            config.num_workers = workers;
        }
        if self.dry_run {
            config.dry_run = true;
        }
        if let Some(days) = self.expiry_threshold_days {
            config.expiry_threshold_days = days;
        }
        if self.clear_cache_on_reload {
            config.clear_cache_on_reload = true;
        }
        if self.enable_weak_crypto_metrics {
            config.enable_weak_crypto_metrics = true;
        }
        if let Some(cache_file) = &self.cache_file {
            config.cache_file = Some(cache_file.clone());
        }
        if let Some(cert) = &self.tls_cert_file {
            config.tls_cert_file = Some(cert.clone());
        }
        if let Some(key) = &self.tls_key_file {
            config.tls_key_file = Some(key.clone());
        }
        if self.enable_runtime_metrics {
            config.enable_runtime_metrics = true;
        }
    }
}
