// certwatch - Leaf X.509 certificate monitor
// Copyright (C) 2025 Marc Rivero (@seifreed)
// Licensed under GPL-3.0

//! certwatch watches directories of PEM/DER certificate files, extracts the
//! leaf certificate of every file, classifies it (issuer, expiry, weak key,
//! deprecated signature) and exports the results as Prometheus metrics.

pub mod cache;
pub mod certificates;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod server;

// Re-export commonly used types
pub use crate::cache::CertCache;
pub use crate::cli::Args;
pub use crate::config::{ConfigHandle, MonitorConfig};
pub use crate::error::{CertWatchError, CertificateError, Result};
pub use crate::metrics::{MetricsSink, PrometheusMetrics};
pub use crate::monitor::{CertScanner, MonitorDaemon};
