// Metrics Server - HTTP surface for scrapes and operators
//
// GET /metrics  Prometheus text exposition
// GET /healthz  readiness of the configured certificate directories
// GET /certs    leaf summary for every path in the cache table
//
// Served over TLS when a certificate and key are configured.

use crate::certificates::classify::is_expiring_soon;
use crate::certificates::{CertificateFormat, extract_leaf};
use crate::config::ConfigHandle;
use crate::constants::SERVER_SHUTDOWN_GRACE;
use crate::error::{CertWatchError, Result};
use crate::metrics::{PrometheusMetrics, ScanTotals};
use crate::monitor::CertScanner;
use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use axum_server::tls_rustls::RustlsConfig;
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Shared handler state
pub struct ServerState {
    pub config: ConfigHandle,
    pub metrics: PrometheusMetrics,
    pub scanner: Arc<CertScanner>,
}

/// Health report returned by `/healthz`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub cert_dirs: Vec<DirectoryCheck>,
    /// Unset log file means stdout, which is always writable
    pub log_file_writable: bool,
    pub workers: usize,
    pub cache_entries: usize,
    pub last_pass: Option<String>,
    #[serde(flatten)]
    pub totals: ScanTotals,
}

#[derive(Debug, Serialize)]
pub struct DirectoryCheck {
    pub path: PathBuf,
    pub readable: bool,
}

const LEAF_CERTIFICATE: &str = "leaf_certificate";

/// One `/certs` entry. Unreadable entries carry only `path` and `error`.
#[derive(Debug, Default, Serialize)]
pub struct CertificateSummary {
    pub path: PathBuf,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiring_soon: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sans: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CertificateSummary {
    /// Re-read `path` and summarise its leaf certificate against the
    /// expiry threshold in days
    pub fn describe(path: &Path, threshold_days: u32) -> Self {
        let mut summary = Self {
            path: path.to_path_buf(),
            ..Self::default()
        };

        let Some(format) = CertificateFormat::from_path(path) else {
            summary.error = Some("unsupported file extension".to_string());
            return summary;
        };

        let parsed = fs::read(path)
            .map_err(|e| CertWatchError::io(path, e))
            .and_then(|raw| extract_leaf(&raw, format).map_err(CertWatchError::from));

        match parsed {
            Ok(cert) => {
                summary.kind = Some(LEAF_CERTIFICATE);
                summary.common_name = Some(cert.subject_cn);
                summary.issuer = Some(cert.issuer_cn);
                summary.not_before = Some(cert.not_before.to_rfc3339());
                summary.not_after = Some(cert.not_after.to_rfc3339());
                summary.expiring_soon =
                    Some(is_expiring_soon(cert.not_after, Utc::now(), threshold_days));
                summary.sans = cert.dns_names;
            }
            Err(e) => summary.error = Some(e.to_string()),
        }
        summary
    }
}

/// Metrics/health HTTP server
pub struct MetricsServer {
    state: Arc<ServerState>,
}

impl MetricsServer {
    pub fn new(config: ConfigHandle, metrics: PrometheusMetrics, scanner: Arc<CertScanner>) -> Self {
        Self {
            state: Arc::new(ServerState {
                config,
                metrics,
                scanner,
            }),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(health_handler))
            .route("/certs", get(certs_handler))
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until `cancel` fires
    pub async fn serve(self, cancel: CancellationToken) -> Result<()> {
        let config = self.state.config.get();
        let addr = config.listen_address();
        if let Some((cert, key)) = config.tls_files() {
            return self.serve_tls(&addr, cert, key, cancel).await;
        }

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| CertWatchError::Other(format!("Failed to bind {}: {}", addr, e)))?;

        tracing::info!("Metrics server listening on {}", addr);
        tracing::info!("Metrics endpoint: http://{}/metrics", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| CertWatchError::Other(format!("HTTP server error: {}", e)))?;

        tracing::info!("Metrics server stopped");
        Ok(())
    }

    async fn serve_tls(
        self,
        addr: &str,
        cert: &Path,
        key: &Path,
        cancel: CancellationToken,
    ) -> Result<()> {
        // Already installed is fine, any process-wide provider will do.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let tls = RustlsConfig::from_pem_file(cert, key).await.map_err(|e| {
            CertWatchError::Other(format!(
                "Failed to load TLS certificate {} and key {}: {}",
                cert.display(),
                key.display(),
                e
            ))
        })?;

        let socket: SocketAddr = tokio::net::lookup_host(addr)
            .await
            .map_err(|e| CertWatchError::Other(format!("Failed to resolve {}: {}", addr, e)))?
            .next()
            .ok_or_else(|| CertWatchError::Other(format!("No address for {}", addr)))?;

        let handle = axum_server::Handle::new();
        let shutdown = handle.clone();
        let shutdown_task = tokio::spawn(async move {
            cancel.cancelled().await;
            shutdown.graceful_shutdown(Some(SERVER_SHUTDOWN_GRACE));
        });

        tracing::info!("Metrics server listening on {} (TLS)", socket);
        tracing::info!("Metrics endpoint: https://{}/metrics", socket);

        let served = axum_server::bind_rustls(socket, tls)
            .handle(handle)
            .serve(self.router().into_make_service())
            .await;
        shutdown_task.abort();

        served.map_err(|e| CertWatchError::Other(format!("HTTPS server error: {}", e)))?;
        tracing::info!("Metrics server stopped");
        Ok(())
    }
}

async fn metrics_handler(State(state): State<Arc<ServerState>>) -> Response {
    match state.metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, state.metrics.content_type())], body).into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> (StatusCode, Json<HealthResponse>) {
    let config = state.config.get();

    let mut cert_dirs = Vec::with_capacity(config.cert_dirs.len());
    for dir in &config.cert_dirs {
        cert_dirs.push(DirectoryCheck {
            path: dir.clone(),
            readable: tokio::fs::read_dir(dir).await.is_ok(),
        });
    }

    let log_file_writable = match config.log_file() {
        Some(path) => tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .await
            .is_ok(),
        None => true,
    };

    let healthy = log_file_writable && cert_dirs.iter().all(|check| check.readable);
    let response = HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        checks: HealthChecks {
            cert_dirs,
            log_file_writable,
            workers: config.num_workers,
            cache_entries: state.scanner.cache().len(),
            last_pass: state
                .scanner
                .last_pass_completed()
                .map(|at| at.to_rfc3339()),
            totals: state.metrics.scan_totals(),
        },
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

async fn certs_handler(State(state): State<Arc<ServerState>>) -> Response {
    let paths = state.scanner.cache().get_paths();
    let threshold_days = state.config.get().expiry_threshold_days;
    let listing = tokio::task::spawn_blocking(move || {
        paths
            .iter()
            .map(|path| CertificateSummary::describe(path, threshold_days))
            .collect::<Vec<_>>()
    })
    .await;

    match listing {
        Ok(summaries) => Json(summaries).into_response(),
        Err(e) => {
            tracing::error!("Certificate listing task failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
