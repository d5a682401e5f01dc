// Monitoring Daemon - Main orchestration
//
// Wires the configuration handle, cache, scanner, watcher and HTTP server
// together and owns their shutdown order.

use super::scanner::CertScanner;
use super::watcher::DirectoryWatcher;
use crate::cache::CertCache;
use crate::config::{ConfigHandle, MonitorConfig};
use crate::constants::SERVER_SHUTDOWN_GRACE;
use crate::error::{CertWatchError, Result};
use crate::metrics::PrometheusMetrics;
use crate::server::MetricsServer;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Main monitoring daemon
pub struct MonitorDaemon {
    config: ConfigHandle,
    cache: Arc<CertCache>,
    metrics: PrometheusMetrics,
    scanner: Arc<CertScanner>,
}

impl MonitorDaemon {
    /// Build every component and load the persisted cache
    pub fn new(config: MonitorConfig) -> Result<Self> {
        let cache = Arc::new(CertCache::new(config.cache_path().map(Path::to_path_buf)));
        cache.load();

        let metrics = PrometheusMetrics::new()?;
        if config.enable_runtime_metrics {
            metrics.enable_process_metrics()?;
        }
        let config = ConfigHandle::new(config);
        let scanner = Arc::new(CertScanner::new(
            config.clone(),
            cache.clone(),
            Arc::new(metrics.clone()),
        ));

        Ok(Self {
            config,
            cache,
            metrics,
            scanner,
        })
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn scanner(&self) -> &Arc<CertScanner> {
        &self.scanner
    }

    pub fn metrics(&self) -> &PrometheusMetrics {
        &self.metrics
    }

    /// Run until SIGINT or SIGTERM
    pub async fn run(self) -> Result<()> {
        let cancel = CancellationToken::new();
        setup_signal_handlers(cancel.clone())?;
        self.run_until(cancel).await
    }

    /// Run until `cancel` fires or the HTTP server exits on its own
    pub async fn run_until(self, cancel: CancellationToken) -> Result<()> {
        let config = self.config.get();
        tracing::info!(
            dirs = config.cert_dirs.len(),
            workers = config.num_workers,
            node = self.scanner.node(),
            "Starting certificate monitor"
        );

        let scanner_task = tokio::spawn(self.scanner.clone().run(cancel.child_token()));

        let watcher = Arc::new(DirectoryWatcher::new(
            self.config.clone(),
            self.scanner.reload_coordinator(),
        )?);
        let watcher_tasks = watcher.start(cancel.child_token());

        let server = MetricsServer::new(self.config.clone(), self.metrics.clone(), self.scanner.clone());
        let mut server_task = tokio::spawn(server.serve(cancel.child_token()));

        self.scanner.trigger_reload();

        let early_exit = tokio::select! {
            _ = cancel.cancelled() => None,
            joined = &mut server_task => Some(joined),
        };

        tracing::info!("Shutting down certificate monitor");
        cancel.cancel();
        watcher.stop();

        let server_outcome = match early_exit {
            Some(joined) => joined,
            None => match tokio::time::timeout(SERVER_SHUTDOWN_GRACE, &mut server_task).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::warn!(
                        grace_secs = SERVER_SHUTDOWN_GRACE.as_secs(),
                        "HTTP server did not stop within grace period, aborting"
                    );
                    server_task.abort();
                    Ok(Ok(()))
                }
            },
        };

        if let Err(e) = scanner_task.await {
            tracing::error!("Scanner task failed: {}", e);
        }
        for task in watcher_tasks {
            if let Err(e) = task.await {
                tracing::error!("Watcher task failed: {}", e);
            }
        }

        let cache = self.cache.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || cache.save()).await {
            tracing::error!("Final cache save failed: {}", e);
        }

        tracing::info!("Certificate monitor stopped");
        server_outcome.map_err(|e| CertWatchError::Other(format!("HTTP server task failed: {}", e)))?
    }

    /// One-shot scan of every configured directory without metric writes or
    /// cache persistence. Returns each directory's duplicate map.
    pub async fn run_dry(&self) -> Result<Vec<(PathBuf, HashMap<String, usize>)>> {
        let scanner = self.scanner.clone();
        let dirs = self.config.get().cert_dirs.clone();

        let results = tokio::task::spawn_blocking(move || {
            dirs.into_iter()
                .map(|dir| {
                    let duplicates = scanner.process_directory(&dir, true);
                    (dir, duplicates)
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| CertWatchError::Other(format!("Dry-run scan failed: {}", e)))?;

        for (dir, duplicates) in &results {
            let mut entries: Vec<_> = duplicates.iter().collect();
            entries.sort();
            for (fingerprint, count) in entries {
                tracing::info!(
                    dir = %dir.display(),
                    fingerprint = &fingerprint[..fingerprint.len().min(16)],
                    count,
                    "Dry-run certificate"
                );
            }
            tracing::info!(
                dir = %dir.display(),
                unique = duplicates.len(),
                "Dry-run scan of directory completed"
            );
        }

        Ok(results)
    }
}

fn setup_signal_handlers(cancel: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| CertWatchError::Other(format!("Failed to setup SIGTERM handler: {}", e)))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| CertWatchError::Other(format!("Failed to setup SIGINT handler: {}", e)))?;

        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                _ = sigint.recv() => tracing::info!("Received SIGINT"),
                _ = cancel.cancelled() => return,
            }
            cancel.cancel();
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            tracing::info!("Received Ctrl+C");
            cancel.cancel();
        });
    }

    Ok(())
}
