// Certificate Scanner - worker pool over the configured certificate directories
//
// One consumer loop waits on the reload signal and runs a full pass per signal.
// A pass feeds every root directory into a bounded job queue drained by
// `num_workers` workers; each worker scans one directory at a time on the
// blocking pool. Unchanged files are skipped via the cache, failing
// directories are backed off.

use super::backoff::BackoffTracker;
use super::reload::{ReloadCoordinator, ReloadReceiver, reload_channel};
use crate::cache::CertCache;
use crate::certificates::{CertificateFormat, Classifier, LeafCertificateFact, extract_leaf_with};
use crate::config::{ConfigHandle, MonitorConfig};
use crate::constants::{UNKNOWN_NODE, is_skipped_subtree};
use crate::error::CertificateError;
use crate::metrics::{LabelSanitizer, MetricsSink};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

/// Outcome of scanning one root directory
#[derive(Debug, Default, Clone)]
pub struct DirectoryReport {
    /// Directory was still backed off and not touched
    pub skipped: bool,
    /// A directory-level failure was registered with the backoff tracker
    pub failed: bool,
    /// Lowercase hex fingerprint to occurrences within this scan
    pub duplicates: HashMap<String, usize>,
    pub facts: Vec<LeafCertificateFact>,
    pub files_seen: usize,
    pub files_unchanged: usize,
    pub certs_parsed: usize,
    pub parse_failures: usize,
}

/// Result of a full scan pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Completed,
    Cancelled,
}

pub struct CertScanner {
    config: ConfigHandle,
    cache: Arc<CertCache>,
    backoff: BackoffTracker,
    metrics: Arc<dyn MetricsSink>,
    reload: ReloadCoordinator,
    receiver: Mutex<Option<ReloadReceiver>>,
    node: String,
    last_pass: RwLock<Option<DateTime<Utc>>>,
}

impl CertScanner {
    pub fn new(config: ConfigHandle, cache: Arc<CertCache>, metrics: Arc<dyn MetricsSink>) -> Self {
        let (reload, receiver) = reload_channel();
        Self {
            config,
            cache,
            backoff: BackoffTracker::new(),
            metrics,
            reload,
            receiver: Mutex::new(Some(receiver)),
            node: node_name(),
            last_pass: RwLock::new(None),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffTracker) -> Self {
        self.backoff = backoff;
        self
    }

    /// Override the `node` label value
    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = node.into();
        self
    }

    pub fn cache(&self) -> &Arc<CertCache> {
        &self.cache
    }

    pub fn backoff(&self) -> &BackoffTracker {
        &self.backoff
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Handle for components that request passes (the watcher)
    pub fn reload_coordinator(&self) -> ReloadCoordinator {
        self.reload.clone()
    }

    /// Request a pass; coalesced with any pass already pending
    pub fn trigger_reload(&self) -> bool {
        self.reload.trigger()
    }

    /// Completion time of the last full pass
    pub fn last_pass_completed(&self) -> Option<DateTime<Utc>> {
        *self.last_pass.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consume reload signals until cancelled, running one pass per signal.
    ///
    /// Only the first call gets the receiver; later calls return immediately.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut receiver) = receiver else {
            tracing::warn!("Scanner loop already running");
            return;
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Shutdown requested, stopping scanner");
                    break;
                }
                signal = receiver.recv() => {
                    if signal.is_none() {
                        tracing::info!("Reload channel closed, stopping scanner");
                        break;
                    }
                    if self.perform_pass(&cancel).await == PassOutcome::Cancelled {
                        break;
                    }
                }
            }
        }

        tracing::info!("Scanner loop shut down");
    }

    /// Run one full pass over every configured directory
    pub async fn perform_pass(self: &Arc<Self>, cancel: &CancellationToken) -> PassOutcome {
        let config = self.config.get();

        if !config.dry_run {
            self.metrics.reset();
        }
        if config.clear_cache_on_reload {
            self.cache.clear();
        }

        tracing::info!(
            dirs = config.cert_dirs.len(),
            workers = config.num_workers,
            "Reload triggered, launching worker pool"
        );

        let (job_tx, job_rx) = mpsc::channel::<PathBuf>(config.cert_dirs.len().max(1));
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));
        let worker_cancel = cancel.child_token();

        let mut workers = JoinSet::new();
        for worker_id in 0..config.num_workers.max(1) {
            workers.spawn(Arc::clone(self).worker(
                worker_id,
                Arc::clone(&job_rx),
                worker_cancel.clone(),
            ));
        }

        for dir in &config.cert_dirs {
            tokio::select! {
                biased;
                _ = worker_cancel.cancelled() => {
                    tracing::info!("Shutdown requested while queuing directory jobs");
                    return PassOutcome::Cancelled;
                }
                sent = job_tx.send(dir.clone()) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        drop(job_tx);

        let finished = tokio::select! {
            _ = worker_cancel.cancelled() => false,
            _ = async {
                while let Some(joined) = workers.join_next().await {
                    if let Err(e) = joined {
                        tracing::error!("Scan worker failed: {}", e);
                    }
                }
            } => true,
        };

        if !finished {
            tracing::warn!("Shutdown requested while waiting for workers, abandoning pass");
            return PassOutcome::Cancelled;
        }

        tracing::info!("All workers completed leaf certificate processing");

        let cache = Arc::clone(&self.cache);
        let housekeeping = tokio::task::spawn_blocking(move || {
            let removed = cache.prune_non_existing();
            cache.save();
            removed
        })
        .await;
        match housekeeping {
            Ok(removed) if removed > 0 => {
                tracing::info!(removed_cache_entries = removed, "Cache pruned after scan");
            }
            Ok(_) => {}
            Err(e) => tracing::error!("Cache housekeeping failed: {}", e),
        }
        self.backoff.clear_expired();

        let now = Utc::now();
        *self.last_pass.write().unwrap_or_else(PoisonError::into_inner) = Some(now);
        if !config.dry_run {
            self.metrics.record_reload_completed(now);
        }

        PassOutcome::Completed
    }

    async fn worker(
        self: Arc<Self>,
        worker_id: usize,
        jobs: Arc<tokio::sync::Mutex<mpsc::Receiver<PathBuf>>>,
        cancel: CancellationToken,
    ) {
        loop {
            if cancel.is_cancelled() {
                tracing::info!(worker = worker_id, "Worker cancelled, stopping");
                return;
            }

            let next = jobs.lock().await.recv().await;
            let Some(dir) = next else {
                return;
            };

            if cancel.is_cancelled() {
                tracing::info!(worker = worker_id, "Worker cancelled, stopping");
                return;
            }

            tracing::info!(
                worker = worker_id,
                dir = %dir.display(),
                "Worker processing certificate directory"
            );

            let scanner = Arc::clone(&self);
            if let Err(e) =
                tokio::task::spawn_blocking(move || scanner.process_directory(&dir, false)).await
            {
                tracing::error!(worker = worker_id, "Directory scan panicked: {}", e);
            }
        }
    }

    /// Scan one directory synchronously and return fingerprint -> occurrences.
    ///
    /// Used directly for one-shot and dry-run invocations.
    pub fn process_directory(&self, dir: &Path, dry_run: bool) -> HashMap<String, usize> {
        self.scan_directory(dir, dry_run).duplicates
    }

    /// Same as [`process_directory`](Self::process_directory), returning the full report
    pub fn scan_directory(&self, dir: &Path, dry_run: bool) -> DirectoryReport {
        let config = self.config.get();
        let sink = self.metrics_writer(dry_run, &config);
        let mut report = DirectoryReport::default();

        if !dry_run && sink.is_none() {
            tracing::info!(dir = %dir.display(), "Dry-run mode active, metric writes are disabled");
        }

        if self.backoff.should_skip(dir) {
            tracing::warn!(dir = %dir.display(), "Skipping scan due to backoff");
            report.skipped = true;
            return report;
        }

        let start = Instant::now();

        let is_dir = fs::metadata(dir).map(|m| m.is_dir()).unwrap_or(false);
        if is_dir {
            self.walk_directory(dir, &config, sink, &mut report);
            if let Some(metrics) = sink {
                metrics.record_last_scan(dir, Utc::now());
            }
        } else {
            tracing::warn!(dir = %dir.display(), "Skipping non-directory");
            self.backoff.register_failure(dir);
            report.failed = true;
        }

        if let Some(metrics) = sink {
            metrics.record_scan_duration(dir, start.elapsed());
        }

        tracing::debug!(
            dir = %dir.display(),
            files = report.files_seen,
            unchanged = report.files_unchanged,
            parsed = report.certs_parsed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Directory scan finished"
        );

        report
    }

    fn metrics_writer(&self, dry_run: bool, config: &MonitorConfig) -> Option<&dyn MetricsSink> {
        if dry_run || config.dry_run {
            None
        } else {
            Some(self.metrics.as_ref())
        }
    }

    fn walk_directory(
        &self,
        dir: &Path,
        config: &MonitorConfig,
        sink: Option<&dyn MetricsSink>,
        report: &mut DirectoryReport,
    ) {
        let root = std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf());

        let walker = WalkDir::new(&root).into_iter().filter_entry(|entry| {
            let skip = entry.depth() > 0
                && entry.file_type().is_dir()
                && entry.file_name().to_str().is_some_and(is_skipped_subtree);
            if skip {
                tracing::info!(dir = %entry.path().display(), "Skipping subdirectory");
            }
            !skip
        });

        self.walk_entries(dir, walker, config, sink, report);
    }

    /// Process walked entries; any walk error marks the directory failed
    /// after the remaining entries are handled.
    fn walk_entries<I>(
        &self,
        dir: &Path,
        entries: I,
        config: &MonitorConfig,
        sink: Option<&dyn MetricsSink>,
        report: &mut DirectoryReport,
    ) where
        I: IntoIterator<Item = walkdir::Result<walkdir::DirEntry>>,
    {
        let classifier = Classifier::new(config.expiry_threshold_days);
        let labels = LabelSanitizer::new(sink);
        let mut walk_failed = false;

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), "Directory walk error: {}", e);
                    walk_failed = true;
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                continue;
            }
            let Some(format) = CertificateFormat::from_path(entry.path()) else {
                continue;
            };

            self.process_file(dir, entry.path(), format, &classifier, &labels, sink, config, report);
        }

        if walk_failed {
            self.backoff.register_failure(dir);
            report.failed = true;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_file(
        &self,
        dir: &Path,
        path: &Path,
        format: CertificateFormat,
        classifier: &Classifier,
        labels: &LabelSanitizer<'_>,
        sink: Option<&dyn MetricsSink>,
        config: &MonitorConfig,
        report: &mut DirectoryReport,
    ) {
        let (cached, stat) = match self.cache.get_entry_atomic(path) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(file = %path.display(), "Cannot stat certificate file: {}", e);
                if let Some(metrics) = sink {
                    metrics.record_parse_error(path);
                }
                report.parse_failures += 1;
                return;
            }
        };

        report.files_seen += 1;
        if let Some(metrics) = sink {
            metrics.record_file_seen(dir);
        }

        if let Some(entry) = cached
            && entry.is_unchanged(&stat)
        {
            tracing::debug!(file = %path.display(), "Certificate unchanged, skipping");
            report.files_unchanged += 1;
            return;
        }

        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(file = %path.display(), "Failed to read certificate file: {}", e);
                if let Some(metrics) = sink {
                    metrics.record_parse_error(path);
                }
                report.parse_failures += 1;
                return;
            }
        };

        let mut rejected_blocks = 0;
        let extracted = extract_leaf_with(&raw, format, |e| {
            tracing::warn!(file = %path.display(), "PEM parse error: {}", e);
            rejected_blocks += 1;
            if let Some(metrics) = sink {
                metrics.record_parse_error(path);
            }
        });
        report.parse_failures += rejected_blocks;

        let leaf = match extracted {
            Ok(leaf) => leaf,
            Err(CertificateError::NoValidCertificate) => {
                tracing::warn!(file = %path.display(), "No valid certificate found");
                if rejected_blocks == 0 {
                    if let Some(metrics) = sink {
                        metrics.record_parse_error(path);
                    }
                    report.parse_failures += 1;
                }
                return;
            }
            Err(e) => {
                tracing::warn!(file = %path.display(), "Failed to parse certificate: {}", e);
                if let Some(metrics) = sink {
                    metrics.record_parse_error(path);
                }
                report.parse_failures += 1;
                return;
            }
        };

        report.certs_parsed += 1;
        if let Some(metrics) = sink {
            metrics.record_cert_parsed(dir);
        }

        let fingerprint = leaf.fingerprint();
        let occurrences = report
            .duplicates
            .entry(hex::encode(fingerprint))
            .or_insert(0);
        *occurrences += 1;

        let fact = classifier.classify(&leaf, path, fingerprint, *occurrences);
        self.emit(&fact, labels, sink, config);

        self.cache.set_entry_atomic(path, fingerprint, stat);
        report.facts.push(fact);
    }

    fn emit(
        &self,
        fact: &LeafCertificateFact,
        labels: &LabelSanitizer<'_>,
        sink: Option<&dyn MetricsSink>,
        config: &MonitorConfig,
    ) {
        if let Some(metrics) = sink {
            let labels = labels.labels(fact, &self.node);
            metrics.observe_certificate(fact, &labels);

            if config.enable_weak_crypto_metrics {
                if fact.weak_key {
                    metrics.record_weak_key(&labels);
                }
                if fact.deprecated_sig_alg {
                    metrics.record_deprecated_signature(&labels);
                }
            }
        }

        if fact.expiring_soon {
            tracing::warn!(
                file = %fact.path.display(),
                cn = %fact.common_name,
                not_after = %fact.not_after.to_rfc3339(),
                "Leaf certificate expiring soon"
            );
        }
        if fact.weak_key {
            tracing::warn!(file = %fact.path.display(), cn = %fact.common_name, "Weak key detected");
        }
        if fact.deprecated_sig_alg {
            tracing::warn!(
                file = %fact.path.display(),
                cn = %fact.common_name,
                "Deprecated signature algorithm detected"
            );
        }

        tracing::info!(
            file = %fact.path.display(),
            cn = %fact.common_name,
            issuer = %fact.issuer_common_name,
            not_before = %fact.not_before.to_rfc3339(),
            not_after = %fact.not_after.to_rfc3339(),
            sans = fact.sans.len(),
            duplicates = fact.duplicate_count,
            issuer_code = fact.issuer_code.code(),
            "Parsed leaf certificate"
        );
    }
}

/// Host name for the `node` label
fn node_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .or_else(|| {
            fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| UNKNOWN_NODE.to_string())
}
