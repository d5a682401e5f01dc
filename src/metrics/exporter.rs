// Prometheus exporter for certificate metrics

use super::{CertificateLabels, MetricsSink};
use crate::certificates::LeafCertificateFact;
use crate::error::{CertWatchError, Result};
use chrono::{DateTime, Utc};
use prometheus::{
    Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder, register_gauge_vec_with_registry, register_gauge_with_registry,
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry,
};
use std::path::Path;
use std::time::Duration;

const CERT_LABELS: &[&str] = &["common_name", "filename"];
const FILES_TOTAL: &str = "ssl_cert_files_total";
const CERTS_PARSED_TOTAL: &str = "ssl_certs_parsed_total";
const PARSE_ERRORS_TOTAL: &str = "ssl_cert_parse_errors_total";

/// Counter totals summed over every label set, as reported by `/healthz`
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct ScanTotals {
    pub cert_files_total: f64,
    pub certs_parsed_total: f64,
    pub cert_parse_errors_total: f64,
}
const DIR_LABEL: &[&str] = &["dir"];

/// Certificate metrics registered on a private registry
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    expiration: GaugeVec,
    not_before: GaugeVec,
    san_count: GaugeVec,
    info: GaugeVec,
    expiring_soon: GaugeVec,
    issuer_info: GaugeVec,
    duplicate_count: GaugeVec,
    issuer_code: GaugeVec,
    parse_errors: IntCounterVec,
    files_total: IntCounterVec,
    certs_parsed: IntCounterVec,
    last_scan: GaugeVec,
    last_reload: Gauge,
    scan_duration: HistogramVec,
    labels_truncated: IntCounter,
    weak_keys: IntCounterVec,
    deprecated_sigalgs: IntCounterVec,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let metrics = Self {
            expiration: register_gauge_vec_with_registry!(
                Opts::new(
                    "ssl_cert_expiration_timestamp",
                    "Expiration time of SSL cert (Unix timestamp)"
                ),
                CERT_LABELS,
                registry
            )?,
            not_before: register_gauge_vec_with_registry!(
                Opts::new(
                    "ssl_cert_not_before_timestamp",
                    "Not-before time of SSL cert (Unix timestamp)"
                ),
                CERT_LABELS,
                registry
            )?,
            san_count: register_gauge_vec_with_registry!(
                Opts::new("ssl_cert_san_count", "Number of SAN entries in cert"),
                CERT_LABELS,
                registry
            )?,
            info: register_gauge_vec_with_registry!(
                Opts::new(
                    "ssl_cert_info",
                    "Static info for cert including CN and SANs"
                ),
                &["common_name", "filename", "sans"],
                registry
            )?,
            expiring_soon: register_gauge_vec_with_registry!(
                Opts::new(
                    "ssl_cert_expiring_within_45d",
                    "1 if cert expires within configured threshold"
                ),
                &["common_name", "filename", "node", "duplicate_count"],
                registry
            )?,
            issuer_info: register_gauge_vec_with_registry!(
                Opts::new("ssl_cert_issuer_info", "Static info for cert issuer"),
                &["issuer_common_name", "common_name", "filename"],
                registry
            )?,
            duplicate_count: register_gauge_vec_with_registry!(
                Opts::new("ssl_cert_duplicate_count", "Number of times a cert appears"),
                CERT_LABELS,
                registry
            )?,
            issuer_code: register_gauge_vec_with_registry!(
                Opts::new(
                    "ssl_cert_issuer_code",
                    "Numeric issuer code (30=digicert, 31=amazon, 32=other, 33=self-signed)"
                ),
                CERT_LABELS,
                registry
            )?,
            parse_errors: register_int_counter_vec_with_registry!(
                Opts::new(PARSE_ERRORS_TOTAL, "Number of cert parse errors"),
                &["filename"],
                registry
            )?,
            files_total: register_int_counter_vec_with_registry!(
                Opts::new(FILES_TOTAL, "Total number of certificate files processed"),
                DIR_LABEL,
                registry
            )?,
            certs_parsed: register_int_counter_vec_with_registry!(
                Opts::new(
                    CERTS_PARSED_TOTAL,
                    "Total number of individual certificates successfully parsed"
                ),
                DIR_LABEL,
                registry
            )?,
            last_scan: register_gauge_vec_with_registry!(
                Opts::new(
                    "ssl_cert_last_scan_timestamp",
                    "Unix timestamp of the last scan of a certificate directory"
                ),
                DIR_LABEL,
                registry
            )?,
            last_reload: register_gauge_with_registry!(
                Opts::new(
                    "ssl_cert_last_reload_timestamp",
                    "Unix timestamp of the last completed scan pass"
                ),
                registry
            )?,
            scan_duration: register_histogram_vec_with_registry!(
                HistogramOpts::new(
                    "ssl_cert_scan_duration_seconds",
                    "Duration of certificate directory scans in seconds"
                ),
                DIR_LABEL,
                registry
            )?,
            labels_truncated: register_int_counter_with_registry!(
                Opts::new(
                    "ssl_cert_labels_truncated_total",
                    "Number of times a label value was truncated"
                ),
                registry
            )?,
            weak_keys: register_int_counter_vec_with_registry!(
                Opts::new(
                    "ssl_cert_weak_key_total",
                    "Total number of certificates detected with weak keys"
                ),
                CERT_LABELS,
                registry
            )?,
            deprecated_sigalgs: register_int_counter_vec_with_registry!(
                Opts::new(
                    "ssl_cert_deprecated_sigalg_total",
                    "Total number of certificates with deprecated signature algorithms"
                ),
                CERT_LABELS,
                registry
            )?,
            registry,
        };

        let build_info = register_gauge_vec_with_registry!(
            Opts::new(
                "ssl_cert_monitor_build_info",
                "Build information of the certificate monitor"
            ),
            &["version"],
            metrics.registry
        )?;
        build_info
            .with_label_values(&[env!("CARGO_PKG_VERSION")])
            .set(1.0);

        Ok(metrics)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Content type of [`render`](Self::render) output
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }

    /// Register process CPU, memory and file descriptor metrics
    #[cfg(target_os = "linux")]
    pub fn enable_process_metrics(&self) -> Result<()> {
        let collector = prometheus::process_collector::ProcessCollector::for_self();
        self.registry.register(Box::new(collector))?;
        tracing::info!("Runtime metrics enabled");
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn enable_process_metrics(&self) -> Result<()> {
        tracing::warn!("Runtime metrics are only available on Linux");
        Ok(())
    }

    /// Sum the file, parse and error counters straight from the registry
    pub fn scan_totals(&self) -> ScanTotals {
        let mut totals = ScanTotals::default();
        for family in self.registry.gather() {
            let slot = match family.get_name() {
                FILES_TOTAL => &mut totals.cert_files_total,
                CERTS_PARSED_TOTAL => &mut totals.certs_parsed_total,
                PARSE_ERRORS_TOTAL => &mut totals.cert_parse_errors_total,
                _ => continue,
            };
            *slot += family
                .get_metric()
                .iter()
                .map(|m| m.get_counter().get_value())
                .sum::<f64>();
        }
        totals
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| CertWatchError::Other(e.to_string()))
    }
}

fn dir_label(dir: &Path) -> String {
    dir.to_string_lossy().into_owned()
}

impl MetricsSink for PrometheusMetrics {
    fn reset(&self) {
        self.expiration.reset();
        self.not_before.reset();
        self.san_count.reset();
        self.info.reset();
        self.expiring_soon.reset();
        self.issuer_info.reset();
        self.duplicate_count.reset();
        self.issuer_code.reset();
        self.parse_errors.reset();
        self.files_total.reset();
        self.certs_parsed.reset();
    }

    fn observe_certificate(&self, fact: &LeafCertificateFact, labels: &CertificateLabels) {
        let cn = labels.common_name.as_str();
        let file = labels.filename.as_str();

        self.expiration
            .with_label_values(&[cn, file])
            .set(fact.not_after.timestamp() as f64);
        self.not_before
            .with_label_values(&[cn, file])
            .set(fact.not_before.timestamp() as f64);
        self.san_count
            .with_label_values(&[cn, file])
            .set(fact.sans.len() as f64);
        self.info
            .with_label_values(&[cn, file, labels.sans.as_str()])
            .set(1.0);
        self.issuer_info
            .with_label_values(&[labels.issuer.as_str(), cn, file])
            .set(1.0);
        self.duplicate_count
            .with_label_values(&[cn, file])
            .set(fact.duplicate_count as f64);
        self.issuer_code
            .with_label_values(&[cn, file])
            .set(f64::from(fact.issuer_code.code()));

        if fact.expiring_soon {
            let duplicates = fact.duplicate_count.to_string();
            self.expiring_soon
                .with_label_values(&[cn, file, labels.node.as_str(), duplicates.as_str()])
                .set(1.0);
        }
    }

    fn record_weak_key(&self, labels: &CertificateLabels) {
        self.weak_keys
            .with_label_values(&[labels.common_name.as_str(), labels.filename.as_str()])
            .inc();
    }

    fn record_deprecated_signature(&self, labels: &CertificateLabels) {
        self.deprecated_sigalgs
            .with_label_values(&[labels.common_name.as_str(), labels.filename.as_str()])
            .inc();
    }

    fn record_file_seen(&self, dir: &Path) {
        self.files_total
            .with_label_values(&[dir_label(dir).as_str()])
            .inc();
    }

    fn record_cert_parsed(&self, dir: &Path) {
        self.certs_parsed
            .with_label_values(&[dir_label(dir).as_str()])
            .inc();
    }

    fn record_parse_error(&self, file: &Path) {
        self.parse_errors
            .with_label_values(&[dir_label(file).as_str()])
            .inc();
    }

    fn record_scan_duration(&self, dir: &Path, elapsed: Duration) {
        self.scan_duration
            .with_label_values(&[dir_label(dir).as_str()])
            .observe(elapsed.as_secs_f64());
    }

    fn record_last_scan(&self, dir: &Path, at: DateTime<Utc>) {
        self.last_scan
            .with_label_values(&[dir_label(dir).as_str()])
            .set(at.timestamp() as f64);
    }

    fn record_label_truncated(&self) {
        self.labels_truncated.inc();
    }

    fn record_reload_completed(&self, at: DateTime<Utc>) {
        self.last_reload.set(at.timestamp() as f64);
    }
}
