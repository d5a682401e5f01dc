// Metrics - sink abstraction and label hygiene
//
// The scanner reports through `MetricsSink`; `PrometheusMetrics` is the exporter
// used by the daemon.

pub mod exporter;

pub use exporter::{PrometheusMetrics, ScanTotals};

use crate::certificates::LeafCertificateFact;
use crate::constants::{MAX_LABEL_LENGTH, MAX_SANS_EXPORTED};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::Duration;

/// Sanitized label values describing one certificate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateLabels {
    pub common_name: String,
    pub issuer: String,
    /// Base name of the certificate file
    pub filename: String,
    /// At most the first ten DNS SANs, comma separated
    pub sans: String,
    pub node: String,
}

/// Destination for everything the scanner observes.
///
/// Callers never invoke a sink while metric writes are disabled (dry-run).
pub trait MetricsSink: Send + Sync {
    /// Clear per-certificate and per-directory series at the start of a pass
    fn reset(&self);

    fn observe_certificate(&self, fact: &LeafCertificateFact, labels: &CertificateLabels);

    fn record_weak_key(&self, labels: &CertificateLabels);

    fn record_deprecated_signature(&self, labels: &CertificateLabels);

    fn record_file_seen(&self, dir: &Path);

    fn record_cert_parsed(&self, dir: &Path);

    fn record_parse_error(&self, file: &Path);

    fn record_scan_duration(&self, dir: &Path, elapsed: Duration);

    fn record_last_scan(&self, dir: &Path, at: DateTime<Utc>);

    fn record_label_truncated(&self);

    fn record_reload_completed(&self, at: DateTime<Utc>);
}

/// Trims and length-limits label values, counting truncations on the sink
pub struct LabelSanitizer<'a> {
    sink: Option<&'a dyn MetricsSink>,
}

impl<'a> LabelSanitizer<'a> {
    /// `sink` is `None` when metric writes are disabled
    pub fn new(sink: Option<&'a dyn MetricsSink>) -> Self {
        Self { sink }
    }

    pub fn sanitize(&self, value: &str) -> String {
        let trimmed = value.trim();
        if trimmed.chars().count() <= MAX_LABEL_LENGTH {
            return trimmed.to_string();
        }

        if let Some(sink) = self.sink {
            sink.record_label_truncated();
        }
        trimmed.chars().take(MAX_LABEL_LENGTH).collect()
    }

    /// Join the first SANs with commas, then sanitize the result
    pub fn sans(&self, names: &[String]) -> String {
        if names.is_empty() {
            return String::new();
        }
        let limit = names.len().min(MAX_SANS_EXPORTED);
        self.sanitize(&names[..limit].join(","))
    }

    pub fn labels(&self, fact: &LeafCertificateFact, node: &str) -> CertificateLabels {
        let filename = fact
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        CertificateLabels {
            common_name: self.sanitize(&fact.common_name),
            issuer: self.sanitize(&fact.issuer_common_name),
            filename: self.sanitize(&filename),
            sans: self.sans(&fact.sans),
            node: self.sanitize(node),
        }
    }
}
