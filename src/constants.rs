// certwatch - Leaf X.509 certificate monitor
// Copyright (C) 2025 Marc Rivero (@seifreed)
// Licensed under GPL-3.0

//! Monitor Constants
//!
//! Centralized thresholds, limits and OID tables used by the scanner,
//! the classification rules and the metrics exporter.

use std::time::Duration;

// =============================================================================
// Directory Walk
// =============================================================================

/// Subdirectory names (compared case-insensitively) whose whole subtree is
/// never scanned nor watched.
pub const SKIPPED_SUBTREES: &[&str] = &["old", "working"];

/// Returns true when a directory with this name must be skipped during walks.
pub fn is_skipped_subtree(name: &str) -> bool {
    SKIPPED_SUBTREES
        .iter()
        .any(|skipped| skipped.eq_ignore_ascii_case(name))
}

/// File extensions (lowercase, without the dot) holding PEM encoded certificates.
pub const PEM_EXTENSIONS: &[&str] = &["pem", "crt", "cer"];

/// File extensions (lowercase, without the dot) holding a single DER certificate.
pub const DER_EXTENSIONS: &[&str] = &["der"];

// =============================================================================
// Failure Backoff
// =============================================================================

/// Delay applied on the first failure of a directory.
pub const BACKOFF_BASE_DELAY: Duration = Duration::from_secs(30);

/// Upper bound of the doubled delay, before jitter is added.
pub const BACKOFF_MAX_DELAY: Duration = Duration::from_secs(10 * 60);

/// Exclusive upper bound of the random jitter added to every delay.
pub const BACKOFF_MAX_JITTER: Duration = Duration::from_secs(10);

// =============================================================================
// Metric Labels
// =============================================================================

/// Maximum number of SAN entries exported in the `sans` label.
pub const MAX_SANS_EXPORTED: usize = 10;

/// Maximum label length in characters; longer values are truncated.
pub const MAX_LABEL_LENGTH: usize = 120;

/// Node label used when no host name can be determined.
pub const UNKNOWN_NODE: &str = "unknown";

// =============================================================================
// Watcher
// =============================================================================

/// Quiet period after the last configuration file event before it is reloaded.
pub const CONFIG_DEBOUNCE: Duration = Duration::from_secs(2);

// =============================================================================
// HTTP Server
// =============================================================================

/// Time the HTTP server is given to finish in-flight requests on shutdown.
pub const SERVER_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// =============================================================================
// Classification
// =============================================================================

/// RSA keys shorter than this many bits are weak.
pub const MIN_RSA_KEY_BITS: usize = 2048;

/// EC keys shorter than this many bits are weak.
pub const MIN_EC_KEY_BITS: usize = 256;

/// Signature algorithm OIDs considered deprecated, with a display name.
pub const DEPRECATED_SIGNATURE_OIDS: &[(&str, &str)] = &[
    ("1.2.840.113549.1.1.4", "MD5-RSA"),
    ("1.2.840.113549.1.1.5", "SHA1-RSA"),
    ("1.2.840.10040.4.3", "DSA-SHA1"),
    ("1.2.840.10045.4.1", "ECDSA-SHA1"),
];

/// Named curve OIDs and the field size of the curve in bits.
pub const NAMED_CURVE_BITS: &[(&str, usize)] = &[
    ("1.2.840.10045.3.1.1", 192), // secp192r1
    ("1.3.132.0.33", 224),        // secp224r1
    ("1.2.840.10045.3.1.7", 256), // prime256v1
    ("1.3.132.0.10", 256),        // secp256k1
    ("1.3.132.0.34", 384),        // secp384r1
    ("1.3.132.0.35", 521),        // secp521r1
];

/// Issuer substring matched (case-insensitively) for issuer code 30.
pub const ISSUER_DIGICERT: &str = "digicert";

/// Issuer substring matched (case-insensitively) for issuer code 31.
pub const ISSUER_AMAZON: &str = "amazon";

// =============================================================================
// Configuration Defaults
// =============================================================================

pub const DEFAULT_CERT_DIR: &str = "./certs";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_NUM_WORKERS: usize = 4;
pub const DEFAULT_EXPIRY_THRESHOLD_DAYS: u32 = 45;
pub const DEFAULT_CACHE_FILE: &str = "/var/lib/certwatch/cache.json";

/// Allowed worker count range.
pub const MAX_NUM_WORKERS: usize = 100;

/// Allowed expiry threshold range, in days.
pub const MAX_EXPIRY_THRESHOLD_DAYS: u32 = 365;
