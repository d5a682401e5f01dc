// Error types for certwatch
//
// Typed errors for the library surface; the binary wraps them in anyhow.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for monitor operations
#[derive(Debug, Error)]
pub enum CertWatchError {
    /// I/O failure tied to a specific path
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Invalid or unusable configuration
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Certificate decoding error
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML configuration parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Filesystem notification backend error
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

/// Certificate decoding errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CertificateError {
    /// DER structure could not be decoded as an X.509 certificate
    #[error("Failed to parse certificate: {details}")]
    Der { details: String },

    /// PEM input did not contain a single decodable CERTIFICATE block
    #[error("no valid certificate found")]
    NoValidCertificate,
}

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, CertWatchError>;

impl CertWatchError {
    /// Create an I/O error bound to a path
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Check if this error means the path does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

impl CertificateError {
    pub fn der(details: impl Into<String>) -> Self {
        Self::Der {
            details: details.into(),
        }
    }
}
