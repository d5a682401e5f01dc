// Certificate handling - leaf extraction and classification

pub mod classify;
pub mod parser;

#[cfg(test)]
pub(crate) mod fixtures;

pub use classify::{Classifier, IssuerCode, LeafCertificateFact};
pub use parser::{
    CertificateFormat, KeyAlgorithm, ParsedCertificate, PublicKeyInfo, extract_leaf,
    extract_leaf_with,
};
