// Certificate Classification - issuer codes, weak keys, deprecated signatures, expiry

use super::parser::{KeyAlgorithm, ParsedCertificate, PublicKeyInfo};
use crate::constants::{
    DEPRECATED_SIGNATURE_OIDS, ISSUER_AMAZON, ISSUER_DIGICERT, MIN_EC_KEY_BITS, MIN_RSA_KEY_BITS,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Issuer classification exported as a numeric gauge value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IssuerCode {
    DigiCert = 30,
    Amazon = 31,
    Other = 32,
    SelfSigned = 33,
}

impl IssuerCode {
    /// Self-signed wins over any issuer name match
    pub fn classify(subject_cn: &str, issuer_cn: &str) -> Self {
        if subject_cn.to_lowercase() == issuer_cn.to_lowercase() {
            return Self::SelfSigned;
        }

        let issuer = issuer_cn.to_lowercase();
        if issuer.contains(ISSUER_DIGICERT) {
            Self::DigiCert
        } else if issuer.contains(ISSUER_AMAZON) {
            Self::Amazon
        } else {
            Self::Other
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for IssuerCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// RSA under 2048 bits or EC under 256 bits. Other key types are never weak.
pub fn is_weak_key(key: &PublicKeyInfo) -> bool {
    match key.algorithm {
        KeyAlgorithm::Rsa => key.bits < MIN_RSA_KEY_BITS,
        KeyAlgorithm::Ec => key.bits < MIN_EC_KEY_BITS,
        KeyAlgorithm::Other => false,
    }
}

/// Display name of a deprecated signature algorithm, `None` if the OID is acceptable
pub fn deprecated_signature_name(oid: &str) -> Option<&'static str> {
    DEPRECATED_SIGNATURE_OIDS
        .iter()
        .find(|(deprecated, _)| *deprecated == oid)
        .map(|(_, name)| *name)
}

pub fn is_deprecated_signature(oid: &str) -> bool {
    deprecated_signature_name(oid).is_some()
}

/// `not_after - now <= threshold`. Already expired certificates are flagged too.
pub fn is_expiring_soon(not_after: DateTime<Utc>, now: DateTime<Utc>, threshold_days: u32) -> bool {
    not_after - now <= Duration::days(i64::from(threshold_days))
}

/// Derived facts about one scanned leaf certificate. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeafCertificateFact {
    pub path: PathBuf,
    pub common_name: String,
    pub issuer_common_name: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub sans: Vec<String>,
    #[serde(serialize_with = "serialize_fingerprint")]
    pub fingerprint: [u8; 32],
    pub weak_key: bool,
    pub deprecated_sig_alg: bool,
    pub issuer_code: IssuerCode,
    pub expiring_soon: bool,
    /// Occurrences of this fingerprint in the current directory pass, this one included
    pub duplicate_count: usize,
}

impl LeafCertificateFact {
    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.fingerprint)
    }
}

fn serialize_fingerprint<S>(fingerprint: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&hex::encode(fingerprint))
}

/// Applies the classification rules against a fixed point in time
#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    now: DateTime<Utc>,
    threshold_days: u32,
}

impl Classifier {
    pub fn new(threshold_days: u32) -> Self {
        Self::at(Utc::now(), threshold_days)
    }

    pub fn at(now: DateTime<Utc>, threshold_days: u32) -> Self {
        Self {
            now,
            threshold_days,
        }
    }

    pub fn classify(
        &self,
        cert: &ParsedCertificate,
        path: &Path,
        fingerprint: [u8; 32],
        duplicate_count: usize,
    ) -> LeafCertificateFact {
        LeafCertificateFact {
            path: path.to_path_buf(),
            common_name: cert.subject_cn.clone(),
            issuer_common_name: cert.issuer_cn.clone(),
            not_before: cert.not_before,
            not_after: cert.not_after,
            sans: cert.dns_names.clone(),
            fingerprint,
            weak_key: is_weak_key(&cert.public_key),
            deprecated_sig_alg: is_deprecated_signature(&cert.signature_oid),
            issuer_code: IssuerCode::classify(&cert.subject_cn, &cert.issuer_cn),
            expiring_soon: is_expiring_soon(cert.not_after, self.now, self.threshold_days),
            duplicate_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificates::fixtures::{TestCert, TestKey};
    use openssl::nid::Nid;

    fn rsa(bits: usize) -> PublicKeyInfo {
        PublicKeyInfo {
            algorithm: KeyAlgorithm::Rsa,
            bits,
        }
    }

    fn ec(bits: usize) -> PublicKeyInfo {
        PublicKeyInfo {
            algorithm: KeyAlgorithm::Ec,
            bits,
        }
    }

    #[test]
    fn test_issuer_code_order() {
        assert_eq!(
            IssuerCode::classify("DigiCert Global Root", "digicert global root"),
            IssuerCode::SelfSigned
        );
        assert_eq!(
            IssuerCode::classify("www.example.com", "DigiCert TLS RSA SHA256 2020 CA1"),
            IssuerCode::DigiCert
        );
        assert_eq!(
            IssuerCode::classify("api.example.com", "Amazon RSA 2048 M02"),
            IssuerCode::Amazon
        );
        assert_eq!(
            IssuerCode::classify("api.example.com", "R11"),
            IssuerCode::Other
        );
        assert_eq!(IssuerCode::SelfSigned.code(), 33);
        assert_eq!(IssuerCode::DigiCert.to_string(), "30");
    }

    #[test]
    fn test_empty_names_count_as_self_signed() {
        assert_eq!(IssuerCode::classify("", ""), IssuerCode::SelfSigned);
    }

    #[test]
    fn test_weak_key_thresholds() {
        assert!(is_weak_key(&rsa(1024)));
        assert!(!is_weak_key(&rsa(2048)));
        assert!(!is_weak_key(&rsa(4096)));
        assert!(is_weak_key(&ec(224)));
        assert!(!is_weak_key(&ec(256)));
        assert!(!is_weak_key(&ec(384)));
        assert!(!is_weak_key(&PublicKeyInfo {
            algorithm: KeyAlgorithm::Other,
            bits: 0
        }));
    }

    #[test]
    fn test_deprecated_signatures() {
        assert_eq!(
            deprecated_signature_name("1.2.840.113549.1.1.5"),
            Some("SHA1-RSA")
        );
        assert!(is_deprecated_signature("1.2.840.113549.1.1.4"));
        assert!(is_deprecated_signature("1.2.840.10040.4.3"));
        assert!(is_deprecated_signature("1.2.840.10045.4.1"));
        // sha256WithRSAEncryption, ecdsa-with-SHA256
        assert!(!is_deprecated_signature("1.2.840.113549.1.1.11"));
        assert!(!is_deprecated_signature("1.2.840.10045.4.3.2"));
    }

    #[test]
    fn test_expiring_soon_boundary() {
        let now = Utc::now();
        assert!(is_expiring_soon(now + Duration::days(10), now, 45));
        assert!(is_expiring_soon(now + Duration::days(45), now, 45));
        assert!(!is_expiring_soon(
            now + Duration::days(45) + Duration::seconds(1),
            now,
            45
        ));
        assert!(is_expiring_soon(now - Duration::days(1), now, 45));
    }

    #[test]
    fn test_classify_generated_certificates() {
        let classifier = Classifier::new(45);

        let weak = TestCert::issued("legacy.example.com", "DigiCert SHA2 Secure Server CA")
            .with_key(TestKey::Rsa(1024))
            .build();
        let parsed = ParsedCertificate::from_der(&weak.to_der().unwrap()).unwrap();
        let fact = classifier.classify(&parsed, Path::new("/certs/legacy.pem"), parsed.fingerprint(), 1);
        assert!(fact.weak_key);
        assert!(!fact.deprecated_sig_alg);
        assert_eq!(fact.issuer_code, IssuerCode::DigiCert);
        assert!(!fact.expiring_soon);

        let small_curve = TestCert::self_signed("p224.example.com")
            .with_key(TestKey::Ec(Nid::SECP224R1))
            .expiring_in_days(10)
            .build();
        let parsed = ParsedCertificate::from_der(&small_curve.to_der().unwrap()).unwrap();
        let fact = classifier.classify(&parsed, Path::new("/certs/p224.pem"), parsed.fingerprint(), 2);
        assert!(fact.weak_key);
        assert!(fact.expiring_soon);
        assert_eq!(fact.issuer_code, IssuerCode::SelfSigned);
        assert_eq!(fact.duplicate_count, 2);
        assert_eq!(fact.fingerprint_hex().len(), 64);
    }
}
