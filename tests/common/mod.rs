// Shared helpers for integration tests

#![allow(dead_code)]

use certwatch::certificates::LeafCertificateFact;
use certwatch::metrics::{CertificateLabels, MetricsSink};
use chrono::{DateTime, Utc};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{Asn1Flag, EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509, X509NameBuilder};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

pub enum Key {
    Rsa(u32),
    Ec(Nid),
}

fn private_key(key: &Key) -> PKey<Private> {
    match key {
        Key::Rsa(bits) => PKey::from_rsa(Rsa::generate(*bits).unwrap()).unwrap(),
        Key::Ec(nid) => {
            let mut group = EcGroup::from_curve_name(*nid).unwrap();
            group.set_asn1_flag(Asn1Flag::NAMED_CURVE);
            PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
        }
    }
}

/// Certificate for `cn` issued by `issuer_cn`, valid from yesterday for `days` days
pub fn certificate(cn: &str, issuer_cn: &str, key: Key, days: i64) -> X509 {
    let pkey = private_key(&key);

    let mut subject = X509NameBuilder::new().unwrap();
    subject.append_entry_by_text("CN", cn).unwrap();
    let subject = subject.build();
    let mut issuer = X509NameBuilder::new().unwrap();
    issuer.append_entry_by_text("CN", issuer_cn).unwrap();
    let issuer = issuer.build();

    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();

    let now = Utc::now().timestamp();
    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&subject).unwrap();
    builder.set_issuer_name(&issuer).unwrap();
    builder.set_pubkey(&pkey).unwrap();
    builder
        .set_not_before(&Asn1Time::from_unix(now - 86_400).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::from_unix(now + days * 86_400).unwrap())
        .unwrap();
    builder.sign(&pkey, MessageDigest::sha256()).unwrap();
    builder.build()
}

pub fn self_signed(cn: &str, days: i64) -> X509 {
    certificate(cn, cn, Key::Rsa(2048), days)
}

pub fn write_pem(dir: &Path, name: &str, certs: &[&X509]) -> PathBuf {
    let mut pem = Vec::new();
    for cert in certs {
        pem.extend_from_slice(&cert.to_pem().unwrap());
    }
    let path = dir.join(name);
    std::fs::write(&path, pem).unwrap();
    path
}

/// Sink that keeps every observed fact and counts parse attempts
#[derive(Default)]
pub struct CollectingSink {
    pub facts: Mutex<Vec<LeafCertificateFact>>,
    pub parsed: Mutex<usize>,
    pub parse_errors: Mutex<Vec<PathBuf>>,
}

impl CollectingSink {
    pub fn facts(&self) -> Vec<LeafCertificateFact> {
        self.facts.lock().unwrap().clone()
    }

    pub fn parsed(&self) -> usize {
        *self.parsed.lock().unwrap()
    }
}

impl MetricsSink for CollectingSink {
    fn reset(&self) {}

    fn observe_certificate(&self, fact: &LeafCertificateFact, _labels: &CertificateLabels) {
        self.facts.lock().unwrap().push(fact.clone());
    }

    fn record_weak_key(&self, _labels: &CertificateLabels) {}

    fn record_deprecated_signature(&self, _labels: &CertificateLabels) {}

    fn record_file_seen(&self, _dir: &Path) {}

    fn record_cert_parsed(&self, _dir: &Path) {
        *self.parsed.lock().unwrap() += 1;
    }

    fn record_parse_error(&self, file: &Path) {
        self.parse_errors.lock().unwrap().push(file.to_path_buf());
    }

    fn record_scan_duration(&self, _dir: &Path, _elapsed: Duration) {}

    fn record_last_scan(&self, _dir: &Path, _at: DateTime<Utc>) {}

    fn record_label_truncated(&self) {}

    fn record_reload_completed(&self, _at: DateTime<Utc>) {}
}
