// Test certificate factory

use chrono::Utc;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{Asn1Flag, EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::{X509, X509Builder, X509NameBuilder};

#[derive(Debug, Clone, Copy)]
pub(crate) enum TestKey {
    Rsa(u32),
    Ec(Nid),
}

#[derive(Debug, Clone)]
pub(crate) struct TestCert {
    subject_cn: String,
    issuer_cn: String,
    key: TestKey,
    valid_days: i64,
    sans: Vec<String>,
}

impl TestCert {
    pub(crate) fn self_signed(cn: &str) -> Self {
        Self::issued(cn, cn)
    }

    pub(crate) fn issued(cn: &str, issuer_cn: &str) -> Self {
        Self {
            subject_cn: cn.to_string(),
            issuer_cn: issuer_cn.to_string(),
            key: TestKey::Rsa(2048),
            valid_days: 365,
            sans: Vec::new(),
        }
    }

    pub(crate) fn with_key(mut self, key: TestKey) -> Self {
        self.key = key;
        self
    }

    /// Negative values produce an already expired certificate
    pub(crate) fn expiring_in_days(mut self, days: i64) -> Self {
        self.valid_days = days;
        self
    }

    pub(crate) fn with_sans(mut self, sans: &[&str]) -> Self {
        self.sans = sans.iter().map(|s| s.to_string()).collect();
        self
    }

    pub(crate) fn build(&self) -> X509 {
        let pkey = self.private_key();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();

        let mut serial = BigNum::new().unwrap();
        serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();
        builder
            .set_serial_number(&serial.to_asn1_integer().unwrap())
            .unwrap();

        let mut subject = X509NameBuilder::new().unwrap();
        subject.append_entry_by_text("O", "certwatch tests").unwrap();
        subject
            .append_entry_by_text("CN", &self.subject_cn)
            .unwrap();
        let subject = subject.build();

        let mut issuer = X509NameBuilder::new().unwrap();
        issuer.append_entry_by_text("CN", &self.issuer_cn).unwrap();
        let issuer = issuer.build();

        builder.set_subject_name(&subject).unwrap();
        builder.set_issuer_name(&issuer).unwrap();

        let now = Utc::now().timestamp();
        let not_before = Asn1Time::from_unix(now - 86_400).unwrap();
        let not_after = Asn1Time::from_unix(now + self.valid_days * 86_400).unwrap();
        builder.set_not_before(&not_before).unwrap();
        builder.set_not_after(&not_after).unwrap();

        builder.set_pubkey(&pkey).unwrap();

        if !self.sans.is_empty() {
            let mut san = SubjectAlternativeName::new();
            for name in &self.sans {
                san.dns(name);
            }
            let ext = san.build(&builder.x509v3_context(None, None)).unwrap();
            builder.append_extension(ext).unwrap();
        }

        builder.sign(&pkey, MessageDigest::sha256()).unwrap();
        builder.build()
    }

    fn private_key(&self) -> PKey<Private> {
        match self.key {
            TestKey::Rsa(bits) => PKey::from_rsa(Rsa::generate(bits).unwrap()).unwrap(),
            TestKey::Ec(curve) => {
                let mut group = EcGroup::from_curve_name(curve).unwrap();
                group.set_asn1_flag(Asn1Flag::NAMED_CURVE);
                PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
            }
        }
    }
}
