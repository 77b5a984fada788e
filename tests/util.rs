#![allow(dead_code)]

use std::sync::LazyLock;

use pushcert::cert::params::{CertificationRequestInfo, DistinguishedName, Validity};
use pushcert::cert::{Certificate, CertificateWithPrivateKey};
use pushcert::issuer::{Issuer, random_serial_number};
use pushcert::key::KeyPair;
use time::{Duration, OffsetDateTime};

/// RSA key generation dominates test time, so tests share a small pool.
static KEYS: LazyLock<Vec<KeyPair>> =
    LazyLock::new(|| (0..3).map(|_| KeyPair::generate_rsa(2048).unwrap()).collect());

pub fn key(index: usize) -> &'static KeyPair {
    &KEYS[index % KEYS.len()]
}

/// Validity window of `[now + from, now + to]`.
pub fn window(from: Duration, to: Duration) -> Validity {
    let now = OffsetDateTime::now_utc();
    Validity::new(now + from, now + to).unwrap()
}

pub fn request(subject: DistinguishedName, key: &KeyPair, is_ca: bool) -> CertificationRequestInfo {
    CertificationRequestInfo::builder()
        .subject(subject)
        .subject_public_key(key.public_key().clone())
        .is_ca(is_ca)
        .build()
}

pub fn named(common_name: &str) -> DistinguishedName {
    DistinguishedName::builder()
        .common_name(common_name.to_string())
        .build()
}

/// Self-signed certificate for `key` over the given window.
pub fn self_signed(common_name: &str, key: &KeyPair, validity: Validity, is_ca: bool) -> Certificate {
    let info = request(named(common_name), key, is_ca);
    let serial = random_serial_number(&mut rand_core::OsRng).unwrap();
    Certificate::new_self_signed(&info, key, serial, validity).unwrap()
}

/// Certificate for `key` issued by `issuer`.
pub fn issued_by(
    issuer: &CertificateWithPrivateKey,
    common_name: &str,
    key: &KeyPair,
    validity: Validity,
    is_ca: bool,
) -> Certificate {
    let info = request(named(common_name), key, is_ca);
    let serial = random_serial_number(&mut rand_core::OsRng).unwrap();
    issuer.issue(&info, serial, validity).unwrap()
}

/// A root CA, an intermediate CA and a leaf, each valid for a day either side
/// of now unless overridden.
pub struct Chain {
    pub root: CertificateWithPrivateKey,
    pub intermediate: CertificateWithPrivateKey,
    pub leaf: CertificateWithPrivateKey,
}

pub fn generate_chain(intermediate_validity: Validity) -> Chain {
    let root_key = key(0);
    let root = CertificateWithPrivateKey {
        cert: self_signed(
            "MDM Root CA",
            root_key,
            window(-Duration::days(30), Duration::days(30)),
            true,
        ),
        key: root_key.clone(),
    };

    let intermediate_key = key(1);
    let intermediate = CertificateWithPrivateKey {
        cert: issued_by(
            &root,
            "MDM Device CA",
            intermediate_key,
            intermediate_validity,
            true,
        ),
        key: intermediate_key.clone(),
    };

    let leaf_key = key(2);
    let leaf = CertificateWithPrivateKey {
        cert: issued_by(
            &intermediate,
            "device-0001",
            leaf_key,
            window(-Duration::days(1), Duration::days(1)),
            false,
        ),
        key: leaf_key.clone(),
    };

    Chain {
        root,
        intermediate,
        leaf,
    }
}
