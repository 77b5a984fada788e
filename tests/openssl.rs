mod util;

use openssl::nid::Nid;
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::stack::Stack;
use openssl::symm::Cipher;
use openssl::x509::X509;
use openssl::x509::store::X509StoreBuilder;
use pushcert::codec;
use pushcert::issuer;
use pushcert::pem_encryption::PemCipher;
use pushcert::pkcs7::{Pkcs7Builder, Pkcs7Envelope, SignedEnvelope};
use regex::Regex;
use rsa::traits::PublicKeyParts;
use std::fs;
use std::process::Command;
use time::{Duration, OffsetDateTime};

const PAYLOAD: &[u8] = b"<plist><dict><key>Topic</key><string>com.apple.mgmt.example</string></dict></plist>";

fn modulus(key: &pushcert::key::KeyPair) -> Vec<u8> {
    key.public_key().n().to_bytes_be()
}

#[test]
fn test_openssl_validate_cert() {
    let (_, cert) = issuer::generate("mdm.example.com", 365).unwrap();
    let cert_pem = codec::encode_certificate(&cert).unwrap();

    let cert_path = std::env::temp_dir().join("pushcert_test_server_cert.pem");
    fs::write(&cert_path, cert_pem).expect("Failed to write server certificate");

    // Use OpenSSL CLI to print the generated certificate
    let output = Command::new("openssl")
        .arg("x509")
        .arg("-in")
        .arg(&cert_path)
        .arg("-noout")
        .arg("-text")
        .output()
        .expect("Failed to execute OpenSSL command");

    assert!(
        output.status.success(),
        "OpenSSL command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let output_text = String::from_utf8_lossy(&output.stdout);
    assert!(
        output_text.contains("Version: 3 (0x2)"),
        "Version field is incorrect"
    );
    assert!(
        output_text.contains("Signature Algorithm: sha256WithRSAEncryption"),
        "Signature Algorithm field is incorrect"
    );
    assert!(
        output_text.contains("Public-Key: (2048 bit)"),
        "Key size is incorrect"
    );
    assert!(
        output_text.contains("DNS:mdm.example.com"),
        "Subject alternative name is missing"
    );
    assert!(
        output_text.contains("TLS Web Server Authentication"),
        "Extended key usage is missing"
    );

    let subject_regex = Regex::new(r"Subject: CN\s?=\s?mdm\.example\.com").unwrap();
    assert!(
        subject_regex.is_match(&output_text),
        "Subject field is incorrect"
    );
    let not_after_regex = Regex::new(r"Not After : .+").unwrap();
    assert!(
        not_after_regex.is_match(&output_text),
        "Missing or incorrect Not After field"
    );

    fs::remove_file(&cert_path).expect("Failed to remove test certificate");
}

#[test]
fn test_openssl_crate_validate_cert() {
    let (key, cert) = issuer::generate("mdm.example.com", 30).unwrap();
    let cert_pem = codec::encode_certificate(&cert).unwrap();

    let x509 = X509::from_pem(&cert_pem).expect("Failed to parse PEM");

    let subject = x509
        .subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .unwrap()
        .data()
        .as_utf8()
        .unwrap();
    assert_eq!(subject.to_string(), "mdm.example.com", "Subject CN mismatch");

    assert_eq!(x509.version(), 2, "X509 version should be 3 (0-based index)");

    let serial = x509.serial_number().to_bn().unwrap().to_vec();
    assert_eq!(serial, cert.serial_number_bytes(), "Serial number mismatch");

    assert_eq!(
        x509.signature_algorithm().object().nid(),
        Nid::SHA256WITHRSAENCRYPTION,
        "Signature algorithm should be sha256WithRSAEncryption"
    );

    let public_key = x509.public_key().unwrap();
    assert!(x509.verify(&public_key).unwrap(), "Self-signature must verify");
    assert_eq!(public_key.rsa().unwrap().n().to_vec(), modulus(&key));
}

#[test]
fn test_openssl_decrypts_our_keys() {
    let key = util::key(0);
    for cipher in [PemCipher::DesEde3Cbc, PemCipher::Aes128Cbc, PemCipher::Aes256Cbc] {
        let pem =
            codec::encode_key_with_cipher(key, b"passphrase", cipher, &mut rand_core::OsRng)
                .unwrap();
        let rsa = Rsa::private_key_from_pem_passphrase(&pem, b"passphrase")
            .unwrap_or_else(|e| panic!("OpenSSL rejected {}: {e}", cipher.name()));
        assert!(rsa.check_key().unwrap());
        assert_eq!(rsa.n().to_vec(), modulus(key));
    }

    let pem = codec::encode_key(key, None).unwrap();
    let rsa = Rsa::private_key_from_pem(&pem).unwrap();
    assert_eq!(rsa.n().to_vec(), modulus(key));
}

#[test]
fn test_we_decrypt_openssl_keys() {
    let rsa = Rsa::generate(2048).unwrap();
    for cipher in [Cipher::des_ede3_cbc(), Cipher::aes_128_cbc(), Cipher::aes_256_cbc()] {
        let pem = rsa
            .private_key_to_pem_passphrase(cipher, b"from openssl")
            .unwrap();
        let key = codec::decode_key(&pem, Some(b"from openssl".as_slice())).unwrap();
        assert_eq!(modulus(&key), rsa.n().to_vec());
    }

    let plain = rsa.private_key_to_pem().unwrap();
    let key = codec::decode_key(&plain, None).unwrap();
    assert_eq!(modulus(&key), rsa.n().to_vec());
}

#[test]
fn test_verify_openssl_signed_envelope() {
    let key = util::key(1);
    let cert = util::self_signed(
        "device",
        key,
        util::window(-Duration::days(1), Duration::days(1)),
        false,
    );
    let x509 = X509::from_der(&cert.to_der().unwrap()).unwrap();
    let pkey = PKey::private_key_from_pem(&codec::encode_key(key, None).unwrap()).unwrap();
    let extra_certs: Stack<X509> = Stack::new().unwrap();

    let attached = Pkcs7::sign(&x509, &pkey, &extra_certs, PAYLOAD, Pkcs7Flags::BINARY).unwrap();
    let envelope = Pkcs7Envelope::from_der(&attached.to_der().unwrap()).unwrap();
    assert_eq!(envelope.content(), Some(PAYLOAD));
    envelope.verify_at(OffsetDateTime::now_utc(), None).unwrap();

    let detached = Pkcs7::sign(
        &x509,
        &pkey,
        &extra_certs,
        PAYLOAD,
        Pkcs7Flags::BINARY | Pkcs7Flags::DETACHED,
    )
    .unwrap();
    let envelope = Pkcs7Envelope::from_pem(&detached.to_pem().unwrap())
        .unwrap()
        .with_detached_content(PAYLOAD);
    envelope.verify_at(OffsetDateTime::now_utc(), None).unwrap();
}

#[test]
fn test_openssl_verifies_our_envelope() {
    let key = util::key(2);
    let cert = util::self_signed(
        "device",
        key,
        util::window(-Duration::days(1), Duration::days(1)),
        false,
    );
    let der = Pkcs7Builder::new(&cert, key).sign(PAYLOAD).unwrap();

    let pkcs7 = Pkcs7::from_der(&der).unwrap();
    let store = X509StoreBuilder::new().unwrap().build();
    let certs: Stack<X509> = Stack::new().unwrap();
    let mut content = Vec::new();
    pkcs7
        .verify(
            &certs,
            &store,
            None,
            Some(&mut content),
            Pkcs7Flags::NOVERIFY,
        )
        .unwrap();
    assert_eq!(content, PAYLOAD);
}
