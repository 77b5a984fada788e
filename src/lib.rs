//! # pushcert - Certificate plumbing for device-management push services
//!
//! pushcert bundles the certificate and key handling an MDM push server
//! needs, built entirely with rustcrypto libraries:
//!
//! - **Self-signed issuance**: 2048-bit RSA keys with a server certificate
//!   for a given common name.
//! - **PEM codecs**: certificate bundles and `RSA PRIVATE KEY` blocks, with
//!   the legacy `Proc-Type`/`DEK-Info` passphrase encryption OpenSSL reads.
//! - **Push topics**: the topic carried in the UserID subject attribute of an
//!   APNs push certificate.
//! - **Signed envelopes**: PKCS#7 `SignedData` verification that tolerates
//!   bounded clock skew between device and server.
//!
//! ## Quick Start
//!
//! ### Generating a Self-Signed Certificate
//!
//! ```rust,no_run
//! use pushcert::{codec, issuer};
//!
//! # fn main() -> Result<(), pushcert::error::PushCertError> {
//! let (key, cert) = issuer::generate("mdm.example.com", 365)?;
//!
//! let cert_pem = codec::encode_certificate(&cert)?;
//! let key_pem = codec::encode_key(&key, Some(b"secret".as_slice()))?;
//!
//! let decoded = codec::decode_key(&key_pem, Some(b"secret".as_slice()))?;
//! assert_eq!(decoded, key);
//! # let _ = cert_pem;
//! # Ok(())
//! # }
//! ```
//!
//! ### Reading a Push Topic
//!
//! ```rust,no_run
//! use pushcert::codec;
//!
//! # fn main() -> Result<(), pushcert::error::PushCertError> {
//! let pem = std::fs::read("push.pem").expect("push certificate");
//! let cert = codec::decode_single_certificate(&pem)?;
//! println!("topic: {}", cert.topic()?);
//! # Ok(())
//! # }
//! ```
//!
//! ### Verifying a Device Signature
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use pushcert::pkcs7::Pkcs7Envelope;
//! use pushcert::verifier::{SkewPolicy, SkewTolerantVerifier};
//!
//! # fn main() -> Result<(), pushcert::error::VerificationError> {
//! # let header = "";
//! # let body = b"<plist/>".to_vec();
//! let envelope = Pkcs7Envelope::from_base64(header)?.with_detached_content(body);
//!
//! let policy = SkewPolicy::builder()
//!     .max_skew(Duration::from_secs(5 * 60))
//!     .build();
//! SkewTolerantVerifier::new(policy).verify(&envelope, None)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Fallible operations return [`error::PushCertError`]; envelope verification
//! returns the narrower [`error::VerificationError`], whose `OutsideValidity`
//! variant is the only one a clock adjustment can fix:
//!
//! ```rust
//! use pushcert::{codec, error::PushCertError};
//!
//! match codec::decode_key(b"invalid pem data", None) {
//!     Ok(_) => println!("Key imported successfully"),
//!     Err(PushCertError::MissingPassphraseError) => println!("Key is encrypted"),
//!     Err(PushCertError::KeyDecodeError(msg)) => println!("Failed to decode key: {}", msg),
//!     Err(e) => println!("Other error: {}", e),
//! }
//! ```
//!
//! ## Logging
//!
//! Events are emitted through `tracing` at debug level (plus a warning when
//! a key is encrypted with DES on request). Key material and passphrases are
//! never logged. Installing a subscriber is left to the application.
//!
//! ## Module Organization
//!
//! - [`key`]: RSA key pairs and PKCS#1 signatures
//! - [`cert`]: Certificate parsing, inspection and construction
//! - [`issuer`]: Certificate issuing and self-signed generation
//! - [`codec`]: PEM encoding and decoding of certificates and keys
//! - [`pem_utils`] / [`pem_encryption`]: PEM framing and legacy key encryption
//! - [`topic`]: Push topic extraction
//! - [`pkcs7`]: `SignedData` envelopes
//! - [`verifier`]: Clock-skew tolerant verification
//! - [`error`]: Error types
//! - [`tbs_certificate`]: Low-level certificate structure manipulation

pub mod cert;
pub mod codec;
pub mod error;
pub mod issuer;
pub mod key;
pub mod pem_encryption;
pub mod pem_utils;
pub mod pkcs7;
pub mod tbs_certificate;
pub mod topic;
pub mod verifier;
