//! use pushcert::error::PushCertError;

use thiserror::Error;
use time::OffsetDateTime;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PushCertError>;

/// Represents errors that can occur in the pushcert library.
///
/// Every operation fails closed: when one of these is returned, no partially
/// constructed key or certificate is handed back to the caller.
#[derive(Debug, Error, Clone)]
pub enum PushCertError {
    /// Entropy or key generation failure.
    #[error("Key generation error: {0}")]
    KeyGenerationError(String),

    /// Template, encoding or signing failure while issuing a certificate.
    #[error("Certificate construction error: {0}")]
    CertificateConstructionError(String),

    /// Malformed, mistyped or truncated PEM input.
    #[error("Failed to decode PEM armor: {0}")]
    ArmorDecodeError(String),

    /// Wrong number of certificates where exactly one was required.
    #[error("Incorrect number of certificates: expected 1, found {0}")]
    CardinalityError(usize),

    #[error("No supplied password for encrypted PEM")]
    MissingPassphraseError,

    #[error("Supplied PEM password, but not encrypted")]
    UnexpectedPassphraseError,

    /// Decryption or structural parse failure of private key material.
    #[error("Failed to decode private key: {0}")]
    KeyDecodeError(String),

    #[error("Could not find push topic (UserID OID) in certificate")]
    TopicNotFoundError,

    /// The UserID attribute exists but does not carry a push topic.
    #[error("Invalid push topic (UserID OID) in certificate. Must start with 'com.apple.mgmt', was: {0}")]
    InvalidTopicError(String),

    /// Error during data encoding.
    #[error("Failed to encode data: {0}")]
    EncodingError(String),

    /// Error during data decoding.
    #[error("Failed to decode data: {0}")]
    DecodingError(String),

    #[error(transparent)]
    Verification(#[from] VerificationError),
}

/// Reasons a signed envelope can fail verification.
///
/// [`VerificationError::OutsideValidity`] is the only variant describing a
/// clock problem; every other variant is a structural or cryptographic failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Malformed signed envelope: {0}")]
    Malformed(String),

    #[error("Signed envelope has no signers")]
    NoSigners,

    #[error("Signed envelope carries no content to verify")]
    MissingContent,

    #[error("No certificate for signer")]
    MissingSignerCertificate,

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Content digest does not match the signed message digest")]
    DigestMismatch,

    #[error("Signature verification failed")]
    SignatureMismatch,

    #[error("Certificate chain does not lead to a trusted anchor")]
    UntrustedChain,

    /// The reference time (or the signing time) falls outside a certificate's
    /// validity window.
    #[error("{at} is outside of certificate validity {not_before} to {not_after} for {subject}")]
    OutsideValidity {
        subject: String,
        at: OffsetDateTime,
        not_before: OffsetDateTime,
        not_after: OffsetDateTime,
    },
}

impl VerificationError {
    /// Returns `true` when the failure is caused by the reference time falling
    /// outside a validity window, the only failure a clock shift can fix.
    pub fn is_validity_window(&self) -> bool {
        matches!(self, VerificationError::OutsideValidity { .. })
    }
}

impl From<der::Error> for VerificationError {
    fn from(err: der::Error) -> Self {
        VerificationError::Malformed(err.to_string())
    }
}
