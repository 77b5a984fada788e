pub mod extensions;
pub mod params;

use crate::error::{PushCertError, Result, VerificationError};
use der::asn1::Any;
use der::{Decode, Encode, Reader, SliceReader, Tag};
use extensions::ToAndFromX509Extension;
use params::{CertificationRequestInfo, Validity};
use rsa::RsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use time::OffsetDateTime;
use x509_cert::certificate::CertificateInner;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;

use crate::issuer::Issuer;
use crate::key::{DigestAlgorithm, KeyPair, verify_rsa_signature};

/// Represents the supported signature algorithms for certificates.
///
/// Certificates are always issued with SHA-256; SHA-1 is accepted when
/// verifying older material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    /// SHA-256 with RSA encryption.
    Sha256WithRSA,
    /// SHA-1 with RSA encryption.
    Sha1WithRSA,
}

impl SignatureAlgorithm {
    /// Maps a signature algorithm OID onto a supported algorithm.
    pub fn from_oid(oid: &const_oid::ObjectIdentifier) -> Option<Self> {
        match *oid {
            const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION => Some(Self::Sha256WithRSA),
            const_oid::db::rfc5912::SHA_1_WITH_RSA_ENCRYPTION => Some(Self::Sha1WithRSA),
            _ => None,
        }
    }

    pub fn digest(self) -> DigestAlgorithm {
        match self {
            SignatureAlgorithm::Sha256WithRSA => DigestAlgorithm::Sha256,
            SignatureAlgorithm::Sha1WithRSA => DigestAlgorithm::Sha1,
        }
    }

    /// Builds the `AlgorithmIdentifier`, with the explicit NULL parameter
    /// RFC 4055 requires for the PKCS#1 algorithms.
    pub fn to_algorithm_identifier(self) -> Result<x509_cert::spki::AlgorithmIdentifierOwned> {
        let oid = match self {
            SignatureAlgorithm::Sha256WithRSA => const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION,
            SignatureAlgorithm::Sha1WithRSA => const_oid::db::rfc5912::SHA_1_WITH_RSA_ENCRYPTION,
        };
        let null = Any::new(Tag::Null, Vec::<u8>::new())
            .map_err(|e| PushCertError::EncodingError(e.to_string()))?;
        Ok(x509_cert::spki::AlgorithmIdentifierOwned {
            oid,
            parameters: Some(null),
        })
    }
}

/// Represents a parsed X.509 certificate.
///
/// Certificates are immutable; clone freely to share them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// The inner representation of the certificate.
    pub inner: CertificateInner,
}

impl Certificate {
    /// Parses a single DER-encoded certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let inner = CertificateInner::from_der(der)
            .map_err(|e| PushCertError::DecodingError(e.to_string()))?;
        Ok(Certificate { inner })
    }

    /// Parses a buffer holding one or more DER certificates back to back.
    pub fn parse_many(der: &[u8]) -> Result<Vec<Self>> {
        let decoding_error = |e: der::Error| PushCertError::DecodingError(e.to_string());
        let mut reader = SliceReader::new(der).map_err(decoding_error)?;
        let mut certificates = Vec::new();
        while !reader.is_finished() {
            let inner = CertificateInner::decode(&mut reader).map_err(decoding_error)?;
            certificates.push(Certificate { inner });
        }
        Ok(certificates)
    }

    /// Encodes the certificate into DER format.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.inner
            .to_der()
            .map_err(|e| PushCertError::EncodingError(e.to_string()))
    }

    pub fn subject(&self) -> &Name {
        &self.inner.tbs_certificate.subject
    }

    pub fn issuer(&self) -> &Name {
        &self.inner.tbs_certificate.issuer
    }

    /// The subject common name, or an empty string when there is none.
    pub fn common_name(&self) -> String {
        params::DistinguishedName::from_x509_name(self.subject()).common_name
    }

    pub fn serial_number(&self) -> &SerialNumber {
        &self.inner.tbs_certificate.serial_number
    }

    /// Serial number magnitude as big-endian bytes without leading zeros.
    pub fn serial_number_bytes(&self) -> Vec<u8> {
        let bytes = self.serial_number().as_bytes();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        bytes[first..].to_vec()
    }

    pub fn not_before(&self) -> OffsetDateTime {
        OffsetDateTime::from(
            self.inner
                .tbs_certificate
                .validity
                .not_before
                .to_system_time(),
        )
    }

    pub fn not_after(&self) -> OffsetDateTime {
        OffsetDateTime::from(self.inner.tbs_certificate.validity.not_after.to_system_time())
    }

    pub fn validity(&self) -> Validity {
        Validity {
            not_before: self.not_before(),
            not_after: self.not_after(),
        }
    }

    /// Finds an extension by type and decodes it.
    ///
    /// # Returns
    /// `None` when the certificate does not carry the extension.
    pub fn extension<E: ToAndFromX509Extension>(&self) -> Option<Result<E>> {
        self.inner
            .tbs_certificate
            .extensions
            .as_ref()?
            .iter()
            .find(|ext| ext.extn_id == E::OID)
            .map(|ext| E::from_x509_extension_value(ext.extn_value.as_bytes()))
    }

    /// Returns the RSA public key bound by the certificate.
    pub fn public_key(&self) -> Result<RsaPublicKey> {
        let spki_der = self
            .inner
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|e| PushCertError::DecodingError(e.to_string()))?;
        RsaPublicKey::from_public_key_der(&spki_der)
            .map_err(|e| PushCertError::DecodingError(e.to_string()))
    }

    /// Checks the certificate signature against `issuer_key`.
    pub fn verify_signature(
        &self,
        issuer_key: &RsaPublicKey,
    ) -> std::result::Result<(), VerificationError> {
        let algorithm = SignatureAlgorithm::from_oid(&self.inner.signature_algorithm.oid)
            .ok_or_else(|| {
                VerificationError::UnsupportedAlgorithm(
                    self.inner.signature_algorithm.oid.to_string(),
                )
            })?;
        let tbs = self.inner.tbs_certificate.to_der()?;
        let signature = self
            .inner
            .signature
            .as_bytes()
            .ok_or_else(|| VerificationError::Malformed("unaligned signature bits".to_string()))?;
        if verify_rsa_signature(issuer_key, algorithm.digest(), &tbs, signature) {
            Ok(())
        } else {
            Err(VerificationError::SignatureMismatch)
        }
    }

    /// Checks whether `issuer` signed this certificate: names must chain and
    /// the signature must verify under the issuer's key.
    pub fn is_issued_by(&self, issuer: &Certificate) -> bool {
        if self.issuer() != issuer.subject() {
            return false;
        }
        match issuer.public_key() {
            Ok(key) => self.verify_signature(&key).is_ok(),
            Err(_) => false,
        }
    }

    /// Returns the push topic carried in the subject UserID attribute.
    pub fn topic(&self) -> Result<String> {
        crate::topic::extract_topic(self)
    }

    /// Creates a new self-signed certificate.
    ///
    /// # Arguments
    /// * `cert_info` - The certification request information.
    /// * `key` - The key pair used to sign the certificate.
    /// * `serial_number` - The serial number to embed.
    /// * `validity` - The validity window.
    pub fn new_self_signed(
        cert_info: &CertificationRequestInfo,
        key: &KeyPair,
        serial_number: SerialNumber,
        validity: Validity,
    ) -> Result<Self> {
        // For self-signed certificates, the issuer is the same as the subject
        let self_issuer = SelfIssuer {
            name: cert_info.subject.as_x509_name()?,
            key,
        };
        self_issuer.issue(cert_info, serial_number, validity)
    }
}

// Helper struct for self-signed certificates
struct SelfIssuer<'a> {
    name: Name,
    key: &'a KeyPair,
}

impl Issuer for SelfIssuer<'_> {
    fn issuer_name(&self) -> Name {
        self.name.clone()
    }

    fn signing_key(&self) -> &KeyPair {
        self.key
    }
}

/// A certificate paired with its private key, able to issue further certificates.
#[derive(Debug, Clone)]
pub struct CertificateWithPrivateKey {
    pub cert: Certificate,
    pub key: KeyPair,
}

impl Issuer for CertificateWithPrivateKey {
    fn issuer_name(&self) -> Name {
        // The name of the issuer is the subject of the certificate
        self.cert.subject().clone()
    }

    fn signing_key(&self) -> &KeyPair {
        &self.key
    }
}
