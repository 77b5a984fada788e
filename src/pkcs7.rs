//! PKCS#7 / CMS `SignedData` envelopes.
//!
//! MDM clients sign their check-in and command payloads with a detached or
//! attached `SignedData` structure. [`Pkcs7Envelope`] parses one and verifies
//! it at a caller-supplied instant; [`Pkcs7Builder`] produces envelopes of the
//! same shape.
//!
//! Verification runs the cryptographic checks (signer lookup, content digest,
//! signature, optional chain to a trust anchor) before any temporal check, so
//! a [`VerificationError::OutsideValidity`] result always means the envelope
//! was otherwise sound.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cms::builder::{SignedDataBuilder, SignerInfoBuilder};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::ContentInfo;
use cms::signed_data::{
    EncapsulatedContentInfo, SignedAttributes, SignedData, SignerIdentifier, SignerInfo,
};
use const_oid::ObjectIdentifier;
use const_oid::db::rfc5912::{
    ID_SHA_1, ID_SHA_256, RSA_ENCRYPTION, SHA_1_WITH_RSA_ENCRYPTION, SHA_256_WITH_RSA_ENCRYPTION,
};
use der::asn1::{Any, OctetString, SetOfVec};
use der::{Decode, Encode, Tag};
use rsa::pkcs1v15::{Signature, SigningKey};
use sha2::Sha256;
use time::OffsetDateTime;
use tracing::debug;
use x509_cert::attr::Attribute;
use x509_cert::spki::AlgorithmIdentifierOwned;
use x509_cert::time::Time;

use crate::cert::Certificate;
use crate::cert::extensions::{BasicConstraints, SubjectKeyIdentifier};
use crate::error::{PushCertError, VerificationError};
use crate::key::{DigestAlgorithm, KeyPair, verify_rsa_signature};
use crate::pem_utils::BlockScanner;
use crate::tbs_certificate::encode_time;

pub const PKCS7_PEM_LABEL: &str = "PKCS7";

const ID_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
const ID_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
const ID_SIGNING_TIME: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");

/// Longest chain walked from a signer towards a trust anchor.
const MAX_CHAIN_DEPTH: usize = 8;

type VerifyResult<T> = std::result::Result<T, VerificationError>;

/// A signed object that can be checked at an arbitrary instant.
///
/// Implementations must report a reference time outside a certificate
/// validity window as [`VerificationError::OutsideValidity`] and nothing else,
/// so time-shifting callers can tell clock trouble from a bad signature.
pub trait SignedEnvelope {
    fn verify_at(
        &self,
        at: OffsetDateTime,
        trust_anchors: Option<&[Certificate]>,
    ) -> VerifyResult<()>;
}

/// A parsed `SignedData` envelope.
#[derive(Debug, Clone)]
pub struct Pkcs7Envelope {
    signed_data: SignedData,
    certificates: Vec<Certificate>,
    content: Option<Vec<u8>>,
}

impl Pkcs7Envelope {
    /// Parses a DER `ContentInfo` wrapping `SignedData`.
    pub fn from_der(der: &[u8]) -> VerifyResult<Self> {
        let content_info = ContentInfo::from_der(der)?;
        if content_info.content_type != ID_SIGNED_DATA {
            return Err(VerificationError::Malformed(format!(
                "content type {} is not signedData",
                content_info.content_type
            )));
        }
        let signed_data = SignedData::from_der(&content_info.content.to_der()?)?;

        let certificates = signed_data
            .certificates
            .as_ref()
            .map(|set| {
                set.0
                    .iter()
                    .filter_map(|choice| match choice {
                        CertificateChoices::Certificate(inner) => Some(Certificate {
                            inner: inner.clone(),
                        }),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        // Only the value octets are digested, whatever the eContent type.
        let content = signed_data
            .encap_content_info
            .econtent
            .as_ref()
            .map(|econtent| econtent.value().to_vec());

        Ok(Self {
            signed_data,
            certificates,
            content,
        })
    }

    /// Parses a single `PKCS7` PEM block.
    pub fn from_pem(input: &[u8]) -> VerifyResult<Self> {
        let malformed = |e: PushCertError| VerificationError::Malformed(e.to_string());
        let mut blocks = BlockScanner::new(input).map_err(malformed)?;
        let block = blocks
            .next()
            .ok_or_else(|| VerificationError::Malformed("no PEM block found".to_string()))?
            .map_err(malformed)?;
        if blocks.next().is_some() {
            return Err(VerificationError::Malformed(format!(
                "expected a single {PKCS7_PEM_LABEL} block"
            )));
        }
        if block.tag() != PKCS7_PEM_LABEL {
            return Err(VerificationError::Malformed(format!(
                "expected {PKCS7_PEM_LABEL} block, found {}",
                block.tag()
            )));
        }
        Self::from_der(block.contents())
    }

    /// Parses a base64 envelope, as carried in the `Mdm-Signature` HTTP header.
    pub fn from_base64(encoded: &str) -> VerifyResult<Self> {
        let der = STANDARD
            .decode(encoded.trim())
            .map_err(|e| VerificationError::Malformed(format!("invalid base64: {e}")))?;
        Self::from_der(&der)
    }

    /// Supplies the signed content of a detached envelope.
    ///
    /// Replaces any content embedded in the envelope.
    pub fn with_detached_content(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// The content covered by the signature, if known.
    pub fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }

    /// Certificates embedded in the envelope, in DER `SET OF` order (sorted by
    /// encoding, not necessarily the order the signer wrote them).
    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    /// Certificate of the first signer, when the envelope embeds it.
    pub fn signer_certificate(&self) -> Option<&Certificate> {
        let signer = self.signed_data.signer_infos.0.iter().next()?;
        self.find_signer_certificate(&signer.sid)
    }

    /// Encodes the envelope back to DER.
    pub fn to_der(&self) -> Result<Vec<u8>, PushCertError> {
        to_content_info_der(&self.signed_data)
    }

    fn find_signer_certificate(&self, sid: &SignerIdentifier) -> Option<&Certificate> {
        match sid {
            SignerIdentifier::IssuerAndSerialNumber(id) => self.certificates.iter().find(|cert| {
                cert.issuer() == &id.issuer && cert.serial_number() == &id.serial_number
            }),
            SignerIdentifier::SubjectKeyIdentifier(ski) => self.certificates.iter().find(|cert| {
                matches!(
                    cert.extension::<SubjectKeyIdentifier>(),
                    Some(Ok(id)) if id.0 == ski.0.as_bytes()
                )
            }),
        }
    }

    fn verify_signer(
        &self,
        signer: &SignerInfo,
        content: &[u8],
        at: OffsetDateTime,
        trust_anchors: Option<&[Certificate]>,
    ) -> VerifyResult<()> {
        let signer_cert = self
            .find_signer_certificate(&signer.sid)
            .ok_or(VerificationError::MissingSignerCertificate)?;
        let digest = digest_algorithm(&signer.digest_alg)?;

        let mut signing_time = None;
        let signed_message = match &signer.signed_attrs {
            Some(attrs) => {
                let message_digest = find_attribute(attrs, ID_MESSAGE_DIGEST).ok_or_else(|| {
                    VerificationError::Malformed("missing messageDigest attribute".to_string())
                })?;
                let expected = OctetString::from_der(&message_digest.to_der()?)?;
                if expected.as_bytes() != digest.digest(content).as_slice() {
                    return Err(VerificationError::DigestMismatch);
                }
                if let Some(value) = find_attribute(attrs, ID_SIGNING_TIME) {
                    signing_time = Some(decode_time(value)?);
                }
                // Signed attributes are signed as an explicit SET OF.
                attrs.to_der()?
            }
            None => content.to_vec(),
        };

        let public_key = signer_cert
            .public_key()
            .map_err(|e| VerificationError::Malformed(e.to_string()))?;
        let signature_digest = signature_digest(&signer.signature_algorithm, digest)?;
        if !verify_rsa_signature(
            &public_key,
            signature_digest,
            &signed_message,
            signer.signature.as_bytes(),
        ) {
            return Err(VerificationError::SignatureMismatch);
        }

        let path = match trust_anchors {
            Some(anchors) => self.build_path(signer_cert, anchors)?,
            None => vec![signer_cert],
        };

        if let Some(signing_time) = signing_time {
            check_validity(signer_cert, signing_time)?;
        }
        for cert in path {
            check_validity(cert, at)?;
        }
        Ok(())
    }

    /// Walks from the signer through embedded CA certificates until a trust
    /// anchor issued (or is) the current certificate.
    fn build_path<'a>(
        &'a self,
        signer: &'a Certificate,
        anchors: &'a [Certificate],
    ) -> VerifyResult<Vec<&'a Certificate>> {
        let mut path = vec![signer];
        let mut current = signer;
        for _ in 0..MAX_CHAIN_DEPTH {
            if anchors.contains(current) {
                return Ok(path);
            }
            if let Some(anchor) = anchors.iter().find(|anchor| current.is_issued_by(anchor)) {
                path.push(anchor);
                return Ok(path);
            }
            let next = self.certificates.iter().find(|candidate| {
                is_ca(candidate)
                    && !path.iter().any(|seen| *seen == *candidate)
                    && current.is_issued_by(candidate)
            });
            match next {
                Some(intermediate) => {
                    path.push(intermediate);
                    current = intermediate;
                }
                None => break,
            }
        }
        Err(VerificationError::UntrustedChain)
    }
}

impl SignedEnvelope for Pkcs7Envelope {
    /// Verifies every signer at `at`.
    ///
    /// Without `trust_anchors` only the signer certificate's own validity is
    /// checked; with them, every certificate on the path to an anchor must be
    /// valid at `at`.
    fn verify_at(
        &self,
        at: OffsetDateTime,
        trust_anchors: Option<&[Certificate]>,
    ) -> VerifyResult<()> {
        let signers = &self.signed_data.signer_infos.0;
        if signers.is_empty() {
            return Err(VerificationError::NoSigners);
        }
        let content = self.content.as_deref().ok_or(VerificationError::MissingContent)?;
        for signer in signers.iter() {
            self.verify_signer(signer, content, at, trust_anchors)?;
        }
        debug!(signers = signers.len(), %at, "envelope verified");
        Ok(())
    }
}

fn find_attribute(attrs: &SignedAttributes, oid: ObjectIdentifier) -> Option<&Any> {
    attrs
        .iter()
        .find(|attr| attr.oid == oid)
        .and_then(|attr| attr.values.iter().next())
}

fn decode_time(value: &Any) -> VerifyResult<OffsetDateTime> {
    let time = Time::from_der(&value.to_der()?)?;
    Ok(OffsetDateTime::from(time.to_system_time()))
}

fn digest_algorithm(algorithm: &AlgorithmIdentifierOwned) -> VerifyResult<DigestAlgorithm> {
    let oid = algorithm.oid;
    if oid == ID_SHA_256 {
        Ok(DigestAlgorithm::Sha256)
    } else if oid == ID_SHA_1 {
        Ok(DigestAlgorithm::Sha1)
    } else {
        Err(VerificationError::UnsupportedAlgorithm(oid.to_string()))
    }
}

/// Signers either name plain `rsaEncryption` and reuse the digest algorithm,
/// or name a combined algorithm.
fn signature_digest(
    algorithm: &AlgorithmIdentifierOwned,
    digest: DigestAlgorithm,
) -> VerifyResult<DigestAlgorithm> {
    let oid = algorithm.oid;
    if oid == RSA_ENCRYPTION {
        Ok(digest)
    } else if oid == SHA_256_WITH_RSA_ENCRYPTION {
        Ok(DigestAlgorithm::Sha256)
    } else if oid == SHA_1_WITH_RSA_ENCRYPTION {
        Ok(DigestAlgorithm::Sha1)
    } else {
        Err(VerificationError::UnsupportedAlgorithm(oid.to_string()))
    }
}

fn is_ca(cert: &Certificate) -> bool {
    matches!(cert.extension::<BasicConstraints>(), Some(Ok(bc)) if bc.is_ca)
}

fn check_validity(cert: &Certificate, at: OffsetDateTime) -> VerifyResult<()> {
    let validity = cert.validity();
    if validity.contains(at) {
        Ok(())
    } else {
        Err(VerificationError::OutsideValidity {
            subject: cert.common_name(),
            at,
            not_before: validity.not_before,
            not_after: validity.not_after,
        })
    }
}

fn to_content_info_der(signed_data: &SignedData) -> Result<Vec<u8>, PushCertError> {
    let content_info = ContentInfo {
        content_type: ID_SIGNED_DATA,
        content: Any::from_der(&signed_data.to_der().map_err(encoding_error)?)
            .map_err(encoding_error)?,
    };
    content_info.to_der().map_err(encoding_error)
}

fn encoding_error(err: der::Error) -> PushCertError {
    PushCertError::EncodingError(err.to_string())
}

/// Produces RSA/SHA-256 `SignedData` envelopes over `id-data` content.
///
/// The signer certificate and any chain certificates are embedded. Signed
/// attributes carry the content type, the message digest and, unless
/// disabled, the signing time.
pub struct Pkcs7Builder<'a> {
    signer: &'a Certificate,
    key: &'a KeyPair,
    chain: Vec<Certificate>,
    detached: bool,
    signing_time: Option<OffsetDateTime>,
}

impl<'a> Pkcs7Builder<'a> {
    pub fn new(signer: &'a Certificate, key: &'a KeyPair) -> Self {
        Self {
            signer,
            key,
            chain: Vec::new(),
            detached: false,
            signing_time: Some(OffsetDateTime::now_utc()),
        }
    }

    /// Additional certificates to embed, typically intermediates.
    pub fn chain(mut self, chain: Vec<Certificate>) -> Self {
        self.chain = chain;
        self
    }

    /// Leaves the content out of the envelope.
    pub fn detached(mut self, detached: bool) -> Self {
        self.detached = detached;
        self
    }

    /// Overrides the signing time attribute; `None` omits it.
    pub fn signing_time(mut self, signing_time: Option<OffsetDateTime>) -> Self {
        self.signing_time = signing_time;
        self
    }

    /// Signs `content` and returns the DER encoded `ContentInfo`.
    pub fn sign(&self, content: &[u8]) -> Result<Vec<u8>, PushCertError> {
        let builder_error = |e: cms::builder::Error| PushCertError::EncodingError(e.to_string());
        let sha256 = AlgorithmIdentifierOwned {
            oid: ID_SHA_256,
            parameters: None,
        };

        let econtent_info = EncapsulatedContentInfo {
            econtent_type: ID_DATA,
            econtent: if self.detached {
                None
            } else {
                Some(Any::new(Tag::OctetString, content).map_err(encoding_error)?)
            },
        };
        let external_digest = self
            .detached
            .then(|| DigestAlgorithm::Sha256.digest(content));
        let signing_key = SigningKey::<Sha256>::new(self.key.private_key().clone());

        let mut signer_info = SignerInfoBuilder::new(
            &signing_key,
            SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
                issuer: self.signer.issuer().clone(),
                serial_number: self.signer.serial_number().clone(),
            }),
            sha256.clone(),
            &econtent_info,
            external_digest.as_deref(),
        )
        .map_err(builder_error)?;
        // Content type and message digest are added by the builder.
        if let Some(signing_time) = self.signing_time {
            signer_info
                .add_signed_attribute(attribute(ID_SIGNING_TIME, &encode_time(signing_time)?)?)
                .map_err(builder_error)?;
        }

        let mut signed_data = SignedDataBuilder::new(&econtent_info);
        signed_data
            .add_digest_algorithm(sha256)
            .map_err(builder_error)?;
        for cert in std::iter::once(self.signer)
            .chain(self.chain.iter().filter(|cert| *cert != self.signer))
        {
            signed_data
                .add_certificate(CertificateChoices::Certificate(cert.inner.clone()))
                .map_err(builder_error)?;
        }
        let content_info = signed_data
            .add_signer_info::<SigningKey<Sha256>, Signature>(signer_info)
            .map_err(builder_error)?
            .build()
            .map_err(builder_error)?;

        debug!(
            detached = self.detached,
            content_len = content.len(),
            "signed envelope"
        );
        content_info.to_der().map_err(encoding_error)
    }
}

fn attribute<T: Encode>(oid: ObjectIdentifier, value: &T) -> Result<Attribute, PushCertError> {
    let value = Any::from_der(&value.to_der().map_err(encoding_error)?).map_err(encoding_error)?;
    Ok(Attribute {
        oid,
        values: SetOfVec::try_from(vec![value]).map_err(encoding_error)?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::LazyLock;

    use time::Duration;

    use super::*;
    use crate::cert::params::{CertificationRequestInfo, DistinguishedName, Validity};
    use crate::issuer::random_serial_number;

    static SIGNER: LazyLock<(KeyPair, Certificate)> = LazyLock::new(|| {
        let key = KeyPair::generate_rsa(2048).unwrap();
        let info = CertificationRequestInfo::builder()
            .subject(
                DistinguishedName::builder()
                    .common_name("device".to_string())
                    .build(),
            )
            .subject_public_key(key.public_key().clone())
            .build();
        let now = OffsetDateTime::now_utc();
        let validity = Validity::new(now - Duration::days(1), now + Duration::days(1)).unwrap();
        let serial = random_serial_number(&mut rand_core::OsRng).unwrap();
        let cert = Certificate::new_self_signed(&info, &key, serial, validity).unwrap();
        (key, cert)
    });

    fn envelope(payload: &[u8], detached: bool) -> Vec<u8> {
        let (key, cert) = &*SIGNER;
        Pkcs7Builder::new(cert, key)
            .detached(detached)
            .sign(payload)
            .unwrap()
    }

    #[test]
    fn test_attached_envelope_verifies() {
        let envelope = Pkcs7Envelope::from_der(&envelope(b"<plist/>", false)).unwrap();
        assert_eq!(envelope.content(), Some(&b"<plist/>"[..]));
        assert_eq!(envelope.certificates().len(), 1);
        assert_eq!(envelope.signer_certificate(), Some(&SIGNER.1));
        envelope.verify_at(OffsetDateTime::now_utc(), None).unwrap();
    }

    #[test]
    fn test_detached_envelope_needs_content() {
        let envelope = Pkcs7Envelope::from_der(&envelope(b"checkin", true)).unwrap();
        assert_eq!(envelope.content(), None);
        assert_eq!(
            envelope.verify_at(OffsetDateTime::now_utc(), None),
            Err(VerificationError::MissingContent)
        );

        let envelope = envelope.with_detached_content(b"checkin".to_vec());
        envelope.verify_at(OffsetDateTime::now_utc(), None).unwrap();
    }

    #[test]
    fn test_wrong_detached_content_is_digest_mismatch() {
        let envelope = Pkcs7Envelope::from_der(&envelope(b"checkin", true))
            .unwrap()
            .with_detached_content(b"tampered".to_vec());
        assert_eq!(
            envelope.verify_at(OffsetDateTime::now_utc(), None),
            Err(VerificationError::DigestMismatch)
        );
    }

    #[test]
    fn test_validity_is_checked_after_signature() {
        let envelope = Pkcs7Envelope::from_der(&envelope(b"payload", false)).unwrap();
        let err = envelope
            .verify_at(OffsetDateTime::now_utc() + Duration::days(2), None)
            .unwrap_err();
        assert!(err.is_validity_window());
    }

    #[test]
    fn test_base64_and_pem_forms() {
        let der = envelope(b"payload", false);
        let encoded = STANDARD.encode(&der);
        Pkcs7Envelope::from_base64(&format!("{encoded}\r\n")).unwrap();

        let pem = crate::pem_utils::der_to_pem(&der, PKCS7_PEM_LABEL);
        let envelope = Pkcs7Envelope::from_pem(pem.as_bytes()).unwrap();
        assert_eq!(envelope.to_der().unwrap(), der);
    }

    #[test]
    fn test_non_octet_string_content_digests_value_octets() {
        let der = envelope(b"payload", false);
        let content_info = ContentInfo::from_der(&der).unwrap();
        let mut signed_data = SignedData::from_der(&content_info.content.to_der().unwrap()).unwrap();
        signed_data.encap_content_info.econtent =
            Some(Any::new(Tag::Utf8String, b"payload".as_slice()).unwrap());

        let envelope = Pkcs7Envelope::from_der(&to_content_info_der(&signed_data).unwrap()).unwrap();
        assert_eq!(envelope.content(), Some(&b"payload"[..]));
        envelope.verify_at(OffsetDateTime::now_utc(), None).unwrap();
    }

    #[test]
    fn test_signed_attributes() {
        let (key, cert) = &*SIGNER;
        let at = OffsetDateTime::now_utc().replace_nanosecond(0).unwrap();
        let der = Pkcs7Builder::new(cert, key)
            .signing_time(Some(at))
            .sign(b"payload")
            .unwrap();
        let envelope = Pkcs7Envelope::from_der(&der).unwrap();
        let signer = envelope.signed_data.signer_infos.0.iter().next().unwrap();
        let attrs = signer.signed_attrs.as_ref().unwrap();
        assert_eq!(attrs.len(), 3);
        assert_eq!(decode_time(find_attribute(attrs, ID_SIGNING_TIME).unwrap()).unwrap(), at);
        assert!(find_attribute(attrs, ID_MESSAGE_DIGEST).is_some());

        let der = Pkcs7Builder::new(cert, key)
            .signing_time(None)
            .detached(true)
            .sign(b"payload")
            .unwrap();
        let envelope = Pkcs7Envelope::from_der(&der).unwrap();
        let signer = envelope.signed_data.signer_infos.0.iter().next().unwrap();
        let attrs = signer.signed_attrs.as_ref().unwrap();
        assert!(find_attribute(attrs, ID_SIGNING_TIME).is_none());
        envelope
            .with_detached_content(b"payload".to_vec())
            .verify_at(OffsetDateTime::now_utc(), None)
            .unwrap();
    }

    #[test]
    fn test_rejects_non_signed_data() {
        let content_info = ContentInfo {
            content_type: ID_DATA,
            content: Any::new(Tag::OctetString, b"plain".as_slice()).unwrap(),
        };
        let err = Pkcs7Envelope::from_der(&content_info.to_der().unwrap()).unwrap_err();
        assert!(matches!(err, VerificationError::Malformed(_)));
        assert!(matches!(
            Pkcs7Envelope::from_base64("%%%"),
            Err(VerificationError::Malformed(_))
        ));
    }
}
