use der::asn1::{GeneralizedTime, OctetString, UtcTime};
use rsa::RsaPublicKey;
use time::OffsetDateTime;
use x509_cert::Version;
use x509_cert::certificate::TbsCertificateInner;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::Time;

use crate::cert::SignatureAlgorithm;
use crate::cert::params::{ExtensionParam, Validity};
use crate::error::PushCertError;

/// Represents the "To Be Signed" (TBS) portion of an X.509 certificate.
///
/// # Fields
/// * `serial_number` - The unique identifier for the certificate.
/// * `signature_algorithm` - The algorithm used to sign the certificate.
/// * `issuer` - The distinguished name of the certificate issuer.
/// * `validity` - The certificate's validity period.
/// * `subject` - The distinguished name of the certificate subject.
/// * `subject_public_key` - The public key of the certificate subject.
/// * `extensions` - Additional X.509 extensions for the certificate.
pub struct TbsCertificate {
    pub serial_number: SerialNumber,
    pub signature_algorithm: SignatureAlgorithm,
    pub issuer: Name,
    pub validity: Validity,
    pub subject: Name,
    pub subject_public_key: RsaPublicKey,
    pub extensions: Vec<ExtensionParam>,
}

impl TbsCertificate {
    /// Converts the `TbsCertificate` into a `TbsCertificateInner` for DER encoding.
    pub fn to_tbs_certificate_inner(&self) -> Result<TbsCertificateInner, PushCertError> {
        let algorithm_id = self.signature_algorithm.to_algorithm_identifier()?;

        let extensions = self
            .extensions
            .iter()
            .map(|ext| {
                Ok(x509_cert::ext::Extension {
                    extn_id: ext.oid,
                    critical: ext.critical,
                    extn_value: OctetString::new(ext.value.clone()).map_err(construction_error)?,
                })
            })
            .collect::<Result<Vec<_>, PushCertError>>()?;

        let validity = x509_cert::time::Validity {
            not_before: encode_time(self.validity.not_before)?,
            not_after: encode_time(self.validity.not_after)?,
        };

        let subject_public_key_info =
            x509_cert::spki::SubjectPublicKeyInfoOwned::from_key(self.subject_public_key.clone())
                .map_err(|e| PushCertError::CertificateConstructionError(e.to_string()))?;

        Ok(TbsCertificateInner {
            version: Version::V3,
            serial_number: self.serial_number.clone(),
            signature: algorithm_id,
            issuer: self.issuer.clone(),
            validity,
            subject: self.subject.clone(),
            subject_public_key_info,
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: if extensions.is_empty() {
                None
            } else {
                Some(extensions)
            },
        })
    }
}

fn construction_error(err: der::Error) -> PushCertError {
    PushCertError::CertificateConstructionError(err.to_string())
}

/// RFC 5280: UTCTime through 2049, GeneralizedTime from 2050 on.
pub(crate) fn encode_time(at: OffsetDateTime) -> Result<Time, PushCertError> {
    if at.year() < 2050 {
        Ok(Time::UtcTime(
            UtcTime::from_system_time(at.into()).map_err(construction_error)?,
        ))
    } else {
        Ok(Time::GeneralTime(
            GeneralizedTime::from_system_time(at.into()).map_err(construction_error)?,
        ))
    }
}
