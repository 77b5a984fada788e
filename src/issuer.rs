use der::Encode;
use der::flagset::FlagSet;
use rand_core::CryptoRngCore;
use tracing::debug;
use x509_cert::certificate::CertificateInner;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;

use crate::cert::Certificate;
use crate::cert::SignatureAlgorithm;
use crate::cert::extensions::BasicConstraints;
use crate::cert::extensions::ExtendedKeyUsage;
use crate::cert::extensions::ExtendedKeyUsageOption;
use crate::cert::extensions::KeyUsage;
use crate::cert::extensions::KeyUsages;
use crate::cert::extensions::SubjectAltName;
use crate::cert::params::Validity;
use crate::cert::params::{CertificationRequestInfo, DistinguishedName, ExtensionParam};
use crate::error::{PushCertError, Result};
use crate::key::{KeyPair, RSA_KEY_BITS};
use crate::tbs_certificate::TbsCertificate;

/// Size of generated serial numbers in bytes (128 bits).
pub const SERIAL_NUMBER_BYTES: usize = 16;

/// Represents an entity capable of issuing certificates.
pub trait Issuer {
    /// Returns the distinguished name of the issuer.
    fn issuer_name(&self) -> Name;

    /// Returns the signing key of the issuer.
    fn signing_key(&self) -> &KeyPair;

    /// Issues a certificate based on the provided certification request information.
    ///
    /// # Arguments
    /// * `cert_request` - The certification request information containing details about the certificate to be issued.
    /// * `serial_number` - The serial number of the new certificate.
    /// * `validity` - The validity window of the new certificate.
    ///
    /// # Returns
    /// The issued certificate, or `CertificateConstructionError` if any part
    /// of the template cannot be encoded or signed.
    fn issue(
        &self,
        cert_request: &CertificationRequestInfo,
        serial_number: SerialNumber,
        validity: Validity,
    ) -> Result<Certificate> {
        let signature_algo = SignatureAlgorithm::Sha256WithRSA;
        let validity = Validity::new(validity.not_before, validity.not_after)?;

        let basic_constraints = BasicConstraints {
            is_ca: cert_request.is_ca,
            max_path_length: None,
        };

        let mut extensions: Vec<ExtensionParam> =
            vec![ExtensionParam::from_extension(basic_constraints, true)?];

        let mut key_usage_flags: FlagSet<KeyUsages> = FlagSet::empty();

        if cert_request.is_ca {
            key_usage_flags |= KeyUsages::KeyCertSign;
            key_usage_flags |= KeyUsages::CRLSign;
        }

        for usage in &cert_request.usages {
            match usage {
                ExtendedKeyUsageOption::ClientAuth | ExtendedKeyUsageOption::ServerAuth => {
                    key_usage_flags |= KeyUsages::KeyEncipherment;
                    key_usage_flags |= KeyUsages::DigitalSignature;
                }
                ExtendedKeyUsageOption::EmailProtection => {
                    key_usage_flags |= KeyUsages::KeyEncipherment;
                }
                ExtendedKeyUsageOption::CodeSigning
                | ExtendedKeyUsageOption::TimeStamping
                | ExtendedKeyUsageOption::OcspSigning => {
                    key_usage_flags |= KeyUsages::DigitalSignature;
                }
            }
        }

        if !key_usage_flags.is_empty() {
            let key_usage = KeyUsage(key_usage_flags);
            extensions.push(ExtensionParam::from_extension(key_usage, true)?);
        }

        if !cert_request.usages.is_empty() {
            let extended_key_usage = ExtendedKeyUsage {
                usage: cert_request.usages.clone(),
            };
            extensions.push(ExtensionParam::from_extension(extended_key_usage, false)?);
        }

        if !cert_request.dns_names.is_empty() {
            let san = SubjectAltName {
                names: cert_request.dns_names.clone(),
            };
            extensions.push(ExtensionParam::from_extension(san, false)?);
        }

        let combined_extensions = cert_request
            .extensions
            .iter()
            .cloned()
            .chain(extensions)
            .collect();

        let tbs_cert = TbsCertificate {
            serial_number,
            signature_algorithm: signature_algo,
            issuer: self.issuer_name(),
            validity,
            subject: cert_request.subject.as_x509_name()?,
            subject_public_key: cert_request.subject_public_key.clone(),
            extensions: combined_extensions,
        };

        let tbs_cert_inner = tbs_cert.to_tbs_certificate_inner()?;
        let tbs_der = tbs_cert_inner
            .to_der()
            .map_err(|e| PushCertError::CertificateConstructionError(e.to_string()))?;

        let signature = self.signing_key().sign_data(&tbs_der)?;

        let cert_inner = CertificateInner {
            tbs_certificate: tbs_cert_inner,
            signature_algorithm: signature_algo.to_algorithm_identifier()?,
            signature: der::asn1::BitString::from_bytes(&signature)
                .map_err(|e| PushCertError::CertificateConstructionError(e.to_string()))?,
        };

        Ok(Certificate { inner: cert_inner })
    }
}

/// Draws a serial number uniformly from [0, 2^128).
pub fn random_serial_number<R: CryptoRngCore + ?Sized>(rng: &mut R) -> Result<SerialNumber> {
    let mut bytes = [0u8; SERIAL_NUMBER_BYTES];
    rng.try_fill_bytes(&mut bytes)
        .map_err(|e| PushCertError::KeyGenerationError(e.to_string()))?;
    SerialNumber::new(&bytes).map_err(|e| PushCertError::KeyGenerationError(e.to_string()))
}

/// Generates a 2048-bit RSA key and a self-signed server certificate for
/// `common_name`, valid from now for `validity_days` days.
pub fn generate(common_name: &str, validity_days: i64) -> Result<(KeyPair, Certificate)> {
    generate_with_rng(&mut rand_core::OsRng, common_name, validity_days)
}

/// Same as [`generate`], drawing the key and serial number from `rng`.
///
/// The certificate carries `common_name` as subject CN and as its only DNS
/// name, key usage {keyEncipherment, digitalSignature}, extended key usage
/// {serverAuth} and basic constraints marking it as a non-CA leaf.
pub fn generate_with_rng<R: CryptoRngCore + ?Sized>(
    rng: &mut R,
    common_name: &str,
    validity_days: i64,
) -> Result<(KeyPair, Certificate)> {
    if validity_days <= 0 {
        return Err(PushCertError::CertificateConstructionError(format!(
            "validity of {validity_days} days leaves NotAfter at or before NotBefore"
        )));
    }
    let key = KeyPair::generate_rsa_with_rng(rng, RSA_KEY_BITS)?;
    let serial_number = random_serial_number(rng)?;
    let validity = Validity::for_days(validity_days)?;

    let subject = DistinguishedName::builder()
        .common_name(common_name.to_string())
        .build();
    let cert_info = CertificationRequestInfo::builder()
        .subject(subject)
        .subject_public_key(key.public_key().clone())
        .usages(vec![ExtendedKeyUsageOption::ServerAuth])
        .dns_names(vec![common_name.to_string()])
        .build();

    let cert = Certificate::new_self_signed(&cert_info, &key, serial_number, validity)?;
    // Hand back the certificate as a verifier would see it.
    let cert = Certificate::from_der(&cert.to_der()?)
        .map_err(|e| PushCertError::CertificateConstructionError(e.to_string()))?;

    debug!(
        common_name,
        validity_days,
        not_after = %cert.not_after(),
        "generated self-signed certificate"
    );
    Ok((key, cert))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::{CryptoRng, RngCore};

    struct FailingRng;

    impl RngCore for FailingRng {
        fn next_u32(&mut self) -> u32 {
            0
        }

        fn next_u64(&mut self) -> u64 {
            0
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0)
        }

        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> std::result::Result<(), rand_core::Error> {
            Err(rand_core::Error::new("entropy source unavailable"))
        }
    }

    impl CryptoRng for FailingRng {}

    #[test]
    fn test_serial_number_failure_is_key_generation_error() {
        let err = random_serial_number(&mut FailingRng).unwrap_err();
        assert!(matches!(err, PushCertError::KeyGenerationError(_)));
    }

    #[test]
    fn test_serial_numbers_are_independent() {
        let a = random_serial_number(&mut rand_core::OsRng).unwrap();
        let b = random_serial_number(&mut rand_core::OsRng).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_generate_rejects_non_positive_validity() {
        let err = generate("example.com", 0).unwrap_err();
        assert!(matches!(err, PushCertError::CertificateConstructionError(_)));
    }
}
