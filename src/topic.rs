//! Push topic extraction.
//!
//! MDM push certificates carry their topic in the subject UserID attribute,
//! e.g. `UID=com.apple.mgmt.External.8a2c...`.

use crate::cert::Certificate;
use crate::cert::params::{USER_ID_OID, attribute_text};
use crate::error::{PushCertError, Result};

/// Every valid push topic starts with this prefix.
pub const PUSH_TOPIC_PREFIX: &str = "com.apple.mgmt";

/// Extracts the push topic from the certificate subject.
///
/// Only the first UserID attribute, in stored subject order, is considered.
pub fn extract_topic(cert: &Certificate) -> Result<String> {
    let user_id = cert
        .subject()
        .0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .find(|attr| attr.oid == USER_ID_OID)
        .ok_or(PushCertError::TopicNotFoundError)?;

    match attribute_text(&user_id.value) {
        Some(uid) if uid.starts_with(PUSH_TOPIC_PREFIX) => Ok(uid),
        Some(uid) => Err(PushCertError::InvalidTopicError(uid)),
        None => Err(PushCertError::InvalidTopicError(hex::encode(user_id.value.value()))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::LazyLock;

    use der::Tag;
    use der::asn1::{Any, SetOfVec};
    use x509_cert::attr::AttributeTypeAndValue;
    use x509_cert::name::{RdnSequence, RelativeDistinguishedName};

    use super::*;
    use crate::cert::params::{CertificationRequestInfo, DistinguishedName, Validity};
    use crate::issuer::random_serial_number;
    use crate::key::KeyPair;

    static KEY: LazyLock<KeyPair> = LazyLock::new(|| KeyPair::generate_rsa(2048).unwrap());

    fn cert_with_subject(subject: DistinguishedName) -> Certificate {
        let info = CertificationRequestInfo::builder()
            .subject(subject)
            .subject_public_key(KEY.public_key().clone())
            .build();
        let serial = random_serial_number(&mut rand_core::OsRng).unwrap();
        Certificate::new_self_signed(&info, &KEY, serial, Validity::for_days(1).unwrap()).unwrap()
    }

    #[test]
    fn test_topic_returned_verbatim() {
        let cert = cert_with_subject(
            DistinguishedName::builder()
                .common_name("APSP:1234".to_string())
                .user_id("com.apple.mgmt.example".to_string())
                .build(),
        );
        assert_eq!(extract_topic(&cert).unwrap(), "com.apple.mgmt.example");
    }

    #[test]
    fn test_wrong_prefix_is_invalid() {
        let cert = cert_with_subject(
            DistinguishedName::builder()
                .common_name("APSP:1234".to_string())
                .user_id("not-valid-prefix".to_string())
                .build(),
        );
        assert!(matches!(
            extract_topic(&cert),
            Err(PushCertError::InvalidTopicError(uid)) if uid == "not-valid-prefix"
        ));
    }

    #[test]
    fn test_missing_user_id() {
        let cert = cert_with_subject(
            DistinguishedName::builder()
                .common_name("com.apple.mgmt.in-the-cn".to_string())
                .build(),
        );
        assert!(matches!(
            extract_topic(&cert),
            Err(PushCertError::TopicNotFoundError)
        ));
    }

    #[test]
    fn test_first_user_id_wins() {
        let cert = cert_with_subject(
            DistinguishedName::builder()
                .common_name("APSP:1234".to_string())
                .user_id("com.apple.mgmt.first".to_string())
                .extra_attributes(vec![(USER_ID_OID, "com.apple.mgmt.second".to_string())])
                .build(),
        );
        assert_eq!(extract_topic(&cert).unwrap(), "com.apple.mgmt.first");
    }

    fn cert_with_raw_user_id(tag: Tag, bytes: Vec<u8>) -> Certificate {
        let mut cert = cert_with_subject(
            DistinguishedName::builder()
                .common_name("APSP:1234".to_string())
                .build(),
        );
        let value = AttributeTypeAndValue {
            oid: USER_ID_OID,
            value: Any::new(tag, bytes).unwrap(),
        };
        let rdn = RelativeDistinguishedName(SetOfVec::try_from(vec![value]).unwrap());
        cert.inner.tbs_certificate.subject = RdnSequence(vec![rdn]);
        cert
    }

    #[test]
    fn test_non_text_user_id_is_invalid() {
        let cert = cert_with_raw_user_id(Tag::OctetString, vec![0xde, 0xad]);
        assert!(matches!(
            extract_topic(&cert),
            Err(PushCertError::InvalidTopicError(value)) if value == "dead"
        ));
    }

    #[test]
    fn test_bmp_string_user_id() {
        let utf16: Vec<u8> = "com.apple.mgmt.bmp"
            .encode_utf16()
            .flat_map(u16::to_be_bytes)
            .collect();
        let cert = cert_with_raw_user_id(Tag::BmpString, utf16);
        assert_eq!(extract_topic(&cert).unwrap(), "com.apple.mgmt.bmp");

        // Odd length is not UTF-16.
        let cert = cert_with_raw_user_id(Tag::BmpString, vec![0x00, 0x63, 0x00]);
        assert!(matches!(
            extract_topic(&cert),
            Err(PushCertError::InvalidTopicError(value)) if value == "006300"
        ));
    }

    #[test]
    fn test_numeric_and_teletex_user_ids_are_text() {
        let cert = cert_with_raw_user_id(Tag::NumericString, b"0123 456".to_vec());
        assert!(matches!(
            extract_topic(&cert),
            Err(PushCertError::InvalidTopicError(value)) if value == "0123 456"
        ));

        let cert = cert_with_raw_user_id(Tag::TeletexString, b"com.apple.mgmt.caf\xe9".to_vec());
        assert_eq!(extract_topic(&cert).unwrap(), "com.apple.mgmt.caf\u{e9}");
    }
}
