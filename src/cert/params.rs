use bon::Builder;
use const_oid::ObjectIdentifier;
use der::asn1::{Any, PrintableStringRef, SetOfVec};
use der::{Tag, Tagged};
use rsa::RsaPublicKey;
use time::Duration;
use time::OffsetDateTime;
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::name::{RdnSequence, RelativeDistinguishedName};

use super::extensions::ToAndFromX509Extension;
pub use crate::cert::extensions::ExtendedKeyUsage;
pub use crate::cert::extensions::ExtendedKeyUsageOption;
use crate::error::PushCertError;

/// UserID attribute (RFC 4519), the attribute carrying an MDM push topic.
pub const USER_ID_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("0.9.2342.19200300.100.1.1");

const COMMON_NAME_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
const COUNTRY_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.6");
const ORGANIZATION_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.10");
const ORGANIZATION_UNIT_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.11");

/// Parameters for building an X.509 certificate.
///
/// # Fields
/// * `subject` - The distinguished name of the certificate subject.
/// * `subject_public_key` - The public key of the certificate subject.
/// * `usages` - A list of extended key usage options.
/// * `dns_names` - DNS entries for the subject alternative name extension.
/// * `is_ca` - Indicates if the certificate is a CA.
/// * `extensions` - Additional X.509 extensions.
#[derive(Clone, Debug, Builder)]
pub struct CertificationRequestInfo {
    pub subject: DistinguishedName,
    pub subject_public_key: RsaPublicKey,
    #[builder(default)]
    pub usages: Vec<ExtendedKeyUsageOption>,
    #[builder(default)]
    pub dns_names: Vec<String>,
    #[builder(default)]
    pub is_ca: bool,
    #[builder(default)]
    pub extensions: Vec<ExtensionParam>,
}

/// Distinguished name parameters for building an X.509 certificate.
///
/// Attributes are emitted as one RDN each, in the order UID, CN, OU, O, C,
/// followed by `extra_attributes` in the order given.
#[derive(Clone, Debug, Builder, Default)]
pub struct DistinguishedName {
    pub common_name: String,
    /// Push topic, stored in the UserID attribute.
    pub user_id: Option<String>,
    pub organization: Option<String>,
    pub organization_unit: Option<String>,
    pub country: Option<String>,
    /// Additional `(oid, value)` pairs, encoded as UTF8String.
    #[builder(default)]
    pub extra_attributes: Vec<(ObjectIdentifier, String)>,
}

impl DistinguishedName {
    /// Converts the distinguished name to an X.509-compatible format.
    pub fn as_x509_name(&self) -> Result<x509_cert::name::DistinguishedName, PushCertError> {
        let mut attributes = Vec::new();
        if let Some(uid) = &self.user_id {
            attributes.push(utf8_attribute(USER_ID_OID, uid)?);
        }
        attributes.push(utf8_attribute(COMMON_NAME_OID, &self.common_name)?);
        if let Some(ou) = &self.organization_unit {
            attributes.push(utf8_attribute(ORGANIZATION_UNIT_OID, ou)?);
        }
        if let Some(o) = &self.organization {
            attributes.push(utf8_attribute(ORGANIZATION_OID, o)?);
        }
        if let Some(c) = &self.country {
            PrintableStringRef::new(c)
                .map_err(|e| PushCertError::CertificateConstructionError(e.to_string()))?;
            attributes.push(AttributeTypeAndValue {
                oid: COUNTRY_OID,
                value: any_value(Tag::PrintableString, c.as_bytes())?,
            });
        }
        for (oid, value) in &self.extra_attributes {
            attributes.push(utf8_attribute(*oid, value)?);
        }

        let rdns = attributes
            .into_iter()
            .map(|attr| {
                SetOfVec::try_from(vec![attr])
                    .map(RelativeDistinguishedName)
                    .map_err(|e| PushCertError::CertificateConstructionError(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RdnSequence(rdns))
    }

    /// Creates a `DistinguishedName` from an X.509-compatible format.
    ///
    /// Only the first occurrence of each known attribute is kept; unknown
    /// textual attributes end up in `extra_attributes`.
    pub fn from_x509_name(x509dn: &x509_cert::name::DistinguishedName) -> Self {
        let mut dn = DistinguishedName::default();
        for attr in x509dn.0.iter().flat_map(|rdn| rdn.0.iter()) {
            let Some(text) = attribute_text(&attr.value) else {
                continue;
            };
            match attr.oid {
                COMMON_NAME_OID if dn.common_name.is_empty() => dn.common_name = text,
                USER_ID_OID if dn.user_id.is_none() => dn.user_id = Some(text),
                ORGANIZATION_OID if dn.organization.is_none() => dn.organization = Some(text),
                ORGANIZATION_UNIT_OID if dn.organization_unit.is_none() => {
                    dn.organization_unit = Some(text)
                }
                COUNTRY_OID if dn.country.is_none() => dn.country = Some(text),
                oid => dn.extra_attributes.push((oid, text)),
            }
        }
        dn
    }
}

fn utf8_attribute(oid: ObjectIdentifier, value: &str) -> Result<AttributeTypeAndValue, PushCertError> {
    Ok(AttributeTypeAndValue {
        oid,
        value: any_value(Tag::Utf8String, value.as_bytes())?,
    })
}

fn any_value(tag: Tag, bytes: &[u8]) -> Result<Any, PushCertError> {
    Any::new(tag, bytes).map_err(|e| PushCertError::CertificateConstructionError(e.to_string()))
}

/// Returns the attribute value as text when it is one of the ASN.1 string
/// types used in distinguished names.
///
/// TeletexString is read as Latin-1 and BMPString as UTF-16BE.
pub(crate) fn attribute_text(value: &Any) -> Option<String> {
    let bytes = value.value();
    match value.tag() {
        Tag::Utf8String
        | Tag::PrintableString
        | Tag::Ia5String
        | Tag::NumericString
        | Tag::VisibleString => std::str::from_utf8(bytes).ok().map(str::to_string),
        Tag::TeletexString => Some(bytes.iter().map(|&b| char::from(b)).collect()),
        Tag::BmpString => {
            if bytes.len() % 2 != 0 {
                return None;
            }
            let units = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
            char::decode_utf16(units).collect::<Result<String, _>>().ok()
        }
        _ => None,
    }
}

/// Certificate validity period.
///
/// This struct represents the `notBefore` and `notAfter` fields in a certificate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validity {
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl Validity {
    /// Creates a validity period, rejecting windows where `not_after` does not
    /// come strictly after `not_before`.
    pub fn new(not_before: OffsetDateTime, not_after: OffsetDateTime) -> Result<Self, PushCertError> {
        if not_after <= not_before {
            return Err(PushCertError::CertificateConstructionError(format!(
                "certificate NotAfter {not_after} must be later than NotBefore {not_before}"
            )));
        }
        Ok(Self {
            not_before,
            not_after,
        })
    }

    /// Creates a validity period starting now for the given number of days.
    pub fn for_days(days: i64) -> Result<Self, PushCertError> {
        let now = OffsetDateTime::now_utc();
        let not_after = days
            .checked_mul(86_400)
            .and_then(|secs| now.checked_add(Duration::seconds(secs)))
            .ok_or_else(|| {
                PushCertError::CertificateConstructionError(format!("{days} days is out of range"))
            })?;
        Self::new(now, not_after)
    }

    /// Returns `true` when `at` lies inside the (inclusive) window.
    pub fn contains(&self, at: OffsetDateTime) -> bool {
        self.not_before <= at && at <= self.not_after
    }
}

/// Represents an X.509 extension.
///
/// # Fields
/// * `oid` - The object identifier of the extension.
/// * `critical` - Indicates if the extension is critical.
/// * `value` - The DER-encoded value of the extension.
#[derive(Clone, Debug)]
pub struct ExtensionParam {
    pub oid: ObjectIdentifier,
    pub critical: bool,
    /// DER-encoded extension value
    pub value: Vec<u8>,
}

impl ExtensionParam {
    /// Creates an `ExtensionParam` from a specific extension.
    pub fn from_extension<E: ToAndFromX509Extension>(
        extension: E,
        critical: bool,
    ) -> Result<Self, PushCertError> {
        let value = extension.to_x509_extension_value()?;
        Ok(Self {
            oid: E::OID,
            critical,
            value,
        })
    }
}
