//! PEM encoding and decoding of certificates and RSA private keys.
//!
//! Text around the blocks (such as the `Bag Attributes` lines `openssl pkcs12`
//! writes) is skipped, but the first malformed or mistyped block fails the
//! whole input, as does trailing non-PEM text. Encoded output is returned as
//! bytes; writing it to storage is up to the caller.

use rand_core::CryptoRngCore;
use tracing::{debug, warn};

use crate::cert::Certificate;
use crate::error::{PushCertError, Result};
use crate::key::KeyPair;
use crate::pem_encryption::{self, PemCipher};
use crate::pem_utils::{self, BlockScanner, der_to_pem};

pub const CERTIFICATE_PEM_LABEL: &str = "CERTIFICATE";
pub const RSA_PRIVATE_KEY_PEM_LABEL: &str = "RSA PRIVATE KEY";

/// Decodes every certificate from a sequence of `CERTIFICATE` blocks.
///
/// The block payloads are concatenated first and the combined buffer is
/// parsed as consecutive DER certificates.
pub fn decode_certificates(input: &[u8]) -> Result<Vec<Certificate>> {
    let mut der = Vec::new();
    let mut block_count = 0usize;
    for block in BlockScanner::new(input)? {
        let block = block?;
        if block.tag() != CERTIFICATE_PEM_LABEL {
            return Err(PushCertError::ArmorDecodeError(format!(
                "expected {CERTIFICATE_PEM_LABEL} block, found {}",
                block.tag()
            )));
        }
        der.extend_from_slice(block.contents());
        block_count += 1;
    }
    if block_count == 0 {
        return Err(PushCertError::ArmorDecodeError(
            "no PEM block found".to_string(),
        ));
    }

    let certificates = Certificate::parse_many(&der)
        .map_err(|e| PushCertError::ArmorDecodeError(format!("invalid certificate DER: {e}")))?;
    debug!(
        blocks = block_count,
        certificates = certificates.len(),
        "decoded certificates"
    );
    Ok(certificates)
}

/// Decodes exactly one certificate.
pub fn decode_single_certificate(input: &[u8]) -> Result<Certificate> {
    let mut certificates = decode_certificates(input)?;
    if certificates.len() != 1 {
        return Err(PushCertError::CardinalityError(certificates.len()));
    }
    Ok(certificates.remove(0))
}

/// Decodes the first PEM block as an `RSA PRIVATE KEY`, decrypting it with
/// `passphrase` when the block is encrypted. Blocks after the first are
/// ignored, so a key file with the certificate appended still decodes.
///
/// The passphrase must be present exactly when the block is encrypted:
/// `MissingPassphraseError` and `UnexpectedPassphraseError` report the
/// mismatch either way.
pub fn decode_key(input: &[u8], passphrase: Option<&[u8]>) -> Result<KeyPair> {
    let key_error = |e: PushCertError| PushCertError::KeyDecodeError(e.to_string());
    let block = BlockScanner::new(input)
        .map_err(key_error)?
        .next()
        .ok_or_else(|| PushCertError::KeyDecodeError("PEM decode failed".to_string()))?
        .map_err(key_error)?;
    if block.tag() != RSA_PRIVATE_KEY_PEM_LABEL {
        return Err(PushCertError::KeyDecodeError(format!(
            "expecting PEM type of {RSA_PRIVATE_KEY_PEM_LABEL}, but got {}",
            block.tag()
        )));
    }

    let encrypted = pem_encryption::is_encrypted(&block);
    debug!(encrypted, "decoding private key");
    match (encrypted, passphrase) {
        (true, None) => Err(PushCertError::MissingPassphraseError),
        (false, Some(_)) => Err(PushCertError::UnexpectedPassphraseError),
        (true, Some(passphrase)) => {
            let der = pem_encryption::decrypt(&block, passphrase)?;
            KeyPair::from_pkcs1_der(&der)
        }
        (false, None) => KeyPair::from_pkcs1_der(block.contents()),
    }
}

/// Encodes a certificate as a `CERTIFICATE` block.
pub fn encode_certificate(certificate: &Certificate) -> Result<Vec<u8>> {
    let der = certificate.to_der()?;
    Ok(der_to_pem(&der, CERTIFICATE_PEM_LABEL).into_bytes())
}

/// Encodes a private key as an `RSA PRIVATE KEY` block, encrypted with
/// DES-EDE3-CBC when a passphrase is supplied.
pub fn encode_key(key: &KeyPair, passphrase: Option<&[u8]>) -> Result<Vec<u8>> {
    match passphrase {
        Some(passphrase) => {
            encode_encrypted_key(key, passphrase, PemCipher::default(), &mut rand_core::OsRng)
        }
        None => {
            let der = key.to_pkcs1_der()?;
            Ok(der_to_pem(&der, RSA_PRIVATE_KEY_PEM_LABEL).into_bytes())
        }
    }
}

/// Encodes an encrypted private key with an explicit cipher, drawing the IV
/// from `rng`.
///
/// [`PemCipher::DesEde3Cbc`] is what [`encode_key`] uses; the AES ciphers are
/// stronger but not understood by every legacy consumer.
pub fn encode_key_with_cipher<R: CryptoRngCore + ?Sized>(
    key: &KeyPair,
    passphrase: &[u8],
    cipher: PemCipher,
    rng: &mut R,
) -> Result<Vec<u8>> {
    if cipher == PemCipher::DesEde3Cbc {
        warn!("encrypting private key with legacy DES-EDE3-CBC, prefer an AES cipher where consumers allow");
    }
    encode_encrypted_key(key, passphrase, cipher, rng)
}

fn encode_encrypted_key<R: CryptoRngCore + ?Sized>(
    key: &KeyPair,
    passphrase: &[u8],
    cipher: PemCipher,
    rng: &mut R,
) -> Result<Vec<u8>> {
    let der = key.to_pkcs1_der()?;
    let block = pem_encryption::encrypt(rng, &der, passphrase, cipher)?
        .into_pem(RSA_PRIVATE_KEY_PEM_LABEL)?;
    Ok(pem_utils::encode(&block).into_bytes())
}
