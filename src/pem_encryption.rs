//! Legacy PEM key-block encryption (`Proc-Type: 4,ENCRYPTED` + `DEK-Info`).
//!
//! This is the scheme OpenSSL uses for "traditional" encrypted keys: the
//! cipher key is derived from the passphrase and the first eight bytes of the
//! IV with `EVP_BytesToKey` (MD5, one iteration), and the payload is
//! encrypted in CBC mode with PKCS#7 padding.
//!
//! `DES-EDE3-CBC` is what existing tooling expects and stays the default. It
//! is a weak cipher by modern standards; the AES variants use the same header
//! convention and are understood by OpenSSL, but not by every consumer.

use aes::{Aes128, Aes256};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use des::TdesEde3;
use md5::{Digest, Md5};
use rand_core::CryptoRngCore;

use crate::error::PushCertError;

pub const PROC_TYPE_HEADER: &str = "Proc-Type";
pub const DEK_INFO_HEADER: &str = "DEK-Info";
const PROC_TYPE_ENCRYPTED: &str = "4,ENCRYPTED";

/// Ciphers supported in the `DEK-Info` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PemCipher {
    /// Triple DES, the interoperable legacy default.
    #[default]
    DesEde3Cbc,
    Aes128Cbc,
    Aes256Cbc,
}

impl PemCipher {
    pub fn name(self) -> &'static str {
        match self {
            PemCipher::DesEde3Cbc => "DES-EDE3-CBC",
            PemCipher::Aes128Cbc => "AES-128-CBC",
            PemCipher::Aes256Cbc => "AES-256-CBC",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [PemCipher::DesEde3Cbc, PemCipher::Aes128Cbc, PemCipher::Aes256Cbc]
            .into_iter()
            .find(|cipher| cipher.name() == name)
    }

    fn key_len(self) -> usize {
        match self {
            PemCipher::DesEde3Cbc => 24,
            PemCipher::Aes128Cbc => 16,
            PemCipher::Aes256Cbc => 32,
        }
    }

    /// Block size, which is also the IV size.
    fn block_size(self) -> usize {
        match self {
            PemCipher::DesEde3Cbc => 8,
            PemCipher::Aes128Cbc | PemCipher::Aes256Cbc => 16,
        }
    }

    fn encrypt(self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, PushCertError> {
        let invalid = |e: cbc::cipher::InvalidLength| PushCertError::EncodingError(e.to_string());
        Ok(match self {
            PemCipher::DesEde3Cbc => cbc::Encryptor::<TdesEde3>::new_from_slices(key, iv)
                .map_err(invalid)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            PemCipher::Aes128Cbc => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
                .map_err(invalid)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            PemCipher::Aes256Cbc => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
                .map_err(invalid)?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        })
    }

    fn decrypt(self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, PushCertError> {
        let invalid = |e: cbc::cipher::InvalidLength| PushCertError::KeyDecodeError(e.to_string());
        let plaintext = match self {
            PemCipher::DesEde3Cbc => cbc::Decryptor::<TdesEde3>::new_from_slices(key, iv)
                .map_err(invalid)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            PemCipher::Aes128Cbc => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
                .map_err(invalid)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            PemCipher::Aes256Cbc => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
                .map_err(invalid)?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        };
        // A bad padding almost always means a wrong passphrase.
        plaintext.map_err(|_| {
            PushCertError::KeyDecodeError("decryption password incorrect".to_string())
        })
    }
}

/// OpenSSL `EVP_BytesToKey` with MD5 and a single iteration.
fn derive_key(passphrase: &[u8], salt: &[u8], key_len: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(key_len + 16);
    let mut previous: Vec<u8> = Vec::new();
    while key.len() < key_len {
        let mut hasher = Md5::new();
        hasher.update(&previous);
        hasher.update(passphrase);
        hasher.update(salt);
        previous = hasher.finalize().to_vec();
        key.extend_from_slice(&previous);
    }
    key.truncate(key_len);
    key
}

/// An encrypted payload together with the cipher and IV needed to decrypt it.
#[derive(Debug, Clone)]
pub struct EncryptedPayload {
    pub cipher: PemCipher,
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl EncryptedPayload {
    /// `DEK-Info` value: cipher name and upper-case hex IV.
    pub fn dek_info(&self) -> String {
        format!("{},{}", self.cipher.name(), hex::encode_upper(&self.iv))
    }

    /// Wraps the ciphertext in a PEM block carrying `Proc-Type` and `DEK-Info`.
    pub fn into_pem(self, label: &str) -> Result<pem::Pem, PushCertError> {
        let dek_info = self.dek_info();
        let mut block = pem::Pem::new(label, self.ciphertext);
        let header_error = |e: pem::PemError| PushCertError::EncodingError(e.to_string());
        block
            .headers_mut()
            .add(PROC_TYPE_HEADER, PROC_TYPE_ENCRYPTED)
            .map_err(header_error)?;
        block
            .headers_mut()
            .add(DEK_INFO_HEADER, &dek_info)
            .map_err(header_error)?;
        Ok(block)
    }
}

/// Returns `true` when the block carries a `DEK-Info` header.
pub fn is_encrypted(block: &pem::Pem) -> bool {
    block.headers().get(DEK_INFO_HEADER).is_some()
}

/// Encrypts `plaintext` with a random IV drawn from `rng`.
pub fn encrypt<R: CryptoRngCore + ?Sized>(
    rng: &mut R,
    plaintext: &[u8],
    passphrase: &[u8],
    cipher: PemCipher,
) -> Result<EncryptedPayload, PushCertError> {
    let mut iv = vec![0u8; cipher.block_size()];
    rng.try_fill_bytes(&mut iv)
        .map_err(|e| PushCertError::KeyGenerationError(e.to_string()))?;
    // The salt is the first 8 bytes of the IV, whatever the block size.
    let key = derive_key(passphrase, &iv[..8], cipher.key_len());
    let ciphertext = cipher.encrypt(&key, &iv, plaintext)?;
    Ok(EncryptedPayload {
        cipher,
        iv,
        ciphertext,
    })
}

/// Decrypts an encrypted block with `passphrase`.
pub fn decrypt(block: &pem::Pem, passphrase: &[u8]) -> Result<Vec<u8>, PushCertError> {
    let dek_info = block
        .headers()
        .get(DEK_INFO_HEADER)
        .ok_or_else(|| PushCertError::KeyDecodeError("block is not encrypted".to_string()))?;
    let (cipher_name, iv_hex) = dek_info
        .split_once(',')
        .ok_or_else(|| PushCertError::KeyDecodeError(format!("malformed DEK-Info {dek_info:?}")))?;
    let cipher = PemCipher::from_name(cipher_name.trim()).ok_or_else(|| {
        PushCertError::KeyDecodeError(format!("unsupported encryption cipher {cipher_name}"))
    })?;
    let iv = hex::decode(iv_hex.trim())
        .map_err(|e| PushCertError::KeyDecodeError(format!("malformed DEK-Info IV: {e}")))?;
    if iv.len() != cipher.block_size() {
        return Err(PushCertError::KeyDecodeError(format!(
            "DEK-Info IV is {} bytes, {} expects {}",
            iv.len(),
            cipher.name(),
            cipher.block_size()
        )));
    }
    let ciphertext = block.contents();
    if ciphertext.is_empty() || ciphertext.len() % cipher.block_size() != 0 {
        return Err(PushCertError::KeyDecodeError(
            "encrypted PEM data is not a multiple of the block size".to_string(),
        ));
    }
    let key = derive_key(passphrase, &iv[..8], cipher.key_len());
    cipher.decrypt(&key, &iv, ciphertext)
}
