use rand_core::CryptoRngCore;
use rsa::{
    RsaPrivateKey, RsaPublicKey,
    pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey},
    pkcs1v15::{Signature, SigningKey, VerifyingKey},
    signature::{SignatureEncoding, Signer, Verifier},
};
use sha1::Sha1;
use sha2::Sha256;

use crate::error::{PushCertError, Result};

/// Modulus size used for every generated key.
pub const RSA_KEY_BITS: usize = 2048;

/// An RSA private key together with its public half.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPair {
    private: Box<RsaPrivateKey>,
    public: RsaPublicKey,
}

impl KeyPair {
    /// Generate an RSA key pair with the specified number of bits using the
    /// operating system's random source.
    pub fn generate_rsa(bits: usize) -> Result<Self> {
        Self::generate_rsa_with_rng(&mut rand_core::OsRng, bits)
    }

    /// Generate an RSA key pair drawing entropy from `rng`.
    pub fn generate_rsa_with_rng<R: CryptoRngCore + ?Sized>(rng: &mut R, bits: usize) -> Result<Self> {
        if bits < RSA_KEY_BITS {
            return Err(PushCertError::KeyGenerationError(format!(
                "refusing to generate a {bits}-bit RSA key, minimum is {RSA_KEY_BITS}"
            )));
        }
        let private = RsaPrivateKey::new(rng, bits)
            .map_err(|e| PushCertError::KeyGenerationError(e.to_string()))?;
        Ok(Self::from_private_key(private))
    }

    pub fn from_private_key(private: RsaPrivateKey) -> Self {
        let public = RsaPublicKey::from(&private);
        KeyPair {
            private: Box::new(private),
            public,
        }
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Encodes the private key as a DER `RSAPrivateKey` (PKCS#1) structure.
    pub fn to_pkcs1_der(&self) -> Result<Vec<u8>> {
        let doc = self
            .private
            .to_pkcs1_der()
            .map_err(|e| PushCertError::EncodingError(e.to_string()))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// Parses a DER `RSAPrivateKey` (PKCS#1) structure.
    pub fn from_pkcs1_der(der: &[u8]) -> Result<Self> {
        let private = RsaPrivateKey::from_pkcs1_der(der)
            .map_err(|e| PushCertError::KeyDecodeError(e.to_string()))?;
        Ok(Self::from_private_key(private))
    }

    /// Signs `data` with RSASSA-PKCS1-v1_5 over SHA-256.
    pub fn sign_data(&self, data: &[u8]) -> Result<Vec<u8>> {
        let signing_key = SigningKey::<Sha256>::new(self.private.as_ref().clone());
        let signature = signing_key
            .try_sign(data)
            .map_err(|e| PushCertError::CertificateConstructionError(e.to_string()))?;
        Ok(signature.to_vec())
    }
}

/// Digest algorithms accepted on signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
}

impl DigestAlgorithm {
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        use sha2::Digest;
        match self {
            DigestAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
            DigestAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

/// Checks an RSASSA-PKCS1-v1_5 signature made with `digest`.
pub fn verify_rsa_signature(
    public: &RsaPublicKey,
    digest: DigestAlgorithm,
    message: &[u8],
    signature: &[u8],
) -> bool {
    let Ok(signature) = Signature::try_from(signature) else {
        return false;
    };
    match digest {
        DigestAlgorithm::Sha1 => VerifyingKey::<Sha1>::new(public.clone())
            .verify(message, &signature)
            .is_ok(),
        DigestAlgorithm::Sha256 => VerifyingKey::<Sha256>::new(public.clone())
            .verify(message, &signature)
            .is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_short_modulus() {
        let err = KeyPair::generate_rsa(1024).unwrap_err();
        assert!(matches!(err, PushCertError::KeyGenerationError(_)));
    }

    #[test]
    fn test_sign_and_verify() {
        let key = KeyPair::generate_rsa(RSA_KEY_BITS).unwrap();
        let signature = key.sign_data(b"payload").unwrap();
        assert!(verify_rsa_signature(
            key.public_key(),
            DigestAlgorithm::Sha256,
            b"payload",
            &signature
        ));
        assert!(!verify_rsa_signature(
            key.public_key(),
            DigestAlgorithm::Sha256,
            b"other payload",
            &signature
        ));
        assert!(!verify_rsa_signature(
            key.public_key(),
            DigestAlgorithm::Sha1,
            b"payload",
            &signature
        ));
    }

    #[test]
    fn test_pkcs1_der_round_trip() {
        let key = KeyPair::generate_rsa(RSA_KEY_BITS).unwrap();
        let der = key.to_pkcs1_der().unwrap();
        assert_eq!(KeyPair::from_pkcs1_der(&der).unwrap(), key);
    }
}
