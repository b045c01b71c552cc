//! Cryptographic primitives for the verifier.

use crate::types::{Hash256, NodePublicKey, Nonce};
pub use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use sha2::Sha256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Key encoding failed: {0}")]
    KeyEncoding(String),

    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),
}

/// Compute Blake3 hash of data (faster, for non-consensus critical paths).
pub fn blake3(data: &[u8]) -> Hash256 {
    let hash = blake3::hash(data);
    *hash.as_bytes()
}

/// Generate an unpredictable alphanumeric challenge nonce.
pub fn generate_nonce(length: usize) -> Nonce {
    let nonce: String = OsRng
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    Nonce(nonce)
}

/// Import an RSA public key from PEM, accepting both SPKI and PKCS#1 framing.
pub fn import_public_key(key: &NodePublicKey) -> Result<RsaPublicKey, CryptoError> {
    let pem = key.as_str().trim();
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// Encrypt `plaintext` to the node's public key with RSA-OAEP (SHA-256).
pub fn seal_to_public_key(key: &NodePublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let public_key = import_public_key(key)?;
    let ciphertext = public_key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)?;
    Ok(ciphertext)
}

/// A signer that can create Ed25519 signatures.
pub struct Signer {
    signing_key: SigningKey,
}

impl Signer {
    /// Create a new signer from a signing key.
    pub fn new(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Generate a new random signing key.
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        Self { signing_key }
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        use ed25519_dalek::Signer as _;
        self.signing_key.sign(message)
    }

    /// Get the verifying (public) key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Get the signing key (use with caution).
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::test_keypair;

    #[test]
    fn test_blake3() {
        let data = b"test data";
        assert_eq!(blake3(data), blake3(data));
    }

    #[test]
    fn test_nonce_shape() {
        let nonce = generate_nonce(20);
        assert_eq!(nonce.as_str().len(), 20);
        assert!(nonce.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_seal_and_open() {
        let (private_key, public_key) = test_keypair().unwrap();
        let ciphertext = seal_to_public_key(&public_key, b"share").unwrap();

        let plaintext = private_key.decrypt(Oaep::new::<Sha256>(), &ciphertext).unwrap();
        assert_eq!(plaintext, b"share");
    }

    #[test]
    fn test_rejects_garbage_key() {
        let key = NodePublicKey("not a key".to_string());
        assert!(matches!(
            seal_to_public_key(&key, b"share"),
            Err(CryptoError::InvalidPublicKey(_))
        ));
    }

    #[test]
    fn test_signer() {
        let signer = Signer::generate();
        let message = b"test message";
        let signature = signer.sign(message);

        use ed25519_dalek::Verifier;
        assert!(signer.verifying_key().verify(message, &signature).is_ok());
    }
}
