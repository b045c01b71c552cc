//! Secret provisioning: delivering the verifier's secret share to a node.
//!
//! The share is encrypted to the node's trusted public key once and the
//! ciphertext is cached on the record. Rotating the trusted key drops the
//! cache (see [`NodeRecord::rotate_trusted_key`]), so a cached ciphertext is
//! always for the current key.

use crate::config::VerifierConfig;
use crate::crypto::{seal_to_public_key, CryptoError};
use crate::record::NodeRecord;
use crate::serialization::{to_wire_json, SerializationError};
use crate::types::NodeId;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Body pushed to the node once it has been verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretPayload {
    /// Base64 of the RSA-OAEP ciphertext
    pub encrypted_key: String,
}

impl SecretPayload {
    fn from_ciphertext(ciphertext: &[u8]) -> Self {
        Self {
            encrypted_key: STANDARD.encode(ciphertext),
        }
    }

    pub fn to_json(&self) -> Result<String, SerializationError> {
        to_wire_json(self)
    }

    /// Raw ciphertext bytes.
    pub fn ciphertext(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.encrypted_key)
    }
}

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("Node {0} has no trusted public key; validate a quote first")]
    NoTrustedKey(NodeId),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

pub struct SecretProvisioner {
    config: VerifierConfig,
}

impl SecretProvisioner {
    pub fn new(config: VerifierConfig) -> Self {
        Self { config }
    }

    /// Build the payload carrying the secret share for `record`.
    ///
    /// Reuses the cached ciphertext when there is one; otherwise encrypts
    /// the share under the trusted key and caches the result.
    pub fn prepare_secret_payload(&self, record: &mut NodeRecord) -> Result<SecretPayload, ProvisioningError> {
        if self.config.insecure_debug {
            debug!(
                node_id = %record.node_id,
                secret_share = %STANDARD.encode(record.secret_share.as_bytes()),
                "secret share (not encrypted)"
            );
        }

        if let Some(ciphertext) = record.cached_secret_ciphertext() {
            debug!(node_id = %record.node_id, "re-using cached encrypted secret");
            return Ok(SecretPayload::from_ciphertext(ciphertext));
        }

        let key = record
            .trusted_public_key()
            .ok_or_else(|| ProvisioningError::NoTrustedKey(record.node_id.clone()))?;
        let ciphertext = seal_to_public_key(key, record.secret_share.as_bytes())?;

        debug!(
            node_id = %record.node_id,
            key = %key.fingerprint(),
            "encrypted secret share for trusted key"
        );

        let payload = SecretPayload::from_ciphertext(&ciphertext);
        record.cache_secret_ciphertext(ciphertext);
        Ok(payload)
    }
}
