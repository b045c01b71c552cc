//! Node record: everything the verifier knows about one monitored node.
//!
//! The record is a value owned by exactly one polling worker at a time. All
//! engine operations take it by `&mut`, which is what serializes challenge
//! issuance, validation and provisioning for a single node.

use crate::serialization::{from_canonical_cbor, to_canonical_cbor, SerializationError};
use crate::types::*;
use serde::{Deserialize, Serialize};

/// Record schema version (for schema evolution)
pub const RECORD_VERSION: u8 = 1;

/// One monitored node.
///
/// ## Key coupling
/// `cached_secret_ciphertext` is only meaningful for the `trusted_public_key`
/// that produced it. The two fields are private and change together through
/// [`NodeRecord::rotate_trusted_key`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Schema version
    pub version: u8,

    /// Stable node identifier
    pub node_id: NodeId,

    /// Address the node is polled on
    pub network: NetworkAddress,

    /// Verifier share of the bootstrap key ("V")
    pub secret_share: SecretShare,

    /// Node public key as of the last accepted quote
    trusted_public_key: Option<NodePublicKey>,

    /// `secret_share` encrypted under `trusted_public_key`
    cached_secret_ciphertext: Option<Vec<u8>>,

    /// Whether the secret still has to be pushed to the node
    pub needs_provisioning: bool,

    /// Most recently issued challenge
    pub challenge_nonce: Option<Nonce>,

    pub tpm_policy: PcrPolicy,
    pub vtpm_policy: PcrPolicy,

    /// Expected runtime measurements
    pub runtime_whitelist: Option<RuntimeWhitelist>,

    pub metadata: Metadata,

    /// Owned by the polling loop
    pub operational_state: OperationalState,

    /// Set on the first accepted quote, never cleared
    pub first_verified: bool,

    /// Identity keys as fetched from the registrar (at most once)
    pub registrar_identity_keys: Option<RegistrarKeys>,

    /// Key used to sign revocations about this node
    pub revocation_signing_key: Option<RevocationKey>,

    pub retry_count: u32,
    pub pending_event: Option<String>,
}

impl NodeRecord {
    pub fn trusted_public_key(&self) -> Option<&NodePublicKey> {
        self.trusted_public_key.as_ref()
    }

    /// Cached ciphertext, `None` when it must be recomputed.
    pub fn cached_secret_ciphertext(&self) -> Option<&[u8]> {
        self.cached_secret_ciphertext
            .as_deref()
            .filter(|ciphertext| !ciphertext.is_empty())
    }

    /// Replace the trusted key.
    ///
    /// Returns `true` when the key actually changed, in which case the cached
    /// ciphertext is dropped and provisioning is re-armed in the same step.
    pub fn rotate_trusted_key(&mut self, key: NodePublicKey) -> bool {
        if self.trusted_public_key.as_ref() == Some(&key) {
            return false;
        }
        self.trusted_public_key = Some(key);
        self.cached_secret_ciphertext = None;
        self.needs_provisioning = true;
        true
    }

    /// Store ciphertext produced for the current trusted key.
    pub(crate) fn cache_secret_ciphertext(&mut self, ciphertext: Vec<u8>) {
        self.cached_secret_ciphertext = Some(ciphertext);
    }

    /// Whether revocations about this node may be published.
    pub fn revocation_eligible(&self) -> bool {
        self.first_verified
    }

    /// Serialize to canonical CBOR bytes for the record store.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializationError> {
        to_canonical_cbor(self)
    }

    /// Deserialize from canonical CBOR bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SerializationError> {
        from_canonical_cbor(bytes)
    }
}

impl std::fmt::Debug for NodeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRecord")
            .field("node_id", &self.node_id)
            .field("network", &self.network)
            .field("secret_share", &self.secret_share)
            .field(
                "trusted_public_key",
                &self.trusted_public_key.as_ref().map(NodePublicKey::fingerprint),
            )
            .field(
                "cached_secret_ciphertext",
                &self.cached_secret_ciphertext().map(<[u8]>::len),
            )
            .field("needs_provisioning", &self.needs_provisioning)
            .field("operational_state", &self.operational_state)
            .field("first_verified", &self.first_verified)
            .field("retry_count", &self.retry_count)
            .finish_non_exhaustive()
    }
}

/// Builder for records of newly registered nodes.
pub struct NodeRecordBuilder {
    node_id: Option<NodeId>,
    network: Option<NetworkAddress>,
    secret_share: Option<SecretShare>,
    tpm_policy: Option<PcrPolicy>,
    vtpm_policy: Option<PcrPolicy>,
    runtime_whitelist: Option<RuntimeWhitelist>,
    metadata: Metadata,
    revocation_signing_key: Option<RevocationKey>,
}

impl NodeRecordBuilder {
    pub fn new() -> Self {
        Self {
            node_id: None,
            network: None,
            secret_share: None,
            tpm_policy: None,
            vtpm_policy: None,
            runtime_whitelist: None,
            metadata: Metadata::new(),
            revocation_signing_key: None,
        }
    }

    pub fn node_id(mut self, id: NodeId) -> Self {
        self.node_id = Some(id);
        self
    }

    pub fn network(mut self, ip: impl Into<String>, port: u16) -> Self {
        self.network = Some(NetworkAddress { ip: ip.into(), port });
        self
    }

    pub fn secret_share(mut self, share: SecretShare) -> Self {
        self.secret_share = Some(share);
        self
    }

    pub fn tpm_policy(mut self, policy: PcrPolicy) -> Self {
        self.tpm_policy = Some(policy);
        self
    }

    pub fn vtpm_policy(mut self, policy: PcrPolicy) -> Self {
        self.vtpm_policy = Some(policy);
        self
    }

    pub fn runtime_whitelist(mut self, whitelist: RuntimeWhitelist) -> Self {
        self.runtime_whitelist = Some(whitelist);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn revocation_signing_key(mut self, key: RevocationKey) -> Self {
        self.revocation_signing_key = Some(key);
        self
    }

    /// Build a record in the `Registered` state.
    pub fn build(self) -> Result<NodeRecord, BuildError> {
        let secret_share = self.secret_share.ok_or(BuildError::MissingField("secret_share"))?;
        if secret_share.as_bytes().is_empty() {
            return Err(BuildError::EmptySecretShare);
        }

        Ok(NodeRecord {
            version: RECORD_VERSION,
            node_id: self.node_id.ok_or(BuildError::MissingField("node_id"))?,
            network: self.network.ok_or(BuildError::MissingField("network"))?,
            secret_share,
            trusted_public_key: None,
            cached_secret_ciphertext: None,
            needs_provisioning: true,
            challenge_nonce: None,
            tpm_policy: self.tpm_policy.ok_or(BuildError::MissingField("tpm_policy"))?,
            vtpm_policy: self.vtpm_policy.unwrap_or_default(),
            runtime_whitelist: self.runtime_whitelist,
            metadata: self.metadata,
            operational_state: OperationalState::Registered,
            first_verified: false,
            registrar_identity_keys: None,
            revocation_signing_key: self.revocation_signing_key,
            retry_count: 0,
            pending_event: None,
        })
    }
}

impl Default for NodeRecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Secret share must not be empty")]
    EmptySecretShare,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_record() -> NodeRecord {
        NodeRecordBuilder::new()
            .node_id(NodeId("node-001".to_string()))
            .network("10.0.0.5", 9002)
            .secret_share(SecretShare(vec![7u8; 32]))
            .tpm_policy(PcrPolicy::new("0x408000").allow(15, "0".repeat(40)))
            .metadata("cluster", "east")
            .build()
            .unwrap()
    }

    #[test]
    fn test_new_record_defaults() {
        let record = test_record();
        assert_eq!(record.operational_state, OperationalState::Registered);
        assert!(record.needs_provisioning);
        assert!(!record.first_verified);
        assert!(record.trusted_public_key().is_none());
        assert!(record.cached_secret_ciphertext().is_none());
        assert_eq!(record.vtpm_policy, PcrPolicy::default());
    }

    #[test]
    fn test_missing_field() {
        let result = NodeRecordBuilder::new()
            .node_id(NodeId("n".to_string()))
            .secret_share(SecretShare(vec![1]))
            .build();
        assert!(matches!(result, Err(BuildError::MissingField("network"))));
    }

    #[test]
    fn test_empty_secret_rejected() {
        let result = NodeRecordBuilder::new()
            .node_id(NodeId("n".to_string()))
            .network("h", 1)
            .secret_share(SecretShare(Vec::new()))
            .build();
        assert!(matches!(result, Err(BuildError::EmptySecretShare)));
    }

    #[test]
    fn test_rotation_clears_ciphertext() {
        let mut record = test_record();
        record.rotate_trusted_key(NodePublicKey("pk1".to_string()));
        record.cache_secret_ciphertext(vec![1, 2, 3]);
        record.needs_provisioning = false;

        assert!(record.rotate_trusted_key(NodePublicKey("pk2".to_string())));
        assert_eq!(record.trusted_public_key().unwrap().as_str(), "pk2");
        assert!(record.cached_secret_ciphertext().is_none());
        assert!(record.needs_provisioning);
    }

    #[test]
    fn test_same_key_keeps_ciphertext() {
        let mut record = test_record();
        record.rotate_trusted_key(NodePublicKey("pk1".to_string()));
        record.cache_secret_ciphertext(vec![1, 2, 3]);
        record.needs_provisioning = false;

        assert!(!record.rotate_trusted_key(NodePublicKey("pk1".to_string())));
        assert_eq!(record.cached_secret_ciphertext(), Some(&[1u8, 2, 3][..]));
        assert!(!record.needs_provisioning);
    }

    #[test]
    fn test_empty_ciphertext_reads_as_absent() {
        let mut record = test_record();
        record.cache_secret_ciphertext(Vec::new());
        assert!(record.cached_secret_ciphertext().is_none());
    }

    #[test]
    fn test_persistence_keeps_transient_fields() {
        let mut record = test_record();
        record.challenge_nonce = Some(Nonce("abcdefghijklmnopqrst".to_string()));
        record.rotate_trusted_key(NodePublicKey("pk1".to_string()));
        record.cache_secret_ciphertext(vec![9; 16]);
        record.registrar_identity_keys = Some(RegistrarKeys {
            aik: "aik".to_string(),
            provider_keys: None,
        });

        let decoded = NodeRecord::from_bytes(&record.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let record = test_record();
        let printed = format!("{:?}", record);
        assert!(printed.contains("node-001"));
        assert!(printed.contains("redacted"));
    }
}
