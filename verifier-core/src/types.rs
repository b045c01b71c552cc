//! Core types used across the verifier.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// SHA-256 hash (32 bytes)
pub type Hash256 = [u8; 32];

/// Free-form tenant metadata attached to a node.
pub type Metadata = BTreeMap<String, String>;

/// Ed25519 signature (64 bytes) - wrapped for Serde support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBytes(#[serde(with = "serde_arrays")] pub [u8; 64]);

impl From<[u8; 64]> for SignatureBytes {
    fn from(bytes: [u8; 64]) -> Self {
        SignatureBytes(bytes)
    }
}

impl AsRef<[u8; 64]> for SignatureBytes {
    fn as_ref(&self) -> &[u8; 64] {
        &self.0
    }
}

// Serde support for large arrays
mod serde_arrays {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error> {
        bytes.as_slice().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 64], D::Error> {
        let bytes: Vec<u8> = Vec::deserialize(deserializer)?;
        bytes.try_into()
            .map_err(|_| serde::de::Error::custom("Invalid signature length"))
    }
}

/// Node identifier (stable, primary key of a node record)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the node can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAddress {
    pub ip: String,
    pub port: u16,
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Operational state of a node, driven by the external polling loop.
///
/// The numeric codes are stable and match what older tenants persist; both
/// the wire and the stored record carry the code, not the variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum OperationalState {
    Registered,
    Start,
    Saved,
    GetQuote,
    GetQuoteRetry,
    ProvideSecret,
    ProvideSecretRetry,
    Failed,
    Terminated,
    InvalidQuote,
    TenantFailed,
}

impl OperationalState {
    /// Stable numeric code (0..=10).
    pub fn code(self) -> u8 {
        match self {
            OperationalState::Registered => 0,
            OperationalState::Start => 1,
            OperationalState::Saved => 2,
            OperationalState::GetQuote => 3,
            OperationalState::GetQuoteRetry => 4,
            OperationalState::ProvideSecret => 5,
            OperationalState::ProvideSecretRetry => 6,
            OperationalState::Failed => 7,
            OperationalState::Terminated => 8,
            OperationalState::InvalidQuote => 9,
            OperationalState::TenantFailed => 10,
        }
    }
}

impl From<OperationalState> for u8 {
    fn from(state: OperationalState) -> Self {
        state.code()
    }
}

impl TryFrom<u8> for OperationalState {
    type Error = UnknownStateCode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => OperationalState::Registered,
            1 => OperationalState::Start,
            2 => OperationalState::Saved,
            3 => OperationalState::GetQuote,
            4 => OperationalState::GetQuoteRetry,
            5 => OperationalState::ProvideSecret,
            6 => OperationalState::ProvideSecretRetry,
            7 => OperationalState::Failed,
            8 => OperationalState::Terminated,
            9 => OperationalState::InvalidQuote,
            10 => OperationalState::TenantFailed,
            other => return Err(UnknownStateCode(other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Unknown operational state code: {0}")]
pub struct UnknownStateCode(pub u8);

impl fmt::Display for OperationalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperationalState::Registered => "Registered",
            OperationalState::Start => "Start",
            OperationalState::Saved => "Saved",
            OperationalState::GetQuote => "Get Quote",
            OperationalState::GetQuoteRetry => "Get Quote (retry)",
            OperationalState::ProvideSecret => "Provide V",
            OperationalState::ProvideSecretRetry => "Provide V (retry)",
            OperationalState::Failed => "Failed",
            OperationalState::Terminated => "Terminated",
            OperationalState::InvalidQuote => "Invalid Quote",
            OperationalState::TenantFailed => "Tenant Quote Failed",
        };
        f.write_str(label)
    }
}

/// Acceptance criteria for one root of trust (physical TPM or vTPM).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcrPolicy {
    /// PCR selection mask sent to the node (e.g. "0x408000")
    pub mask: String,
    /// Accepted digests per PCR index
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pcrs: BTreeMap<u32, Vec<String>>,
}

impl PcrPolicy {
    pub fn new(mask: impl Into<String>) -> Self {
        Self {
            mask: mask.into(),
            pcrs: BTreeMap::new(),
        }
    }

    /// Accept `digest` for PCR `index`.
    pub fn allow(mut self, index: u32, digest: impl Into<String>) -> Self {
        self.pcrs.entry(index).or_default().push(digest.into());
        self
    }
}

/// Expected runtime (IMA) measurements: file path to accepted digests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeWhitelist {
    #[serde(default)]
    pub whitelist: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

impl RuntimeWhitelist {
    pub fn len(&self) -> usize {
        self.whitelist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.whitelist.is_empty()
    }
}

/// Identity keys fetched from the registrar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrarKeys {
    /// Node AIK (PEM)
    pub aik: String,
    /// Provider keys, present for nodes that produce nested quotes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_keys: Option<ProviderKeys>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderKeys {
    pub aik: String,
}

/// Public encryption key reported by the node (PEM).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePublicKey(pub String);

impl NodePublicKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short fingerprint safe for logs.
    pub fn fingerprint(&self) -> String {
        let hash = crate::crypto::blake3(self.0.as_bytes());
        hash[..8].iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Anti-replay challenge value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nonce(pub String);

impl Nonce {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Verifier-held share of the node's bootstrap key ("V").
///
/// `Debug` never prints the bytes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretShare(pub Vec<u8>);

impl SecretShare {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretShare(<{} bytes redacted>)", self.0.len())
    }
}

/// Ed25519 secret key bytes used to sign revocations about a node.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevocationKey(pub [u8; 32]);

impl RevocationKey {
    pub fn signing_key(&self) -> ed25519_dalek::SigningKey {
        ed25519_dalek::SigningKey::from_bytes(&self.0)
    }
}

impl From<&ed25519_dalek::SigningKey> for RevocationKey {
    fn from(key: &ed25519_dalek::SigningKey) -> Self {
        RevocationKey(key.to_bytes())
    }
}

impl fmt::Debug for RevocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RevocationKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operational_state_display() {
        assert_eq!(OperationalState::GetQuoteRetry.to_string(), "Get Quote (retry)");
        assert_eq!(OperationalState::ProvideSecret.to_string(), "Provide V");
        assert_eq!(OperationalState::TenantFailed.to_string(), "Tenant Quote Failed");
    }

    #[test]
    fn test_operational_state_codes() {
        for code in 0..=10u8 {
            let state = OperationalState::try_from(code).unwrap();
            assert_eq!(state.code(), code);
        }
        assert_eq!(OperationalState::try_from(11), Err(UnknownStateCode(11)));
    }

    #[test]
    fn test_operational_state_serializes_as_code() {
        let json = serde_json::to_string(&OperationalState::InvalidQuote).unwrap();
        assert_eq!(json, "9");
        assert_eq!(
            serde_json::from_str::<OperationalState>("4").unwrap(),
            OperationalState::GetQuoteRetry
        );
        assert!(serde_json::from_str::<OperationalState>("11").is_err());
        assert!(serde_json::from_str::<OperationalState>("\"get_quote\"").is_err());
    }

    #[test]
    fn test_node_id() {
        let id = NodeId("node-001".to_string());
        assert_eq!(id.to_string(), "node-001");
    }

    #[test]
    fn test_secret_share_debug_redacted() {
        let share = SecretShare(b"super secret".to_vec());
        let printed = format!("{:?}", share);
        assert!(!printed.contains("super"));
        assert!(printed.contains("12 bytes"));
    }

    #[test]
    fn test_fingerprint_stable() {
        let key = NodePublicKey("-----BEGIN PUBLIC KEY-----".to_string());
        assert_eq!(key.fingerprint(), key.fingerprint());
        assert_eq!(key.fingerprint().len(), 16);
    }
}
