//! Revocation notices.
//!
//! When a node that was once trusted fails attestation, subscribers are told
//! to stop trusting it. The notice is a JSON message plus an Ed25519
//! signature over the exact message bytes, made with the node's revocation
//! key. Nodes without a revocation key get an explicitly unsigned notice.

use crate::collaborators::{CollaboratorError, NotificationChannel};
use crate::config::VerifierConfig;
use crate::crypto::{Signer, VerifyingKey};
use crate::record::NodeRecord;
use crate::serialization::{from_wire_json, to_wire_json, SerializationError};
use crate::types::{Metadata, PcrPolicy, SignatureBytes};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Default notice type.
pub const REVOCATION: &str = "revocation";

/// What happened to whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub ip: String,
    pub port: u16,
    pub tpm_policy: PcrPolicy,
    pub vtpm_policy: PcrPolicy,
    pub metadata: Metadata,
    pub event_time: DateTime<Utc>,
}

/// Envelope published on the notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRevocation {
    /// Serialized [`RevocationMessage`]; the signature covers these bytes
    pub msg: String,
    /// `"none"` on the wire when the node has no revocation key
    #[serde(with = "signature_field")]
    pub signature: Option<SignatureBytes>,
}

impl SignedRevocation {
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    pub fn message(&self) -> Result<RevocationMessage, SerializationError> {
        from_wire_json(self.msg.as_bytes())
    }

    /// Check the signature against the node's revocation verifying key.
    pub fn verify(&self, public_key: &VerifyingKey) -> Result<(), SignatureError> {
        use ed25519_dalek::Verifier;

        let signature = self.signature.as_ref().ok_or(SignatureError::Unsigned)?;
        let signature = ed25519_dalek::Signature::from_bytes(signature.as_ref());

        public_key
            .verify(self.msg.as_bytes(), &signature)
            .map_err(|_| SignatureError::InvalidSignature)
    }

    pub fn to_json(&self) -> Result<String, SerializationError> {
        to_wire_json(self)
    }
}

mod signature_field {
    use crate::types::SignatureBytes;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    const UNSIGNED: &str = "none";

    pub fn serialize<S: Serializer>(
        signature: &Option<SignatureBytes>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match signature {
            Some(signature) => serializer.serialize_str(&STANDARD.encode(signature.0)),
            None => serializer.serialize_str(UNSIGNED),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<SignatureBytes>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        if encoded == UNSIGNED {
            return Ok(None);
        }
        let bytes = STANDARD.decode(&encoded).map_err(serde::de::Error::custom)?;
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("Invalid signature length"))?;
        Ok(Some(SignatureBytes(bytes)))
    }
}

/// Result of a notification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// Notifications are switched off in configuration
    Disabled,
    /// The node never passed attestation, so there is no trust to revoke
    NeverVerified,
    Published(SignedRevocation),
}

#[derive(Debug, Error)]
pub enum RevocationError {
    #[error("Cannot encode revocation: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Cannot publish revocation: {0}")]
    Publish(#[from] CollaboratorError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Revocation is unsigned")]
    Unsigned,

    #[error("Invalid signature")]
    InvalidSignature,
}

pub struct RevocationNotifier {
    config: VerifierConfig,
    channel: Arc<dyn NotificationChannel>,
}

impl RevocationNotifier {
    pub fn new(config: VerifierConfig, channel: Arc<dyn NotificationChannel>) -> Self {
        Self { config, channel }
    }

    /// Publish a `"revocation"` notice for `record`.
    pub fn notify_revocation(&self, record: &NodeRecord) -> Result<NotifyOutcome, RevocationError> {
        self.notify(record, REVOCATION)
    }

    /// Publish a notice of type `kind` for `record`.
    ///
    /// Nothing is sent for nodes that were never verified, or when the
    /// notifier is disabled.
    pub fn notify(&self, record: &NodeRecord, kind: &str) -> Result<NotifyOutcome, RevocationError> {
        if !self.config.revocation_notifier {
            return Ok(NotifyOutcome::Disabled);
        }
        if !record.revocation_eligible() {
            debug!(node_id = %record.node_id, "node never verified, not publishing {kind}");
            return Ok(NotifyOutcome::NeverVerified);
        }

        let message = RevocationMessage {
            kind: kind.to_string(),
            ip: record.network.ip.clone(),
            port: record.network.port,
            tpm_policy: record.tpm_policy.clone(),
            vtpm_policy: record.vtpm_policy.clone(),
            metadata: record.metadata.clone(),
            event_time: Utc::now(),
        };
        let msg = to_wire_json(&message)?;

        let signature = record.revocation_signing_key.as_ref().map(|key| {
            let signer = Signer::new(key.signing_key());
            SignatureBytes::from(signer.sign(msg.as_bytes()).to_bytes())
        });

        let notice = SignedRevocation { msg, signature };
        self.channel.publish(&notice)?;

        info!(
            node_id = %record.node_id,
            kind,
            signed = notice.is_signed(),
            "published revocation notice"
        );
        Ok(NotifyOutcome::Published(notice))
    }
}

/// In-process publish/subscribe channel for revocation notices.
pub struct BroadcastChannel {
    sender: broadcast::Sender<SignedRevocation>,
}

impl BroadcastChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SignedRevocation> {
        self.sender.subscribe()
    }
}

impl NotificationChannel for BroadcastChannel {
    fn publish(&self, notice: &SignedRevocation) -> Result<(), CollaboratorError> {
        // No subscribers is not an error for a fire-and-forget channel
        if self.sender.send(notice.clone()).is_err() {
            debug!("revocation published with no subscribers");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemoryChannel;
    use crate::record::NodeRecordBuilder;
    use crate::types::{NodeId, RevocationKey, SecretShare};

    fn record(signer: Option<&Signer>) -> NodeRecord {
        let mut builder = NodeRecordBuilder::new()
            .node_id(NodeId("node-3".to_string()))
            .network("192.168.0.7", 9002)
            .secret_share(SecretShare(vec![1u8; 32]))
            .tpm_policy(PcrPolicy::new("0x408000"))
            .metadata("owner", "ops");
        if let Some(signer) = signer {
            builder = builder.revocation_signing_key(RevocationKey::from(signer.signing_key()));
        }
        builder.build().unwrap()
    }

    fn notifier(config: VerifierConfig, channel: Arc<MemoryChannel>) -> RevocationNotifier {
        RevocationNotifier::new(config, channel)
    }

    #[test]
    fn test_never_verified_not_published() {
        let channel = Arc::new(MemoryChannel::new());
        let record = record(None);

        let outcome = notifier(VerifierConfig::default(), channel.clone())
            .notify_revocation(&record)
            .unwrap();

        assert_eq!(outcome, NotifyOutcome::NeverVerified);
        assert!(channel.published().is_empty());
    }

    #[test]
    fn test_disabled() {
        let channel = Arc::new(MemoryChannel::new());
        let mut record = record(None);
        record.first_verified = true;
        let config = VerifierConfig {
            revocation_notifier: false,
            ..VerifierConfig::default()
        };

        let outcome = notifier(config, channel.clone()).notify_revocation(&record).unwrap();
        assert_eq!(outcome, NotifyOutcome::Disabled);
        assert!(channel.published().is_empty());
    }

    #[test]
    fn test_signed_notice() {
        let signer = Signer::generate();
        let channel = Arc::new(MemoryChannel::new());
        let mut record = record(Some(&signer));
        record.first_verified = true;

        let outcome = notifier(VerifierConfig::default(), channel.clone())
            .notify_revocation(&record)
            .unwrap();

        let NotifyOutcome::Published(notice) = outcome else {
            panic!("expected a published notice");
        };
        assert_eq!(channel.published(), vec![notice.clone()]);
        assert!(notice.verify(&signer.verifying_key()).is_ok());

        let message = notice.message().unwrap();
        assert_eq!(message.kind, REVOCATION);
        assert_eq!(message.ip, "192.168.0.7");
        assert_eq!(message.port, 9002);
        assert_eq!(message.metadata.get("owner").map(String::as_str), Some("ops"));
    }

    #[test]
    fn test_tampered_notice_fails_verification() {
        let signer = Signer::generate();
        let mut record = record(Some(&signer));
        record.first_verified = true;

        let outcome = notifier(VerifierConfig::default(), Arc::new(MemoryChannel::new()))
            .notify(&record, "revocation")
            .unwrap();
        let NotifyOutcome::Published(mut notice) = outcome else {
            panic!("expected a published notice");
        };
        notice.msg = notice.msg.replace("192.168.0.7", "192.168.0.8");

        assert_eq!(
            notice.verify(&signer.verifying_key()),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn test_unsigned_notice_wire_format() {
        let mut record = record(None);
        record.first_verified = true;

        let outcome = notifier(VerifierConfig::default(), Arc::new(MemoryChannel::new()))
            .notify(&record, "revocation")
            .unwrap();
        let NotifyOutcome::Published(notice) = outcome else {
            panic!("expected a published notice");
        };

        assert!(!notice.is_signed());
        assert_eq!(
            notice.verify(&Signer::generate().verifying_key()),
            Err(SignatureError::Unsigned)
        );

        let wire: serde_json::Value = serde_json::from_str(&notice.to_json().unwrap()).unwrap();
        assert_eq!(wire["signature"], "none");

        let decoded: SignedRevocation = serde_json::from_value(wire).unwrap();
        assert_eq!(decoded, notice);
    }

    #[tokio::test]
    async fn test_broadcast_channel_delivers() {
        let channel = Arc::new(BroadcastChannel::new(8));
        let mut subscriber = channel.subscribe();
        let mut record = record(Some(&Signer::generate()));
        record.first_verified = true;

        RevocationNotifier::new(VerifierConfig::default(), channel)
            .notify_revocation(&record)
            .unwrap();

        let received = subscriber.recv().await.unwrap();
        assert!(received.is_signed());
    }

    #[test]
    fn test_broadcast_without_subscribers() {
        let channel = BroadcastChannel::new(1);
        let notice = SignedRevocation {
            msg: "{}".to_string(),
            signature: None,
        };
        assert!(channel.publish(&notice).is_ok());
    }
}
