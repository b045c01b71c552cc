//! # Verifier Core
//!
//! Decides whether a monitored node's TPM quote proves it is running in an
//! expected state, and handles what follows from that decision: releasing
//! the verifier's secret share to the node, or publishing a signed
//! revocation once trust is lost.
//!
//! ## Key Features
//! - **Three-way validation**: accepted, rejected, or indeterminate (retry)
//! - **Key rotation safety**: cached ciphertext dies with the key it was made for
//! - **Signed revocations**: Ed25519 over the exact published bytes
//! - **Pluggable collaborators**: registrar, quote primitives and notification channel are traits

pub mod collaborators;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod mock;
pub mod provisioning;
pub mod record;
pub mod revocation;
pub mod serialization;
pub mod status;
pub mod store;
pub mod types;

pub use collaborators::{
    CollaboratorError, NestedQuoteCheck, NotificationChannel, QuoteCheck, QuoteVerifier,
    RegistrarClient,
};
pub use config::{ConfigError, VerifierConfig};
pub use crypto::{CryptoError, Signer};
pub use engine::{ChallengeParams, Indeterminate, QuoteEngine, QuoteResponse, Rejection, ValidationResult};
pub use provisioning::{ProvisioningError, SecretPayload, SecretProvisioner};
pub use record::{BuildError, NodeRecord, NodeRecordBuilder};
pub use revocation::{
    BroadcastChannel, NotifyOutcome, RevocationError, RevocationMessage, RevocationNotifier,
    SignedRevocation,
};
pub use status::{project_status, StatusView};
pub use store::{MemoryStore, RecordStore, StoreError};
pub use types::*;

/// Re-export for convenience
pub use ed25519_dalek::{SigningKey, VerifyingKey};
