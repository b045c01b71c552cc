//! Interfaces to the systems the verifier depends on but does not implement.
//!
//! The registrar, the TPM quote primitives and the notification transport
//! each sit behind a trait so deployments can plug in the real services and
//! tests can plug in [`crate::mock`] doubles.

use crate::revocation::SignedRevocation;
use crate::types::{NodeId, NodePublicKey, Nonce, PcrPolicy, RegistrarKeys, RuntimeWhitelist};
use async_trait::async_trait;
use thiserror::Error;

/// Lookup of a node's identity keys in the registrar.
#[async_trait]
pub trait RegistrarClient: Send + Sync {
    /// Fetch identity keys for `node_id`.
    ///
    /// `Ok(None)` means the registrar does not know the node. The call may
    /// block on the network; callers get no retry from the engine.
    async fn get_keys(
        &self,
        node_id: &NodeId,
    ) -> Result<Option<RegistrarKeys>, CollaboratorError>;
}

/// Inputs shared by shallow and nested quote checks.
#[derive(Debug, Clone, Copy)]
pub struct QuoteCheck<'a> {
    pub nonce: &'a Nonce,
    pub public_key: &'a NodePublicKey,
    pub quote: &'a str,
    pub aik: &'a str,
    pub tpm_policy: &'a PcrPolicy,
    pub measurement_list: Option<&'a str>,
    pub whitelist: Option<&'a RuntimeWhitelist>,
}

/// Extra inputs for a nested (virtual TPM) quote.
#[derive(Debug, Clone, Copy)]
pub struct NestedQuoteCheck<'a> {
    pub base: QuoteCheck<'a>,
    pub provider_aik: &'a str,
    pub vtpm_policy: &'a PcrPolicy,
}

/// TPM quote verification primitives.
///
/// Implementations return `true` only when the signature, the nonce binding,
/// the public-key binding, the PCR policy and (when a measurement list is
/// given) the whitelist all check out.
pub trait QuoteVerifier: Send + Sync {
    /// Whether `quote` covers a virtual TPM backed by a provider TPM.
    fn is_nested_quote(&self, quote: &str) -> bool;

    fn check_quote(&self, check: &QuoteCheck<'_>) -> bool;

    fn check_nested_quote(&self, check: &NestedQuoteCheck<'_>) -> bool;
}

/// Fire-and-forget transport for revocation notices.
pub trait NotificationChannel: Send + Sync {
    fn publish(&self, notice: &SignedRevocation) -> Result<(), CollaboratorError>;
}

/// Errors reported by external collaborators.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Registrar unavailable: {0}")]
    Registrar(String),

    #[error("Notification channel closed")]
    ChannelClosed,

    #[error("Network error: {0}")]
    Network(String),
}
