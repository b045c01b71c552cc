//! Quote validation engine.
//!
//! ## Validation Flow
//! 1. Parse the node's response (missing `quote` is indeterminate, not a failure)
//! 2. Resolve the public key: offered by the node, or reused from the record
//! 3. Fetch registrar identity keys once per record
//! 4. Check a nested or shallow quote against the outstanding nonce
//! 5. On success mark the node verified and rotate the trusted key if it changed
//!
//! Nothing on the record changes unless the quote is accepted, with one
//! exception: registrar keys are cached as soon as they are fetched.

use crate::collaborators::{NestedQuoteCheck, QuoteCheck, QuoteVerifier, RegistrarClient};
use crate::config::VerifierConfig;
use crate::crypto::generate_nonce;
use crate::record::NodeRecord;
use crate::serialization::from_wire_json;
use crate::types::{NodePublicKey, Nonce, RegistrarKeys};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Challenge sent to the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeParams {
    pub nonce: Nonce,
    #[serde(rename = "mask")]
    pub tpm_mask: String,
    #[serde(rename = "vmask")]
    pub vtpm_mask: String,
}

/// The node's answer to a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QuoteResponse {
    pub quote: String,
    #[serde(default, rename = "pubkey")]
    pub public_key: Option<NodePublicKey>,
    #[serde(default)]
    pub ima_measurement_list: Option<String>,
}

impl QuoteResponse {
    pub fn from_json(body: &[u8]) -> Result<Self, crate::serialization::SerializationError> {
        from_wire_json(body)
    }
}

/// Outcome of validating one response.
///
/// `Indeterminate` must never move a node into a trusted state, and must not
/// be treated as evidence of compromise either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Accepted,
    Rejected(Rejection),
    Indeterminate(Indeterminate),
}

impl ValidationResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationResult::Accepted)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, ValidationResult::Rejected(_))
    }

    pub fn is_indeterminate(&self) -> bool {
        matches!(self, ValidationResult::Indeterminate(_))
    }
}

/// Why a quote was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// No key offered, and no key plus cached ciphertext on record
    MissingTrustMaterial,
    /// Registrar has no identity key for the node
    IdentityKeyNotFound,
    /// Registrar lookup failed
    RegistrarUnavailable(String),
    /// Nested quote but the registrar returned no provider AIK
    MissingProviderKey,
    /// Signature, nonce, policy or whitelist check failed
    QuoteInvalid,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MissingTrustMaterial => write!(f, "no public key offered or cached"),
            Rejection::IdentityKeyNotFound => write!(f, "AIK not found in registrar"),
            Rejection::RegistrarUnavailable(e) => write!(f, "registrar unavailable: {e}"),
            Rejection::MissingProviderKey => write!(f, "provider AIK missing for nested quote"),
            Rejection::QuoteInvalid => write!(f, "quote failed verification"),
        }
    }
}

/// Why no trust decision could be made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indeterminate {
    /// Response could not be parsed or lacks `quote`
    MalformedResponse(String),
    /// `validate_response` called before `begin_challenge`
    NoOutstandingChallenge,
}

/// Issues challenges and judges the quotes that come back.
pub struct QuoteEngine {
    config: VerifierConfig,
    registrar: Arc<dyn RegistrarClient>,
    verifier: Arc<dyn QuoteVerifier>,
}

impl QuoteEngine {
    pub fn new(
        config: VerifierConfig,
        registrar: Arc<dyn RegistrarClient>,
        verifier: Arc<dyn QuoteVerifier>,
    ) -> Self {
        Self {
            config,
            registrar,
            verifier,
        }
    }

    /// Issue a fresh nonce for `record` and build the challenge payload.
    ///
    /// Any previously issued nonce is overwritten and can no longer be
    /// satisfied.
    pub fn begin_challenge(&self, record: &mut NodeRecord) -> ChallengeParams {
        let nonce = generate_nonce(self.config.nonce_length);
        record.challenge_nonce = Some(nonce.clone());

        debug!(node_id = %record.node_id, "issued challenge");

        ChallengeParams {
            nonce,
            tpm_mask: record.tpm_policy.mask.clone(),
            vtpm_mask: record.vtpm_policy.mask.clone(),
        }
    }

    /// Validate a raw JSON response body.
    pub async fn validate_response(&self, record: &mut NodeRecord, body: &[u8]) -> ValidationResult {
        match QuoteResponse::from_json(body) {
            Ok(response) => self.validate(record, &response).await,
            Err(e) => {
                warn!(node_id = %record.node_id, error = %e, "malformed quote response");
                ValidationResult::Indeterminate(Indeterminate::MalformedResponse(e.to_string()))
            }
        }
    }

    /// Validate an already parsed response.
    pub async fn validate(&self, record: &mut NodeRecord, response: &QuoteResponse) -> ValidationResult {
        let Some(nonce) = record.challenge_nonce.clone() else {
            warn!(node_id = %record.node_id, "quote received with no outstanding challenge");
            return ValidationResult::Indeterminate(Indeterminate::NoOutstandingChallenge);
        };

        debug!(
            node_id = %record.node_id,
            nonce = %nonce,
            pubkey_offered = response.public_key.is_some(),
            measurement_list = response.ima_measurement_list.is_some(),
            "validating quote"
        );

        let (public_key, reused) = match &response.public_key {
            Some(key) => (key.clone(), false),
            None => match (record.trusted_public_key(), record.cached_secret_ciphertext()) {
                (Some(key), Some(_)) => (key.clone(), true),
                _ => {
                    error!(
                        node_id = %record.node_id,
                        "node did not provide a public key and no key or encrypted secret is cached"
                    );
                    return ValidationResult::Rejected(Rejection::MissingTrustMaterial);
                }
            },
        };

        let keys = match self.identity_keys(record).await {
            Ok(keys) => keys,
            Err(rejection) => return ValidationResult::Rejected(rejection),
        };

        let base = QuoteCheck {
            nonce: &nonce,
            public_key: &public_key,
            quote: &response.quote,
            aik: &keys.aik,
            tpm_policy: &record.tpm_policy,
            measurement_list: response.ima_measurement_list.as_deref(),
            whitelist: record.runtime_whitelist.as_ref(),
        };

        let valid = if self.verifier.is_nested_quote(&response.quote) {
            let Some(provider) = keys.provider_keys.as_ref() else {
                warn!(node_id = %record.node_id, "nested quote but registrar has no provider AIK");
                return ValidationResult::Rejected(Rejection::MissingProviderKey);
            };
            self.verifier.check_nested_quote(&NestedQuoteCheck {
                base,
                provider_aik: &provider.aik,
                vtpm_policy: &record.vtpm_policy,
            })
        } else {
            self.verifier.check_quote(&base)
        };

        if !valid {
            warn!(node_id = %record.node_id, "quote rejected");
            return ValidationResult::Rejected(Rejection::QuoteInvalid);
        }

        // Single use: a replay of this response finds no outstanding challenge
        record.challenge_nonce = None;
        record.first_verified = true;
        if reused {
            record.needs_provisioning = false;
        } else {
            let fingerprint = public_key.fingerprint();
            if record.rotate_trusted_key(public_key) {
                info!(node_id = %record.node_id, key = %fingerprint, "trusted public key changed, secret must be re-provisioned");
            }
        }

        debug!(node_id = %record.node_id, "quote accepted");
        ValidationResult::Accepted
    }

    /// Cached registrar keys, fetched on first use.
    async fn identity_keys(&self, record: &mut NodeRecord) -> Result<RegistrarKeys, Rejection> {
        if let Some(keys) = &record.registrar_identity_keys {
            return Ok(keys.clone());
        }

        match self.registrar.get_keys(&record.node_id).await {
            Ok(Some(keys)) if !keys.aik.is_empty() => {
                debug!(node_id = %record.node_id, nested = keys.provider_keys.is_some(), "fetched registrar keys");
                record.registrar_identity_keys = Some(keys.clone());
                Ok(keys)
            }
            Ok(_) => {
                warn!(node_id = %record.node_id, "AIK not found in registrar, quote not validated");
                Err(Rejection::IdentityKeyNotFound)
            }
            Err(e) => {
                warn!(node_id = %record.node_id, error = %e, "registrar lookup failed");
                Err(Rejection::RegistrarUnavailable(e.to_string()))
            }
        }
    }
}
