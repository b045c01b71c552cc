//! Deterministic stand-ins for the external collaborators.
//!
//! The quote format understood by [`MockQuoteVerifier`] is a kind prefix
//! (`r` for a shallow quote, `d` for a nested one) followed by the nonce the
//! quote answers. Measurement lists are newline-separated file paths.

use crate::collaborators::{
    CollaboratorError, NestedQuoteCheck, NotificationChannel, QuoteCheck, QuoteVerifier,
    RegistrarClient,
};
use crate::crypto::CryptoError;
use crate::revocation::SignedRevocation;
use crate::types::{NodeId, NodePublicKey, Nonce, RegistrarKeys, RuntimeWhitelist};
use async_trait::async_trait;
use rand::rngs::OsRng;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Generate a small RSA key pair for tests (1024-bit keeps keygen fast).
pub fn test_keypair() -> Result<(RsaPrivateKey, NodePublicKey), CryptoError> {
    let private_key = RsaPrivateKey::new(&mut OsRng, 1024)?;
    let pem = RsaPublicKey::from(&private_key)
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
    Ok((private_key, NodePublicKey(pem)))
}

/// Registrar returning a fixed answer and counting lookups.
pub struct MockRegistrar {
    answer: Result<Option<RegistrarKeys>, String>,
    lookups: AtomicUsize,
}

impl MockRegistrar {
    pub fn with_keys(keys: RegistrarKeys) -> Self {
        Self {
            answer: Ok(Some(keys)),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn not_found() -> Self {
        Self {
            answer: Ok(None),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            answer: Err("connection refused".to_string()),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl Default for MockRegistrar {
    fn default() -> Self {
        Self::with_keys(RegistrarKeys {
            aik: "mock-aik".to_string(),
            provider_keys: None,
        })
    }
}

#[async_trait]
impl RegistrarClient for MockRegistrar {
    async fn get_keys(&self, _node_id: &NodeId) -> Result<Option<RegistrarKeys>, CollaboratorError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.answer.clone().map_err(CollaboratorError::Registrar)
    }
}

/// Quote checker that accepts quotes naming the outstanding nonce.
pub struct MockQuoteVerifier {
    accept: AtomicBool,
    shallow: AtomicUsize,
    nested: AtomicUsize,
}

impl MockQuoteVerifier {
    pub fn new() -> Self {
        Self {
            accept: AtomicBool::new(true),
            shallow: AtomicUsize::new(0),
            nested: AtomicUsize::new(0),
        }
    }

    /// Make every subsequent check fail, as a policy violation would.
    pub fn reject_all(&self) {
        self.accept.store(false, Ordering::SeqCst);
    }

    pub fn quote_for(nonce: &Nonce) -> String {
        format!("r{nonce}")
    }

    pub fn nested_quote_for(nonce: &Nonce) -> String {
        format!("d{nonce}")
    }

    pub fn shallow_checks(&self) -> usize {
        self.shallow.load(Ordering::SeqCst)
    }

    pub fn nested_checks(&self) -> usize {
        self.nested.load(Ordering::SeqCst)
    }

    fn passes(&self, check: &QuoteCheck<'_>) -> bool {
        if !self.accept.load(Ordering::SeqCst) || check.aik.is_empty() {
            return false;
        }
        if check.quote.get(1..) != Some(check.nonce.as_str()) {
            return false;
        }
        match (check.measurement_list, check.whitelist) {
            (Some(list), Some(whitelist)) => measurements_whitelisted(list, whitelist),
            _ => true,
        }
    }
}

impl Default for MockQuoteVerifier {
    fn default() -> Self {
        Self::new()
    }
}

fn measurements_whitelisted(list: &str, whitelist: &RuntimeWhitelist) -> bool {
    list.lines()
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .filter(|path| !whitelist.exclude.iter().any(|prefix| path.starts_with(prefix.as_str())))
        .all(|path| whitelist.whitelist.contains_key(path))
}

impl QuoteVerifier for MockQuoteVerifier {
    fn is_nested_quote(&self, quote: &str) -> bool {
        quote.starts_with('d')
    }

    fn check_quote(&self, check: &QuoteCheck<'_>) -> bool {
        self.shallow.fetch_add(1, Ordering::SeqCst);
        check.quote.starts_with('r') && self.passes(check)
    }

    fn check_nested_quote(&self, check: &NestedQuoteCheck<'_>) -> bool {
        self.nested.fetch_add(1, Ordering::SeqCst);
        check.base.quote.starts_with('d') && !check.provider_aik.is_empty() && self.passes(&check.base)
    }
}

/// Channel that keeps every published notice.
#[derive(Default)]
pub struct MemoryChannel {
    published: Mutex<Vec<SignedRevocation>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<SignedRevocation> {
        match self.published.lock() {
            Ok(published) => published.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl NotificationChannel for MemoryChannel {
    fn publish(&self, notice: &SignedRevocation) -> Result<(), CollaboratorError> {
        let mut published = self
            .published
            .lock()
            .map_err(|_| CollaboratorError::ChannelClosed)?;
        published.push(notice.clone());
        Ok(())
    }
}
