//! Verifier configuration.
//!
//! One `VerifierConfig` value is handed to each component at construction, so
//! two verifiers in the same process (or two test cases) can run with
//! different settings.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Shortest nonce accepted by [`VerifierConfig::validate`].
pub const MIN_NONCE_LENGTH: usize = 16;

/// Longest nonce accepted by [`VerifierConfig::validate`].
pub const MAX_NONCE_LENGTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifierConfig {
    /// Publish revocation notices when trust is lost
    pub revocation_notifier: bool,
    /// Allow secret material in debug logs (never in production)
    pub insecure_debug: bool,
    /// Include the raw secret share in status views (legacy tenants only)
    pub expose_secret_share_in_status: bool,
    /// Length of issued challenge nonces
    pub nonce_length: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            revocation_notifier: true,
            insecure_debug: false,
            expose_secret_share_in_status: false,
            nonce_length: 20,
        }
    }
}

impl VerifierConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_NONCE_LENGTH..=MAX_NONCE_LENGTH).contains(&self.nonce_length) {
            return Err(ConfigError::NonceLength(self.nonce_length));
        }
        if self.insecure_debug {
            tracing::warn!("insecure_debug is enabled, secret material may be written to logs");
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("nonce_length must be between 16 and 64, got {0}")]
    NonceLength(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VerifierConfig::default();
        assert!(config.revocation_notifier);
        assert!(!config.insecure_debug);
        assert!(!config.expose_secret_share_in_status);
        assert_eq!(config.nonce_length, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = VerifierConfig::from_json_str(r#"{"revocation_notifier": false}"#).unwrap();
        assert!(!config.revocation_notifier);
        assert_eq!(config.nonce_length, 20);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = VerifierConfig::from_json_str(r#"{"revocation_notifer": false}"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_short_nonce_rejected() {
        let result = VerifierConfig::from_json_str(r#"{"nonce_length": 4}"#);
        assert!(matches!(result, Err(ConfigError::NonceLength(4))));
    }

    #[test]
    fn test_missing_file() {
        let result = VerifierConfig::from_file("/nonexistent/verifier.json");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
