//! Runtime configuration
//!
//! Loaded from a JSON file; every field has a default so partial files work.

use crate::custodian::{AttestationPolicy, RetryPolicy};
use crate::sharing::SplitSpec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustodyConfig {
    /// Default N and K for new secrets
    pub split: SplitSpec,
    pub retry: RetryPolicy,
    /// Timeout for a single custodian call
    pub call_timeout_ms: u64,
    /// Overall deadline for collecting shares during decryption
    pub request_deadline_ms: u64,
    /// Lifetime of ownership proofs signed for custody operations
    pub proof_validity_secs: i64,
    pub attestation: AttestationPolicy,
}

impl Default for CustodyConfig {
    fn default() -> Self {
        Self {
            split: SplitSpec::default(),
            retry: RetryPolicy::default(),
            call_timeout_ms: 3_000,
            request_deadline_ms: 10_000,
            proof_validity_secs: 300,
            attestation: AttestationPolicy::default(),
        }
    }
}

impl CustodyConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            let config = Self::load(path)?;
            log::info!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            log::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.split
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.call_timeout_ms == 0 || self.request_deadline_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        if self.proof_validity_secs <= 0 {
            return Err(ConfigError::Invalid("proof_validity_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }

    pub fn proof_validity(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.proof_validity_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("custody-{}-{}.json", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_defaults() {
        let config = CustodyConfig::default();
        assert_eq!(config.split, SplitSpec::new(5, 3).unwrap());
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let path = temp_path("partial");
        std::fs::write(
            &path,
            r#"{ "split": { "total_shares": 7, "threshold": 4 }, "call_timeout_ms": 500 }"#,
        )
        .unwrap();

        let config = CustodyConfig::load(&path).unwrap();
        assert_eq!(config.split.total_shares, 7);
        assert_eq!(config.split.threshold, 4);
        assert_eq!(config.call_timeout(), Duration::from_millis(500));
        assert_eq!(config.request_deadline_ms, 10_000);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_save_load_and_missing_file() {
        let path = temp_path("roundtrip");
        let mut config = CustodyConfig::default();
        config.proof_validity_secs = 42;
        config.save(&path).unwrap();
        assert_eq!(CustodyConfig::load_or_default(&path).unwrap(), config);
        let _ = std::fs::remove_file(&path);

        let missing = temp_path("missing");
        assert_eq!(
            CustodyConfig::load_or_default(&missing).unwrap(),
            CustodyConfig::default()
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let path = temp_path("invalid");
        std::fs::write(&path, r#"{ "split": { "total_shares": 2, "threshold": 3 } }"#).unwrap();
        assert!(matches!(
            CustodyConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(CustodyConfig::load(&path), Err(ConfigError::Parse(_))));
        let _ = std::fs::remove_file(&path);
    }
}
