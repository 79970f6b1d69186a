//! Top-level error type for custody workflows

use crate::config::ConfigError;
use crate::crypto::CryptoError;
use crate::custodian::CustodianError;
use crate::ledger::LedgerError;
use crate::sharing::SharingError;
use crate::storage::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why one custodian did not contribute a share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodianFailure {
    pub custodian_id: String,
    pub error: CustodianError,
}

impl fmt::Display for CustodianFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.custodian_id, self.error)
    }
}

fn list_failures(failures: &[CustodianFailure]) -> String {
    if failures.is_empty() {
        return "none".to_string();
    }
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, thiserror::Error)]
pub enum CustodyError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Sharing(#[from] SharingError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Ownership proof rejected: {0}")]
    ProofRejected(String),

    #[error(
        "Quorum unavailable: needed {needed}, collected {collected} (failures: {})",
        list_failures(.failures)
    )]
    QuorumUnavailable {
        needed: usize,
        collected: usize,
        failures: Vec<CustodianFailure>,
    },

    #[error("No secret record for asset {0}")]
    UnknownAsset(String),

    #[error("Asset {0} is already protected")]
    AlreadyProtected(String),

    #[error("Asset {0} is being protected by another request")]
    ProtectionInFlight(String),

    #[error("Malformed envelope: {0}")]
    Envelope(String),
}

impl CustodyError {
    /// Per-custodian detail when quorum was not reached
    pub fn failures(&self) -> &[CustodianFailure] {
        match self {
            CustodyError::QuorumUnavailable { failures, .. } => failures,
            _ => &[],
        }
    }
}
