//! The capability every custodian exposes, whatever transport it sits behind

use super::attestation::AttestationQuote;
use super::CustodianError;
use crate::ledger::{AssetRef, OwnershipProof};
use crate::sharing::Share;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    /// Still answers, but is not chosen for new shares
    Degraded,
    Unavailable,
}

impl HealthStatus {
    /// Whether new shares may be placed here
    pub fn is_usable(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub custodian_id: String,
    pub status: HealthStatus,
    pub quote: Option<AttestationQuote>,
}

/// Acknowledgement of a durably stored or committed share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreAck {
    pub custodian_id: String,
    pub asset_ref: AssetRef,
    pub split_id: Uuid,
    pub share_index: u8,
    pub stored_at: DateTime<Utc>,
}

/// Coordinator-side view of a custodian
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodianRecord {
    pub custodian_id: String,
    pub endpoint: String,
    pub health_status: HealthStatus,
}

/// A share custodian. Implementations verify every ownership proof against
/// the ledger themselves and own their share storage.
#[async_trait]
pub trait CustodianEndpoint: Send + Sync {
    fn id(&self) -> &str;

    /// Where the custodian lives, for records and logs
    fn location(&self) -> String {
        "in-process".to_string()
    }

    /// Store a share under `proof`, pending until committed. Storing the
    /// identical share again is acknowledged; a different share for the
    /// same asset is refused unless it replaces a pending share of an
    /// earlier split.
    async fn store_share(
        &self,
        share: &Share,
        proof: &OwnershipProof,
    ) -> Result<StoreAck, CustodianError>;

    /// Make the pending share of `split_id` for `asset` permanent
    async fn commit_share(
        &self,
        asset: &AssetRef,
        split_id: Uuid,
        proof: &OwnershipProof,
    ) -> Result<StoreAck, CustodianError>;

    /// Release the share held for `asset` if `proof` shows current ownership
    async fn retrieve_share(
        &self,
        asset: &AssetRef,
        share_index: u8,
        proof: &OwnershipProof,
    ) -> Result<Share, CustodianError>;

    /// Report status with an attestation quote over `challenge`.
    /// Has no side effects.
    async fn health(&self, challenge: &str) -> Result<HealthReport, CustodianError>;
}
