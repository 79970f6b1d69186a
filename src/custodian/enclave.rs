//! Enclave custodian: holds sealed shares inside a (simulated) TEE
//!
//! Every store and retrieve is authorised independently of the caller:
//! the enclave checks the ownership proof against the ledger (signature,
//! validity window, current owner) and tracks spent proof nonces. Shares are
//! sealed at rest and can be persisted to a sealed index on disk.
//!
//! A stored share stays pending until the coordinator commits it. Only
//! committed shares are released, and only pending shares of an earlier
//! split can be replaced.

use super::attestation::{EnclaveIdentity, EnclaveMeasurement, EnclaveReport, TeeBackend};
use super::endpoint::{CustodianEndpoint, HealthReport, HealthStatus, StoreAck};
use super::sealed_storage::{ConsumedNonce, ProofUse, SealedIndex, SealedShare, SealingKey};
use super::CustodianError;
use crate::ledger::{AssetRef, Ledger, OwnershipProof};
use crate::sharing::Share;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Configuration for one enclave custodian
#[derive(Debug, Clone)]
pub struct EnclaveConfig {
    pub custodian_id: String,
    pub backend: TeeBackend,
    /// Where to persist the sealed index; `None` keeps shares in memory only
    pub sealed_dir: Option<PathBuf>,
    pub code_identity: String,
    pub signer: String,
    pub svn: u16,
}

impl EnclaveConfig {
    pub fn simulated(custodian_id: impl Into<String>) -> Self {
        Self {
            custodian_id: custodian_id.into(),
            backend: TeeBackend::Simulated,
            sealed_dir: None,
            code_identity: "custody-enclave-v1".to_string(),
            signer: "custody-signer-v1".to_string(),
            svn: 1,
        }
    }

    pub fn with_sealed_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sealed_dir = Some(dir.into());
        self
    }
}

struct EnclaveState {
    index: SealedIndex,
    status: HealthStatus,
}

pub struct EnclaveCustodian {
    id: String,
    identity: EnclaveIdentity,
    sealing_key: SealingKey,
    ledger: Arc<dyn Ledger>,
    sealed_dir: Option<PathBuf>,
    created_at: DateTime<Utc>,
    state: Mutex<EnclaveState>,
}

impl EnclaveCustodian {
    /// Start an enclave, reloading its sealed index if one was persisted
    pub fn new(config: EnclaveConfig, ledger: Arc<dyn Ledger>) -> Result<Self, CustodianError> {
        let measurement =
            EnclaveMeasurement::compute(&config.code_identity, &config.signer, 1, config.svn);
        let sealing_key = SealingKey::derive(&measurement, &config.custodian_id)?;
        let identity = EnclaveIdentity::new(config.backend, measurement);

        let index = match &config.sealed_dir {
            Some(dir) => SealedIndex::load(dir, &config.custodian_id)?,
            None => None,
        }
        .unwrap_or_else(|| SealedIndex::new(config.custodian_id.clone()));

        info!(
            "Custodian {} up: backend={}, security={:?}, sealed shares={}",
            config.custodian_id,
            config.backend.name(),
            identity.security_level,
            index.shares.len()
        );

        Ok(Self {
            id: config.custodian_id,
            identity,
            sealing_key,
            ledger,
            sealed_dir: config.sealed_dir,
            created_at: Utc::now(),
            state: Mutex::new(EnclaveState {
                index,
                status: HealthStatus::Healthy,
            }),
        })
    }

    /// Simulate an operator marking the node degraded or taking it down
    pub async fn set_status(&self, status: HealthStatus) {
        let mut state = self.state.lock().await;
        if state.status != status {
            info!("Custodian {}: {:?} -> {:?}", self.id, state.status, status);
            state.status = status;
        }
    }

    pub async fn share_count(&self) -> usize {
        self.state.lock().await.index.shares.len()
    }

    pub fn measurement(&self) -> &EnclaveMeasurement {
        &self.identity.measurement
    }

    pub fn attestation_key(&self) -> String {
        self.identity.attestation_key_hex()
    }

    fn ensure_reachable(&self, state: &EnclaveState) -> Result<(), CustodianError> {
        if state.status == HealthStatus::Unavailable {
            return Err(CustodianError::Unreachable(format!("{} is down", self.id)));
        }
        Ok(())
    }

    /// Check `proof` for `operation` on `asset`. Returns true when the proof
    /// was already spent on exactly this operation and asset (a replay).
    fn authorize(
        &self,
        index: &SealedIndex,
        proof: &OwnershipProof,
        asset: &AssetRef,
        operation: ProofUse,
    ) -> Result<bool, CustodianError> {
        if proof.asset_ref != *asset {
            return Err(CustodianError::ProofRejected(format!(
                "proof covers {}, not {}",
                proof.asset_ref, asset
            )));
        }
        if !self.ledger.verify_proof(proof) {
            return Err(CustodianError::ProofRejected(format!(
                "ledger does not accept proof {} from {}",
                proof.nonce,
                proof.account.short()
            )));
        }
        match index.consumed.get(&proof.nonce) {
            Some(spent) if spent.operation == operation && spent.asset_ref == *asset => Ok(true),
            Some(spent) => Err(CustodianError::ProofRejected(format!(
                "nonce {} already used for {:?} on {}",
                proof.nonce, spent.operation, spent.asset_ref
            ))),
            None => Ok(false),
        }
    }

    fn consume(index: &mut SealedIndex, proof: &OwnershipProof, operation: ProofUse) {
        let now = Utc::now();
        let pruned = index.prune_expired(now);
        if pruned > 0 {
            debug!("Pruned {} expired proof nonces", pruned);
        }
        index.consumed.insert(
            proof.nonce.clone(),
            ConsumedNonce {
                operation,
                asset_ref: proof.asset_ref.clone(),
                expires_at: proof.expires_at,
            },
        );
        index.last_updated = now;
    }

    fn persist(&self, index: &SealedIndex) -> Result<(), CustodianError> {
        match &self.sealed_dir {
            Some(dir) => index.save(dir),
            None => Ok(()),
        }
    }

    fn aad(&self, asset: &AssetRef) -> Vec<u8> {
        format!("{}|{}", self.id, asset).into_bytes()
    }

    fn ack(&self, asset: &AssetRef, sealed: &SealedShare) -> StoreAck {
        StoreAck {
            custodian_id: self.id.clone(),
            asset_ref: asset.clone(),
            split_id: sealed.split_id,
            share_index: sealed.share_index,
            stored_at: sealed.stored_at,
        }
    }
}

#[async_trait]
impl CustodianEndpoint for EnclaveCustodian {
    fn id(&self) -> &str {
        &self.id
    }

    fn location(&self) -> String {
        format!("enclave://{}", self.id)
    }

    async fn store_share(
        &self,
        share: &Share,
        proof: &OwnershipProof,
    ) -> Result<StoreAck, CustodianError> {
        let mut state = self.state.lock().await;
        self.ensure_reachable(&state)?;

        if !share.verify_checksum() {
            return Err(CustodianError::Protocol(format!(
                "share {} fails its checksum",
                share.index
            )));
        }

        let asset = &proof.asset_ref;
        let replay = self.authorize(&state.index, proof, asset, ProofUse::Store)?;

        if let Some(existing) = state.index.shares.get(asset) {
            let identical = existing.split_id == share.split_id
                && existing.share_index == share.index
                && existing.checksum == share.checksum;
            if identical {
                let ack = self.ack(asset, existing);
                if !replay {
                    Self::consume(&mut state.index, proof, ProofUse::Store);
                    self.persist(&state.index)?;
                }
                debug!("Custodian {}: share {} for {} already held", self.id, share.index, asset);
                return Ok(ack);
            }
            if existing.committed || existing.split_id == share.split_id {
                return Err(CustodianError::AlreadyStored(format!(
                    "{} holds share {} of split {} for {}",
                    self.id, existing.share_index, existing.split_id, asset
                )));
            }
            warn!(
                "Custodian {}: uncommitted split {} for {} superseded by {}",
                self.id,
                &existing.split_id.to_string()[..8],
                asset,
                &share.split_id.to_string()[..8]
            );
        }

        let stored = share.clone().with_owner_proof(proof.clone());
        let plaintext = Zeroizing::new(
            stored
                .to_bytes()
                .map_err(|e| CustodianError::Sealing(format!("encode share: {}", e)))?,
        );
        let sealed = SealedShare {
            split_id: share.split_id,
            share_index: share.index,
            checksum: share.checksum.clone(),
            sealed: self.sealing_key.seal(&plaintext, &self.aad(asset))?,
            stored_at: Utc::now(),
            committed: false,
        };
        let ack = self.ack(asset, &sealed);

        let superseded = state.index.shares.insert(asset.clone(), sealed);
        Self::consume(&mut state.index, proof, ProofUse::Store);
        if let Err(e) = self.persist(&state.index) {
            match superseded {
                Some(previous) => state.index.shares.insert(asset.clone(), previous),
                None => state.index.shares.remove(asset),
            };
            state.index.consumed.remove(&proof.nonce);
            warn!("Custodian {}: failed to persist share for {}: {}", self.id, asset, e);
            return Err(e);
        }

        info!(
            "Custodian {} sealed share {} of split {} for {}",
            self.id,
            share.index,
            &share.split_id.to_string()[..8],
            asset
        );
        Ok(ack)
    }

    async fn commit_share(
        &self,
        asset: &AssetRef,
        split_id: Uuid,
        proof: &OwnershipProof,
    ) -> Result<StoreAck, CustodianError> {
        let mut state = self.state.lock().await;
        self.ensure_reachable(&state)?;

        let replay = self.authorize(&state.index, proof, asset, ProofUse::Commit)?;

        let sealed = state
            .index
            .shares
            .get_mut(asset)
            .filter(|s| s.split_id == split_id)
            .ok_or_else(|| {
                CustodianError::NotFound(format!(
                    "{} holds no share of split {} for {}",
                    self.id, split_id, asset
                ))
            })?;
        let newly_committed = !sealed.committed;
        sealed.committed = true;
        let ack = self.ack(asset, sealed);

        if replay {
            return Ok(ack);
        }
        Self::consume(&mut state.index, proof, ProofUse::Commit);
        if let Err(e) = self.persist(&state.index) {
            if newly_committed {
                if let Some(sealed) = state.index.shares.get_mut(asset) {
                    sealed.committed = false;
                }
            }
            state.index.consumed.remove(&proof.nonce);
            return Err(e);
        }
        if newly_committed {
            debug!("Custodian {} committed share {} for {}", self.id, ack.share_index, asset);
        }
        Ok(ack)
    }

    async fn retrieve_share(
        &self,
        asset: &AssetRef,
        share_index: u8,
        proof: &OwnershipProof,
    ) -> Result<Share, CustodianError> {
        let mut state = self.state.lock().await;
        self.ensure_reachable(&state)?;

        let replay = self.authorize(&state.index, proof, asset, ProofUse::Retrieve)?;

        let sealed = state
            .index
            .shares
            .get(asset)
            .filter(|s| s.committed)
            .ok_or_else(|| CustodianError::NotFound(format!("{} holds nothing for {}", self.id, asset)))?;
        if sealed.share_index != share_index {
            return Err(CustodianError::NotFound(format!(
                "{} holds share {} for {}, not {}",
                self.id, sealed.share_index, asset, share_index
            )));
        }

        let plaintext = self.sealing_key.unseal(&sealed.sealed, &self.aad(asset))?;
        let share = Share::from_bytes(&plaintext)
            .map_err(|e| CustodianError::Sealing(format!("decode share: {}", e)))?;

        if !replay {
            Self::consume(&mut state.index, proof, ProofUse::Retrieve);
            self.persist(&state.index)?;
            info!(
                "Custodian {} released share {} for {} to {}",
                self.id,
                share_index,
                asset,
                proof.account.short()
            );
        }
        Ok(share)
    }

    async fn health(&self, challenge: &str) -> Result<HealthReport, CustodianError> {
        let state = self.state.lock().await;
        self.ensure_reachable(&state)?;

        let report = EnclaveReport {
            custodian_id: self.id.clone(),
            sealed_shares: state.index.shares.len(),
            uptime_secs: (Utc::now() - self.created_at).num_seconds(),
        };
        Ok(HealthReport {
            custodian_id: self.id.clone(),
            status: state.status,
            quote: Some(self.identity.quote(report, challenge)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custodian::attestation::{verify_quote, AttestationPolicy};
    use crate::ledger::{Identity, InMemoryLedger};
    use crate::sharing::{split, SplitSpec};

    struct Fixture {
        ledger: Arc<InMemoryLedger>,
        owner: Identity,
        asset: AssetRef,
        shares: Vec<Share>,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(InMemoryLedger::new());
        let owner = Identity::generate();
        let asset = ledger.mint(&owner.account());
        let shares = split(&[0x42; 32], SplitSpec::new(3, 2).unwrap()).unwrap();
        Fixture {
            ledger,
            owner,
            asset,
            shares,
        }
    }

    fn custodian(fx: &Fixture, id: &str) -> EnclaveCustodian {
        EnclaveCustodian::new(EnclaveConfig::simulated(id), fx.ledger.clone()).unwrap()
    }

    async fn store_committed(fx: &Fixture, c: &EnclaveCustodian, share: &Share) {
        let proof = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        c.store_share(share, &proof).await.unwrap();
        let proof = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        c.commit_share(&fx.asset, share.split_id, &proof).await.unwrap();
    }

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let fx = fixture();
        let c = custodian(&fx, "custodian-a");

        let proof = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        let ack = c.store_share(&fx.shares[0], &proof).await.unwrap();
        assert_eq!(ack.share_index, 1);
        assert_eq!(ack.custodian_id, "custodian-a");
        assert_eq!(c.share_count().await, 1);

        let proof = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        let result = c.retrieve_share(&fx.asset, 1, &proof).await;
        assert!(matches!(result, Err(CustodianError::NotFound(_))));

        let proof = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        let committed = c
            .commit_share(&fx.asset, fx.shares[0].split_id, &proof)
            .await
            .unwrap();
        assert_eq!(committed.share_index, 1);
        let replayed = c
            .commit_share(&fx.asset, fx.shares[0].split_id, &proof)
            .await
            .unwrap();
        assert_eq!(committed, replayed);

        let proof = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        let share = c.retrieve_share(&fx.asset, 1, &proof).await.unwrap();
        assert_eq!(share.value(), fx.shares[0].value());
        assert_eq!(share.split_id, fx.shares[0].split_id);
        assert_eq!(share.owner_proof.as_ref().unwrap().asset_ref, fx.asset);
    }

    #[tokio::test]
    async fn test_store_is_idempotent_but_never_overwrites() {
        let fx = fixture();
        let c = custodian(&fx, "custodian-a");
        let proof = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();

        let first = c.store_share(&fx.shares[0], &proof).await.unwrap();
        let replay = c.store_share(&fx.shares[0], &proof).await.unwrap();
        assert_eq!(first, replay);

        let other_proof = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        let again = c.store_share(&fx.shares[0], &other_proof).await.unwrap();
        assert_eq!(first, again);

        let third = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        let result = c.store_share(&fx.shares[1], &third).await;
        assert!(matches!(result, Err(CustodianError::AlreadyStored(_))));
    }

    #[tokio::test]
    async fn test_retrieve_replay_returns_identical_bytes() {
        let fx = fixture();
        let c = custodian(&fx, "custodian-a");
        let store_proof = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        c.store_share(&fx.shares[2], &store_proof).await.unwrap();
        let commit_proof = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        c.commit_share(&fx.asset, fx.shares[2].split_id, &commit_proof)
            .await
            .unwrap();

        let proof = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        let a = c.retrieve_share(&fx.asset, 3, &proof).await.unwrap();
        let b = c.retrieve_share(&fx.asset, 3, &proof).await.unwrap();
        assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());

        // a store proof cannot be spent again on a retrieval
        let result = c.retrieve_share(&fx.asset, 3, &store_proof).await;
        assert!(matches!(result, Err(CustodianError::ProofRejected(_))));
    }

    #[tokio::test]
    async fn test_rejects_non_owner_and_mismatched_asset() {
        let fx = fixture();
        let c = custodian(&fx, "custodian-a");
        store_committed(&fx, &c, &fx.shares[0]).await;

        let mallory = Identity::generate();
        let forged = OwnershipProof::issue(&mallory, &fx.asset, chrono::Duration::seconds(60));
        let result = c.retrieve_share(&fx.asset, 1, &forged).await;
        assert!(matches!(result, Err(CustodianError::ProofRejected(_))));

        let other_asset = fx.ledger.mint(&fx.owner.account());
        let proof = fx.ledger.sign_proof(&fx.owner, &other_asset).unwrap();
        let result = c.retrieve_share(&fx.asset, 1, &proof).await;
        assert!(matches!(result, Err(CustodianError::ProofRejected(_))));
    }

    #[tokio::test]
    async fn test_transfer_releases_to_new_owner_only() {
        let fx = fixture();
        let c = custodian(&fx, "custodian-a");
        store_committed(&fx, &c, &fx.shares[0]).await;

        let stale = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        let buyer = Identity::generate();
        fx.ledger
            .transfer(&fx.asset, &fx.owner, &buyer.account())
            .unwrap();

        let result = c.retrieve_share(&fx.asset, 1, &stale).await;
        assert!(matches!(result, Err(CustodianError::ProofRejected(_))));

        let proof = fx.ledger.sign_proof(&buyer, &fx.asset).unwrap();
        assert!(c.retrieve_share(&fx.asset, 1, &proof).await.is_ok());
    }

    #[tokio::test]
    async fn test_wrong_index_and_missing_share() {
        let fx = fixture();
        let c = custodian(&fx, "custodian-a");
        let proof = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        let result = c.retrieve_share(&fx.asset, 1, &proof).await;
        assert!(matches!(result, Err(CustodianError::NotFound(_))));

        store_committed(&fx, &c, &fx.shares[0]).await;
        let proof = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        let result = c.retrieve_share(&fx.asset, 2, &proof).await;
        assert!(matches!(result, Err(CustodianError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_health_is_idempotent_and_attested() {
        let fx = fixture();
        let c = custodian(&fx, "custodian-a");

        let a = c.health("challenge-1").await.unwrap();
        let b = c.health("challenge-1").await.unwrap();
        assert_eq!(a.status, HealthStatus::Healthy);
        assert_eq!(a.status, b.status);
        assert_eq!(c.share_count().await, 0);

        let quote = a.quote.unwrap();
        assert!(verify_quote(&quote, "challenge-1", &AttestationPolicy::default()).is_trusted());
        assert_eq!(quote.attestation_key, c.attestation_key());
    }

    #[tokio::test]
    async fn test_unavailable_custodian_is_unreachable() {
        let fx = fixture();
        let c = custodian(&fx, "custodian-a");
        c.set_status(HealthStatus::Unavailable).await;

        let proof = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        let result = c.store_share(&fx.shares[0], &proof).await;
        assert!(matches!(result, Err(CustodianError::Unreachable(_))));
        assert!(matches!(
            c.health("x").await,
            Err(CustodianError::Unreachable(_))
        ));

        c.set_status(HealthStatus::Degraded).await;
        assert_eq!(c.health("x").await.unwrap().status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_sealed_shares_survive_restart() {
        let fx = fixture();
        let dir = std::env::temp_dir().join(format!("custody-enclave-{}", uuid::Uuid::new_v4()));
        let config = EnclaveConfig::simulated("custodian-p").with_sealed_dir(&dir);

        {
            let c = EnclaveCustodian::new(config.clone(), fx.ledger.clone()).unwrap();
            store_committed(&fx, &c, &fx.shares[1]).await;
        }

        let restarted = EnclaveCustodian::new(config, fx.ledger.clone()).unwrap();
        assert_eq!(restarted.share_count().await, 1);
        let proof = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        let share = restarted.retrieve_share(&fx.asset, 2, &proof).await.unwrap();
        assert_eq!(share.value(), fx.shares[1].value());

        // a different custodian id cannot read the sealed index
        let index_path = SealedIndex::path_in(&dir, "custodian-p");
        std::fs::copy(&index_path, SealedIndex::path_in(&dir, "custodian-q")).unwrap();
        let imposter = EnclaveConfig::simulated("custodian-q").with_sealed_dir(&dir);
        assert!(EnclaveCustodian::new(imposter, fx.ledger.clone()).is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_pending_share_is_superseded_by_a_new_split() {
        let fx = fixture();
        let c = custodian(&fx, "custodian-a");
        let proof = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        c.store_share(&fx.shares[0], &proof).await.unwrap();

        let retry = split(&[0x17; 32], SplitSpec::new(3, 2).unwrap()).unwrap();
        let proof = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        let ack = c.store_share(&retry[1], &proof).await.unwrap();
        assert_eq!(ack.split_id, retry[1].split_id);
        assert_eq!(c.share_count().await, 1);

        // the old split can no longer be committed
        let proof = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        let result = c.commit_share(&fx.asset, fx.shares[0].split_id, &proof).await;
        assert!(matches!(result, Err(CustodianError::NotFound(_))));

        let proof = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        c.commit_share(&fx.asset, retry[1].split_id, &proof)
            .await
            .unwrap();
        let proof = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        let share = c.retrieve_share(&fx.asset, 2, &proof).await.unwrap();
        assert_eq!(share.value(), retry[1].value());
    }

    #[tokio::test]
    async fn test_committed_share_is_never_replaced() {
        let fx = fixture();
        let c = custodian(&fx, "custodian-a");
        store_committed(&fx, &c, &fx.shares[0]).await;

        let other = split(&[0x17; 32], SplitSpec::new(3, 2).unwrap()).unwrap();
        let proof = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        let result = c.store_share(&other[0], &proof).await;
        assert!(matches!(result, Err(CustodianError::AlreadyStored(_))));

        let proof = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        let share = c.retrieve_share(&fx.asset, 1, &proof).await.unwrap();
        assert_eq!(share.split_id, fx.shares[0].split_id);
    }

    #[tokio::test]
    async fn test_commit_needs_a_valid_proof() {
        let fx = fixture();
        let c = custodian(&fx, "custodian-a");
        let proof = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        c.store_share(&fx.shares[0], &proof).await.unwrap();

        // a store proof is spent and a stranger's proof never verifies
        let result = c.commit_share(&fx.asset, fx.shares[0].split_id, &proof).await;
        assert!(matches!(result, Err(CustodianError::ProofRejected(_))));
        let mallory = Identity::generate();
        let forged = OwnershipProof::issue(&mallory, &fx.asset, chrono::Duration::seconds(60));
        let result = c.commit_share(&fx.asset, fx.shares[0].split_id, &forged).await;
        assert!(matches!(result, Err(CustodianError::ProofRejected(_))));
    }

    #[tokio::test]
    async fn test_non_ascii_account_is_rejected_not_panicking() {
        let fx = fixture();
        let c = custodian(&fx, "custodian-a");
        store_committed(&fx, &c, &fx.shares[0]).await;

        let mut forged = fx.ledger.sign_proof(&fx.owner, &fx.asset).unwrap();
        forged.account = serde_json::from_str("\"aaaaaaa\u{e9}-bogus\"").unwrap();
        let result = c.retrieve_share(&fx.asset, 1, &forged).await;
        assert!(matches!(result, Err(CustodianError::ProofRejected(_))));

        let result = c.store_share(&fx.shares[0], &forged).await;
        assert!(matches!(result, Err(CustodianError::ProofRejected(_))));
    }
}
