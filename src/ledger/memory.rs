//! In-process asset ledger used by tests, the demo and local deployments

use super::proof::{AccountId, AssetRef, Identity, OwnershipProof};
use super::{Ledger, LedgerError};
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Default lifetime of proofs signed through this ledger
pub const DEFAULT_PROOF_VALIDITY_SECS: i64 = 300;

/// Asset ownership table with mint and transfer
pub struct InMemoryLedger {
    owners: RwLock<HashMap<AssetRef, AccountId>>,
    proof_validity: Duration,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::with_proof_validity(Duration::seconds(DEFAULT_PROOF_VALIDITY_SECS))
    }

    pub fn with_proof_validity(proof_validity: Duration) -> Self {
        Self {
            owners: RwLock::new(HashMap::new()),
            proof_validity,
        }
    }

    /// Create a new asset owned by `owner`
    pub fn mint(&self, owner: &AccountId) -> AssetRef {
        let asset = AssetRef::new(format!("asset-{}", uuid::Uuid::new_v4()));
        self.owners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(asset.clone(), owner.clone());
        log::info!("Minted {} for {}", asset, owner.short());
        asset
    }

    /// Move `asset` from the signing `from` identity to `to`
    pub fn transfer(
        &self,
        asset: &AssetRef,
        from: &Identity,
        to: &AccountId,
    ) -> Result<(), LedgerError> {
        let mut owners = self.owners.write().unwrap_or_else(PoisonError::into_inner);
        let current = owners
            .get_mut(asset)
            .ok_or_else(|| LedgerError::UnknownAsset(asset.to_string()))?;
        let sender = from.account();
        if *current != sender {
            return Err(LedgerError::NotOwner {
                asset: asset.to_string(),
                account: sender.to_string(),
            });
        }
        *current = to.clone();
        log::info!("Transferred {}: {} -> {}", asset, sender.short(), to.short());
        Ok(())
    }

    pub fn owner_of(&self, asset: &AssetRef) -> Option<AccountId> {
        self.owners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(asset)
            .cloned()
    }

    pub fn asset_count(&self) -> usize {
        self.owners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger for InMemoryLedger {
    fn sign_proof(
        &self,
        identity: &Identity,
        asset: &AssetRef,
    ) -> Result<OwnershipProof, LedgerError> {
        let owner = self
            .owner_of(asset)
            .ok_or_else(|| LedgerError::UnknownAsset(asset.to_string()))?;
        let account = identity.account();
        if owner != account {
            return Err(LedgerError::NotOwner {
                asset: asset.to_string(),
                account: account.to_string(),
            });
        }
        Ok(OwnershipProof::issue(identity, asset, self.proof_validity))
    }

    fn verify_proof(&self, proof: &OwnershipProof) -> bool {
        if !proof.verify_signature() {
            log::debug!("Proof {} has a bad signature", proof.nonce);
            return false;
        }
        if !proof.is_valid_at(Utc::now()) {
            log::debug!("Proof {} is outside its validity window", proof.nonce);
            return false;
        }
        match self.owner_of(&proof.asset_ref) {
            Some(owner) if owner == proof.account => true,
            _ => {
                log::debug!(
                    "Proof {}: {} does not own {}",
                    proof.nonce,
                    proof.account.short(),
                    proof.asset_ref
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_and_prove() {
        let ledger = InMemoryLedger::new();
        let alice = Identity::generate();
        let asset = ledger.mint(&alice.account());

        assert_eq!(ledger.owner_of(&asset), Some(alice.account()));
        let proof = ledger.sign_proof(&alice, &asset).unwrap();
        assert!(ledger.verify_proof(&proof));
    }

    #[test]
    fn test_non_owner_cannot_sign() {
        let ledger = InMemoryLedger::new();
        let alice = Identity::generate();
        let mallory = Identity::generate();
        let asset = ledger.mint(&alice.account());

        assert!(matches!(
            ledger.sign_proof(&mallory, &asset),
            Err(LedgerError::NotOwner { .. })
        ));
        assert!(matches!(
            ledger.sign_proof(&alice, &AssetRef::new("nope")),
            Err(LedgerError::UnknownAsset(_))
        ));

        // a self-signed proof over someone else's asset verifies cryptographically
        // but not against the ledger
        let forged = OwnershipProof::issue(&mallory, &asset, Duration::seconds(60));
        assert!(forged.verify_signature());
        assert!(!ledger.verify_proof(&forged));
    }

    #[test]
    fn test_transfer_moves_ownership() {
        let ledger = InMemoryLedger::new();
        let alice = Identity::generate();
        let bob = Identity::generate();
        let asset = ledger.mint(&alice.account());
        let old_proof = ledger.sign_proof(&alice, &asset).unwrap();

        // only the current owner can transfer
        assert!(ledger.transfer(&asset, &bob, &bob.account()).is_err());

        ledger.transfer(&asset, &alice, &bob.account()).unwrap();
        assert_eq!(ledger.owner_of(&asset), Some(bob.account()));
        assert!(!ledger.verify_proof(&old_proof));

        let new_proof = ledger.sign_proof(&bob, &asset).unwrap();
        assert!(ledger.verify_proof(&new_proof));
    }

    #[test]
    fn test_expired_proof_rejected() {
        let ledger = InMemoryLedger::with_proof_validity(Duration::seconds(-1));
        let alice = Identity::generate();
        let asset = ledger.mint(&alice.account());
        let proof = ledger.sign_proof(&alice, &asset).unwrap();
        assert!(!ledger.verify_proof(&proof));
    }
}
