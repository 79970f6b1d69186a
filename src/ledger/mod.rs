//! Ledger interface: asset ownership and ownership proofs
//!
//! The chain itself lives outside this crate. Custodians and the
//! coordinator only need to sign and verify ownership proofs, which the
//! [`Ledger`] trait captures; [`InMemoryLedger`] is the reference
//! implementation.

mod memory;
mod proof;

pub use memory::{InMemoryLedger, DEFAULT_PROOF_VALIDITY_SECS};
pub use proof::{AccountId, AssetRef, Identity, OwnershipProof};

/// Narrow view of the ledger needed for key custody
pub trait Ledger: Send + Sync {
    /// Produce a fresh proof that `identity` controls `asset`
    fn sign_proof(&self, identity: &Identity, asset: &AssetRef)
        -> Result<OwnershipProof, LedgerError>;

    /// Check signature, validity window and current ownership
    fn verify_proof(&self, proof: &OwnershipProof) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Unknown asset: {0}")]
    UnknownAsset(String),

    #[error("Account {account} does not own {asset}")]
    NotOwner { asset: String, account: String },
}
