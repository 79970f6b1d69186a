//! Shamir secret sharing over GF(256)
//!
//! Every byte of the secret is the constant term of its own random
//! polynomial of degree K-1; share `i` holds the evaluations at x = i.
//! Any K shares determine the polynomials, any K-1 are uniformly
//! distributed whatever the secret.

use super::field::Gf256;
use super::SharingError;
use crate::ledger::OwnershipProof;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

/// Number of shares N and reconstruction threshold K
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitSpec {
    pub total_shares: u8,
    pub threshold: u8,
}

impl SplitSpec {
    pub fn new(total_shares: u8, threshold: u8) -> Result<Self, SharingError> {
        let spec = Self {
            total_shares,
            threshold,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Check 1 ≤ K ≤ N
    pub fn validate(&self) -> Result<(), SharingError> {
        if self.threshold < 1 || self.threshold > self.total_shares {
            return Err(SharingError::InvalidSplitSpec {
                total_shares: self.total_shares,
                threshold: self.threshold,
            });
        }
        Ok(())
    }

    pub fn quorum(&self) -> usize {
        self.threshold as usize
    }
}

impl Default for SplitSpec {
    fn default() -> Self {
        Self {
            total_shares: 5,
            threshold: 3,
        }
    }
}

impl fmt::Display for SplitSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-of-{}", self.threshold, self.total_shares)
    }
}

/// One share of a split secret.
///
/// The value is zeroized on drop. `owner_proof` is attached when the share
/// is handed to a custodian and binds it to a ledger identity and asset.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    /// Identifies the split this share belongs to
    pub split_id: Uuid,
    /// x-coordinate, 1..=N
    pub index: u8,
    pub threshold: u8,
    #[serde(with = "hex::serde")]
    value: Vec<u8>,
    /// SHA-256 over split id, index, threshold and value
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_proof: Option<OwnershipProof>,
}

impl Share {
    pub(crate) fn new(split_id: Uuid, index: u8, threshold: u8, value: Vec<u8>) -> Self {
        let checksum = Self::compute_checksum(&split_id, index, threshold, &value);
        Self {
            split_id,
            index,
            threshold,
            value,
            checksum,
            owner_proof: None,
        }
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Attach the ownership proof the share is stored under
    pub fn with_owner_proof(mut self, proof: OwnershipProof) -> Self {
        self.owner_proof = Some(proof);
        self
    }

    pub fn verify_checksum(&self) -> bool {
        self.checksum
            == Self::compute_checksum(&self.split_id, self.index, self.threshold, &self.value)
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    fn compute_checksum(split_id: &Uuid, index: u8, threshold: u8, value: &[u8]) -> String {
        let mut h = Sha256::new();
        h.update(b"custody-share-v1");
        h.update(split_id.as_bytes());
        h.update([index, threshold]);
        h.update((value.len() as u64).to_le_bytes());
        h.update(value);
        hex::encode(h.finalize())
    }
}

impl Drop for Share {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share")
            .field("split_id", &self.split_id)
            .field("index", &self.index)
            .field("threshold", &self.threshold)
            .field("value", &format_args!("<{} bytes>", self.value.len()))
            .field("owner_proof", &self.owner_proof.as_ref().map(|p| &p.nonce))
            .finish()
    }
}

fn random_coefficients(secret_byte: u8, threshold: u8, rng: &mut OsRng) -> Zeroizing<Vec<Gf256>> {
    let mut raw = Zeroizing::new(vec![0u8; threshold as usize]);
    rng.fill_bytes(&mut raw[..]);
    raw[0] = secret_byte;
    Zeroizing::new(raw.iter().map(|b| Gf256(*b)).collect())
}

/// Split `secret` into `spec.total_shares` shares, any `spec.threshold` of
/// which reconstruct it.
pub fn split(secret: &[u8], spec: SplitSpec) -> Result<Vec<Share>, SharingError> {
    spec.validate()?;
    if secret.is_empty() {
        return Err(SharingError::EmptySecret);
    }

    let n = spec.total_shares as usize;
    let mut values: Vec<Vec<u8>> = vec![vec![0u8; secret.len()]; n];
    let mut rng = OsRng;

    for (pos, &byte) in secret.iter().enumerate() {
        let coeffs = random_coefficients(byte, spec.threshold, &mut rng);
        for (i, value) in values.iter_mut().enumerate() {
            let x = Gf256(i as u8 + 1);
            value[pos] = Gf256::eval_polynomial(&coeffs, x).0;
        }
    }

    let split_id = Uuid::new_v4();
    log::debug!(
        "Split {}B secret into {} shares (split {})",
        secret.len(),
        spec,
        split_id
    );

    Ok(values
        .into_iter()
        .enumerate()
        .map(|(i, value)| Share::new(split_id, i as u8 + 1, spec.threshold, value))
        .collect())
}

/// Drop later duplicates of an index, keeping the first occurrence
fn dedup_first(shares: &[Share]) -> Vec<&Share> {
    let mut seen = HashSet::new();
    shares.iter().filter(|s| seen.insert(s.index)).collect()
}

/// Check that every share is well-formed and belongs to the same split
fn check_consistency(shares: &[&Share], spec: &SplitSpec) -> Result<(), SharingError> {
    let first = match shares.first() {
        Some(s) => s,
        None => return Ok(()),
    };
    for share in shares {
        if share.index == 0 || share.index > spec.total_shares {
            return Err(SharingError::InvalidShare(format!(
                "index {} outside 1..={}",
                share.index, spec.total_shares
            )));
        }
        if !share.verify_checksum() {
            return Err(SharingError::InvalidShare(format!(
                "checksum mismatch on share {}",
                share.index
            )));
        }
        if share.threshold != spec.threshold {
            return Err(SharingError::InvalidShare(format!(
                "share {} has threshold {}, expected {}",
                share.index, share.threshold, spec.threshold
            )));
        }
        if share.split_id != first.split_id {
            return Err(SharingError::InvalidShare(format!(
                "share {} belongs to split {}, expected {}",
                share.index, share.split_id, first.split_id
            )));
        }
        if share.value.is_empty() || share.value.len() != first.value.len() {
            return Err(SharingError::InvalidShare(format!(
                "share {} has length {}, expected {}",
                share.index,
                share.value.len(),
                first.value.len()
            )));
        }
    }
    Ok(())
}

/// Reconstruct the secret from at least K shares.
///
/// Duplicate indices keep their first occurrence. Shares beyond the first K
/// (by index) must lie on the same polynomials, otherwise the set decodes
/// to different secrets and is rejected.
pub fn reconstruct(shares: &[Share], spec: SplitSpec) -> Result<Zeroizing<Vec<u8>>, SharingError> {
    spec.validate()?;

    let mut unique = dedup_first(shares);
    if unique.len() < spec.quorum() {
        return Err(SharingError::InsufficientShares {
            needed: spec.quorum(),
            provided: unique.len(),
        });
    }
    check_consistency(&unique, &spec)?;

    unique.sort_by_key(|s| s.index);
    let (basis, extra) = unique.split_at(spec.quorum());
    let len = basis[0].value.len();

    let mut secret = Zeroizing::new(vec![0u8; len]);
    let mut points: Vec<(Gf256, Gf256)> = Vec::with_capacity(basis.len());
    let mut mismatch = None;
    'bytes: for pos in 0..len {
        points.clear();
        points.extend(basis.iter().map(|s| (Gf256(s.index), Gf256(s.value[pos]))));
        secret[pos] = Gf256::interpolate_at(&points, Gf256::ZERO).0;

        for share in extra {
            let expected = Gf256::interpolate_at(&points, Gf256(share.index));
            if expected.0 != share.value[pos] {
                mismatch = Some(share.index);
                break 'bytes;
            }
        }
    }
    points.iter_mut().for_each(|(_, y)| y.zeroize());

    if let Some(index) = mismatch {
        return Err(SharingError::InvalidShare(format!(
            "share {} decodes to a different secret",
            index
        )));
    }
    Ok(secret)
}

/// Re-randomize shares without reconstructing the secret.
///
/// Adds a random polynomial with zero constant term to every share. The
/// refreshed set gets a new split id so it can never be mixed with the old
/// one.
pub fn refresh(shares: &[Share], spec: SplitSpec) -> Result<Vec<Share>, SharingError> {
    spec.validate()?;
    let unique = dedup_first(shares);
    if unique.is_empty() {
        return Err(SharingError::InsufficientShares {
            needed: 1,
            provided: 0,
        });
    }
    check_consistency(&unique, &spec)?;

    let len = unique[0].value.len();
    let mut values: Vec<Vec<u8>> = unique.iter().map(|s| s.value.clone()).collect();
    let mut rng = OsRng;

    for pos in 0..len {
        let coeffs = random_coefficients(0, spec.threshold, &mut rng);
        for (share, value) in unique.iter().zip(values.iter_mut()) {
            let delta = Gf256::eval_polynomial(&coeffs, Gf256(share.index));
            value[pos] = (Gf256(value[pos]) + delta).0;
        }
    }

    let split_id = Uuid::new_v4();
    log::debug!(
        "Refreshed {} shares of split {} into split {}",
        unique.len(),
        unique[0].split_id,
        split_id
    );

    Ok(unique
        .iter()
        .zip(values)
        .map(|(old, value)| {
            let mut fresh = Share::new(split_id, old.index, spec.threshold, value);
            fresh.owner_proof = old.owner_proof.clone();
            fresh
        })
        .collect())
}
