//! Sealed share storage inside a custodian enclave
//!
//! Shares are sealed with AES-256-GCM under a key derived from the enclave
//! measurement and custodian id, so only the same enclave identity can
//! unseal them. The sealed index (shares plus consumed proof nonces) can be
//! persisted to a JSON file and reloaded after restart.

use super::attestation::EnclaveMeasurement;
use super::CustodianError;
use crate::ledger::AssetRef;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use chrono::{DateTime, Utc};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use zeroize::Zeroizing;

const SEAL_NONCE_SIZE: usize = 12;

/// Enclave sealing key (simulated: derived from the measurement rather
/// than a hardware root key)
pub struct SealingKey(Zeroizing<[u8; 32]>);

impl SealingKey {
    pub fn derive(
        measurement: &EnclaveMeasurement,
        custodian_id: &str,
    ) -> Result<Self, CustodianError> {
        let mut ikm = Vec::with_capacity(128);
        ikm.extend_from_slice(measurement.mrenclave.as_bytes());
        ikm.extend_from_slice(measurement.mrsigner.as_bytes());
        let hk = Hkdf::<Sha256>::new(Some(custodian_id.as_bytes()), &ikm);
        let mut key = Zeroizing::new([0u8; 32]);
        hk.expand(b"custody-sealing-key-v1", &mut key[..])
            .map_err(|e| CustodianError::Sealing(format!("key derivation: {}", e)))?;
        Ok(Self(key))
    }

    fn cipher(&self) -> Result<Aes256Gcm, CustodianError> {
        Aes256Gcm::new_from_slice(&self.0[..])
            .map_err(|e| CustodianError::Sealing(format!("cipher init: {}", e)))
    }

    /// Seal `plaintext`; output is nonce || ciphertext+tag
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CustodianError> {
        let mut nonce = [0u8; SEAL_NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher()?
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| CustodianError::Sealing(format!("seal: {}", e)))?;
        let mut out = Vec::with_capacity(SEAL_NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn unseal(&self, sealed: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, CustodianError> {
        if sealed.len() < SEAL_NONCE_SIZE + 16 {
            return Err(CustodianError::Sealing("sealed data too short".into()));
        }
        let (nonce, ciphertext) = sealed.split_at(SEAL_NONCE_SIZE);
        self.cipher()?
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map(Zeroizing::new)
            .map_err(|_| CustodianError::Sealing("integrity check failed".into()))
    }
}

/// One sealed share plus its public metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedShare {
    pub split_id: Uuid,
    pub share_index: u8,
    pub checksum: String,
    #[serde(with = "hex::serde")]
    pub sealed: Vec<u8>,
    pub stored_at: DateTime<Utc>,
    /// Set once the coordinator confirms a quorum was placed; until then
    /// the share may be superseded by a later split
    #[serde(default)]
    pub committed: bool,
}

/// What a proof nonce was spent on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofUse {
    Store,
    Commit,
    Retrieve,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedNonce {
    pub operation: ProofUse,
    pub asset_ref: AssetRef,
    /// Past this the proof is dead anyway and the entry can go
    pub expires_at: DateTime<Utc>,
}

/// Everything a custodian holds, keyed by asset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedIndex {
    pub custodian_id: String,
    pub shares: HashMap<AssetRef, SealedShare>,
    pub consumed: HashMap<String, ConsumedNonce>,
    pub last_updated: DateTime<Utc>,
}

impl SealedIndex {
    pub fn new(custodian_id: impl Into<String>) -> Self {
        Self {
            custodian_id: custodian_id.into(),
            shares: HashMap::new(),
            consumed: HashMap::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn path_in(dir: &Path, custodian_id: &str) -> PathBuf {
        dir.join(format!("{}.sealed.json", custodian_id))
    }

    /// Load the index for `custodian_id` from `dir`, if one was saved
    pub fn load(dir: &Path, custodian_id: &str) -> Result<Option<Self>, CustodianError> {
        let path = Self::path_in(dir, custodian_id);
        let json = match std::fs::read_to_string(&path) {
            Ok(j) => j,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CustodianError::Sealing(format!("read index: {}", e))),
        };
        let index: SealedIndex = serde_json::from_str(&json)
            .map_err(|e| CustodianError::Sealing(format!("parse index: {}", e)))?;
        if index.custodian_id != custodian_id {
            return Err(CustodianError::Sealing(format!(
                "index at {} belongs to {}",
                path.display(),
                index.custodian_id
            )));
        }
        Ok(Some(index))
    }

    pub fn save(&self, dir: &Path) -> Result<(), CustodianError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| CustodianError::Sealing(format!("create dir: {}", e)))?;
        let path = Self::path_in(dir, &self.custodian_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CustodianError::Sealing(format!("serialize: {}", e)))?;
        std::fs::write(&tmp, json)
            .map_err(|e| CustodianError::Sealing(format!("write: {}", e)))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| CustodianError::Sealing(format!("rename: {}", e)))?;
        Ok(())
    }

    /// Drop nonce entries whose proofs have expired
    pub fn prune_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.consumed.len();
        self.consumed.retain(|_, c| c.expires_at > now);
        before - self.consumed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measurement() -> EnclaveMeasurement {
        EnclaveMeasurement::compute("custody-enclave", "custody-signer", 1, 1)
    }

    fn test_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("custody-sealed-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_seal_unseal() {
        let key = SealingKey::derive(&measurement(), "custodian-a").unwrap();
        let sealed = key.seal(b"share bytes", b"asset-1").unwrap();
        assert_eq!(&key.unseal(&sealed, b"asset-1").unwrap()[..], b"share bytes");
    }

    #[test]
    fn test_unseal_needs_same_identity_and_aad() {
        let key = SealingKey::derive(&measurement(), "custodian-a").unwrap();
        let sealed = key.seal(b"share bytes", b"asset-1").unwrap();

        let other = SealingKey::derive(&measurement(), "custodian-b").unwrap();
        assert!(other.unseal(&sealed, b"asset-1").is_err());
        assert!(key.unseal(&sealed, b"asset-2").is_err());

        let mut tampered = sealed.clone();
        tampered[SEAL_NONCE_SIZE] ^= 0xFF;
        assert!(key.unseal(&tampered, b"asset-1").is_err());
        assert!(key.unseal(&sealed[..8], b"asset-1").is_err());
    }

    #[test]
    fn test_index_persistence() {
        let dir = test_dir();
        let mut index = SealedIndex::new("custodian-a");
        index.shares.insert(
            AssetRef::new("asset-1"),
            SealedShare {
                split_id: Uuid::new_v4(),
                share_index: 2,
                checksum: "abc".into(),
                sealed: vec![1, 2, 3],
                stored_at: Utc::now(),
                committed: true,
            },
        );
        index.save(&dir).unwrap();

        let loaded = SealedIndex::load(&dir, "custodian-a").unwrap().unwrap();
        assert_eq!(loaded.shares, index.shares);
        assert!(SealedIndex::load(&dir, "custodian-b").unwrap().is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_prune_expired_nonces() {
        let mut index = SealedIndex::new("c");
        let now = Utc::now();
        for (nonce, offset) in [("old", -10), ("live", 10)] {
            index.consumed.insert(
                nonce.into(),
                ConsumedNonce {
                    operation: ProofUse::Retrieve,
                    asset_ref: AssetRef::new("a"),
                    expires_at: now + chrono::Duration::seconds(offset),
                },
            );
        }
        assert_eq!(index.prune_expired(now), 1);
        assert!(index.consumed.contains_key("live"));
    }
}
