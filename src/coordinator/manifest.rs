//! Public records of protected assets
//!
//! A `SecretRecord` is what the chain would hold for a secret asset:
//! where the ciphertext lives, which public key it was sealed to, and
//! which custodian holds which share. Nothing in it is secret.

use crate::crypto::PublicKey;
use crate::error::CustodyError;
use crate::ledger::AssetRef;
use crate::sharing::SplitSpec;
use crate::storage::ContentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};
use uuid::Uuid;

/// One share placed with one custodian
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub custodian_id: String,
    pub share_index: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRecord {
    pub asset_ref: AssetRef,
    pub content_id: ContentId,
    pub public_key: PublicKey,
    pub split_id: Uuid,
    pub split_spec: SplitSpec,
    pub placements: Vec<Placement>,
    pub created_at: DateTime<Utc>,
}

impl SecretRecord {
    pub fn placement_for(&self, custodian_id: &str) -> Option<&Placement> {
        self.placements
            .iter()
            .find(|p| p.custodian_id == custodian_id)
    }

    pub fn quorum(&self) -> usize {
        self.split_spec.quorum()
    }
}

/// All secret records known to this coordinator, optionally backed by a
/// JSON file
pub struct RecordBook {
    records: RwLock<BTreeMap<AssetRef, SecretRecord>>,
    in_flight: Mutex<HashSet<AssetRef>>,
    path: Option<PathBuf>,
}

/// Exclusive claim on an asset while it is being protected. Dropping it
/// releases the asset; a record written through it stays unless withdrawn.
pub struct Reservation<'a> {
    book: &'a RecordBook,
    asset: AssetRef,
}

impl Reservation<'_> {
    /// Write `record` and persist the book. If the book cannot be saved the
    /// previous entry, if any, is put back.
    pub fn record(&self, record: SecretRecord) -> Result<(), std::io::Error> {
        let previous = self
            .book
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.asset.clone(), record);
        if let Err(e) = self.book.save() {
            let mut records = self.book.records.write().unwrap_or_else(PoisonError::into_inner);
            match previous {
                Some(p) => records.insert(self.asset.clone(), p),
                None => records.remove(&self.asset),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Drop the record written for this asset
    pub fn withdraw(&self) {
        self.book.remove(&self.asset);
        if let Err(e) = self.book.save() {
            log::warn!("Withdrawal of {} not saved: {}", self.asset, e);
        }
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.book
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.asset);
    }
}

impl RecordBook {
    pub fn in_memory() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            path: None,
        }
    }

    /// Open the book stored at `path`, starting empty if there is none
    pub fn open(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() {
            let json = std::fs::read_to_string(&path)?;
            let list: Vec<SecretRecord> = serde_json::from_str(&json)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            log::info!("Loaded {} secret records from {}", list.len(), path.display());
            list.into_iter().map(|r| (r.asset_ref.clone(), r)).collect()
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            records: RwLock::new(records),
            in_flight: Mutex::new(HashSet::new()),
            path: Some(path),
        })
    }

    pub fn save(&self) -> Result<(), std::io::Error> {
        let path = match &self.path {
            Some(p) => p,
            None => return Ok(()),
        };
        let list = self.list();
        let json = serde_json::to_string_pretty(&list)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Claim `asset` for a protect run. Fails if it already has a record
    /// or another run holds it.
    pub fn reserve(&self, asset: &AssetRef) -> Result<Reservation<'_>, CustodyError> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if self.contains(asset) {
            return Err(CustodyError::AlreadyProtected(asset.to_string()));
        }
        if !in_flight.insert(asset.clone()) {
            return Err(CustodyError::ProtectionInFlight(asset.to_string()));
        }
        Ok(Reservation {
            book: self,
            asset: asset.clone(),
        })
    }

    pub fn insert(&self, record: SecretRecord) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.asset_ref.clone(), record);
    }

    fn remove(&self, asset: &AssetRef) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(asset);
    }

    pub fn get(&self, asset: &AssetRef) -> Option<SecretRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(asset)
            .cloned()
    }

    pub fn contains(&self, asset: &AssetRef) -> bool {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(asset)
    }

    pub fn list(&self) -> Vec<SecretRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RecordBook {
    fn default() -> Self {
        Self::in_memory()
    }
}
