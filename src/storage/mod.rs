//! Content-addressed blob storage for encrypted payloads
//!
//! Blobs are keyed by the SHA-256 of their bytes; every fetch re-hashes the
//! content so a corrupted store is detected rather than decrypted.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// SHA-256 hex digest identifying a blob
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    pub fn of(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    /// Parse a content id, accepting only 64 hex chars
    pub fn parse(s: &str) -> Result<Self, StorageError> {
        if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidId(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn matches(&self, data: &[u8]) -> bool {
        *self == Self::of(data)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid content id: {0}")]
    InvalidId(String),

    #[error("Blob {0} does not match its content id")]
    Corrupted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Narrow content-addressed store interface
pub trait BlobStore: Send + Sync {
    fn store(&self, data: &[u8]) -> Result<ContentId, StorageError>;
    fn fetch(&self, id: &ContentId) -> Result<Vec<u8>, StorageError>;
}

/// Blob store held entirely in memory
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<ContentId, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn corrupt(&self, id: &ContentId) {
        if let Some(blob) = self
            .blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(id)
        {
            blob.push(0x00);
        }
    }
}

impl BlobStore for MemoryBlobStore {
    fn store(&self, data: &[u8]) -> Result<ContentId, StorageError> {
        let id = ContentId::of(data);
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.clone())
            .or_insert_with(|| data.to_vec());
        Ok(id)
    }

    fn fetch(&self, id: &ContentId) -> Result<Vec<u8>, StorageError> {
        let data = self
            .blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        if !id.matches(&data) {
            return Err(StorageError::Corrupted(id.to_string()));
        }
        Ok(data)
    }
}

/// Blob store backed by a directory, one file per content id
pub struct DiskBlobStore {
    root: PathBuf,
}

impl DiskBlobStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &ContentId) -> PathBuf {
        self.root.join(format!("{}.blob", id.as_str()))
    }
}

impl BlobStore for DiskBlobStore {
    fn store(&self, data: &[u8]) -> Result<ContentId, StorageError> {
        let id = ContentId::of(data);
        let path = self.path_for(&id);
        if !path.exists() {
            // write-then-rename so a crash never leaves a partial blob under its id
            let tmp = self.root.join(format!("{}.tmp-{}", id, uuid::Uuid::new_v4()));
            std::fs::write(&tmp, data)?;
            std::fs::rename(&tmp, &path)?;
            log::debug!("Stored blob {} ({}B)", &id.as_str()[..12], data.len());
        }
        Ok(id)
    }

    fn fetch(&self, id: &ContentId) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(id);
        let data = match std::fs::read(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if !id.matches(&data) {
            log::warn!("Blob {} failed its content hash check", id);
            return Err(StorageError::Corrupted(id.to_string()));
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_fetch() {
        let store = MemoryBlobStore::new();
        let id = store.store(b"ciphertext").unwrap();
        assert_eq!(id, ContentId::of(b"ciphertext"));
        assert_eq!(store.fetch(&id).unwrap(), b"ciphertext");

        // same content, same id, stored once
        assert_eq!(store.store(b"ciphertext").unwrap(), id);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_memory_missing_and_corrupted() {
        let store = MemoryBlobStore::new();
        let missing = ContentId::of(b"never stored");
        assert!(matches!(store.fetch(&missing), Err(StorageError::NotFound(_))));

        let id = store.store(b"data").unwrap();
        store.corrupt(&id);
        assert!(matches!(store.fetch(&id), Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn test_content_id_parse() {
        let id = ContentId::of(b"x");
        assert_eq!(ContentId::parse(id.as_str()).unwrap(), id);
        assert_eq!(ContentId::parse(&id.as_str().to_uppercase()).unwrap(), id);
        assert!(ContentId::parse("abc").is_err());
        assert!(ContentId::parse(&"z".repeat(64)).is_err());
    }

    #[test]
    fn test_disk_store_roundtrip_and_tamper() {
        let dir = std::env::temp_dir().join(format!("custody-blobs-{}", uuid::Uuid::new_v4()));
        let store = DiskBlobStore::open(&dir).unwrap();

        let id = store.store(b"encrypted media").unwrap();
        assert_eq!(store.fetch(&id).unwrap(), b"encrypted media");

        // reopen sees the same blob
        let reopened = DiskBlobStore::open(&dir).unwrap();
        assert_eq!(reopened.fetch(&id).unwrap(), b"encrypted media");

        std::fs::write(reopened.path_for(&id), b"swapped").unwrap();
        assert!(matches!(reopened.fetch(&id), Err(StorageError::Corrupted(_))));

        assert!(matches!(
            reopened.fetch(&ContentId::of(b"other")),
            Err(StorageError::NotFound(_))
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
