//! Custody: secret payloads for on-chain assets, guarded by a custodian quorum
//!
//! A payload is encrypted to a fresh key pair, the ciphertext goes to
//! content-addressed storage, and the private key is split K-of-N with
//! Shamir's scheme over enclave custodians. Any current owner of the asset
//! can gather K shares back and decrypt; no single custodian ever can.

pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod custodian;
pub mod error;
pub mod ledger;
pub mod sharing;
pub mod storage;

pub use config::CustodyConfig;
pub use coordinator::{protect, request_decryption, CustodyContext, SecretRecord};
pub use crypto::{decrypt, encrypt, EncryptedPayload, KeyPair, PublicKey};
pub use custodian::{CustodianClient, CustodianEndpoint, EnclaveCustodian, RemoteCustodian};
pub use error::CustodyError;
pub use ledger::{AssetRef, Identity, InMemoryLedger, Ledger, OwnershipProof};
pub use sharing::{reconstruct, split, Share, SplitSpec};
pub use storage::{BlobStore, ContentId, DiskBlobStore, MemoryBlobStore};
