//! Ownership proofs: signed, time-bounded claims over a ledger asset

use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;

const PROOF_DOMAIN: &[u8] = b"custody-ownership-proof-v1";

/// Reference to an asset on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetRef(String);

impl AssetRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ledger account, the hex-encoded Ed25519 verifying key of its holder
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 chars, for logs. Deserialized accounts need not be hex.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }

    fn verifying_key(&self) -> Option<VerifyingKey> {
        let bytes: [u8; 32] = hex::decode(&self.0).ok()?.try_into().ok()?;
        VerifyingKey::from_bytes(&bytes).ok()
    }
}

impl From<&VerifyingKey> for AccountId {
    fn from(key: &VerifyingKey) -> Self {
        Self(hex::encode(key.as_bytes()))
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Signing identity of a ledger account. The secret key never leaves the
/// process and is wiped on drop.
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(secret),
        }
    }

    pub fn account(&self) -> AccountId {
        AccountId::from(&self.signing_key.verifying_key())
    }

    pub(crate) fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.account().short())
    }
}

/// Signed assertion that `account` controls `asset_ref`.
///
/// Valid only between `issued_at` and `expires_at`. Custodians treat the
/// nonce as single-use per operation and asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipProof {
    pub account: AccountId,
    pub asset_ref: AssetRef,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

impl OwnershipProof {
    /// Sign a fresh proof for `asset_ref`, valid for `validity` from now
    pub fn issue(identity: &Identity, asset_ref: &AssetRef, validity: Duration) -> Self {
        let issued_at = Utc::now();
        let mut proof = Self {
            account: identity.account(),
            asset_ref: asset_ref.clone(),
            nonce: uuid::Uuid::new_v4().to_string(),
            issued_at,
            expires_at: issued_at + validity,
            signature: Vec::new(),
        };
        proof.signature = identity.sign(&proof.signing_payload()).to_bytes().to_vec();
        proof
    }

    /// Check the signature against the account key. Says nothing about
    /// expiry or current ownership.
    pub fn verify_signature(&self) -> bool {
        let key = match self.account.verifying_key() {
            Some(k) => k,
            None => return false,
        };
        let signature = match Signature::from_slice(&self.signature) {
            Ok(s) => s,
            Err(_) => return false,
        };
        key.verify_strict(&self.signing_payload(), &signature).is_ok()
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.issued_at <= now && now < self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    fn signing_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(PROOF_DOMAIN);
        for field in [
            self.account.as_str(),
            self.asset_ref.as_str(),
            self.nonce.as_str(),
        ] {
            out.extend_from_slice(&(field.len() as u32).to_be_bytes());
            out.extend_from_slice(field.as_bytes());
        }
        out.extend_from_slice(&self.issued_at.timestamp_millis().to_be_bytes());
        out.extend_from_slice(&self.expires_at.timestamp_millis().to_be_bytes());
        out
    }
}
