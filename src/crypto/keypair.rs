//! X25519 key pairs for payload encryption

use super::CryptoError;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use x25519_dalek::StaticSecret;
use zeroize::{Zeroize, Zeroizing};

/// Size of public and private keys in bytes
pub const KEY_SIZE: usize = 32;

/// Public half of an encryption key pair.
///
/// Serialized as a lowercase hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_SIZE]);

impl PublicKey {
    /// Parse a public key from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!(
                "public key must be {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            ))
        })?;
        if arr.iter().all(|b| *b == 0) {
            return Err(CryptoError::InvalidKey("all-zero public key".into()));
        }
        Ok(Self(arr))
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes =
            hex::decode(s).map_err(|e| CryptoError::InvalidKey(format!("hex decode: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short fingerprint for logs
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::new()
            .chain_update(b"custody-pubkey-fingerprint-v1")
            .chain_update(self.0)
            .finalize();
        hex::encode(&digest[..8])
    }

    pub(crate) fn to_dalek(self) -> x25519_dalek::PublicKey {
        x25519_dalek::PublicKey::from(self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PublicKey::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Private half of an encryption key pair. Zeroized on drop, never serialized.
pub struct PrivateKey(Zeroizing<[u8; KEY_SIZE]>);

impl PrivateKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "private key must be {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }
        let mut arr = Zeroizing::new([0u8; KEY_SIZE]);
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Derive the matching public key
    pub fn public_key(&self) -> PublicKey {
        let secret = self.to_dalek();
        PublicKey(*x25519_dalek::PublicKey::from(&secret).as_bytes())
    }

    pub(crate) fn to_dalek(&self) -> StaticSecret {
        StaticSecret::from(*self.0)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// An X25519 key pair.
///
/// The private key lives only in memory; once it has been split and the
/// shares distributed it should be dropped, which zeroizes it.
pub struct KeyPair {
    pub public_key: PublicKey,
    private_key: PrivateKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS entropy source
    pub fn generate() -> Result<Self, CryptoError> {
        let mut seed = Zeroizing::new([0u8; KEY_SIZE]);
        OsRng
            .try_fill_bytes(&mut seed[..])
            .map_err(|e| CryptoError::KeyGen(e.to_string()))?;
        let private_key = PrivateKey::from_bytes(&seed[..])?;
        let public_key = private_key.public_key();
        log::debug!("Generated key pair {}", public_key.fingerprint());
        Ok(Self {
            public_key,
            private_key,
        })
    }

    /// Rebuild a key pair from a private key
    pub fn from_private_key(private_key: PrivateKey) -> Self {
        let public_key = private_key.public_key();
        Self {
            public_key,
            private_key,
        }
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// Consume the pair, keeping only the private key
    pub fn into_private_key(self) -> PrivateKey {
        self.private_key
    }
}

impl Zeroize for KeyPair {
    fn zeroize(&mut self) {
        self.private_key.0.zeroize();
    }
}
