//! Crypto engine: hybrid public-key encryption for secret payloads
//!
//! A payload is sealed for a recipient X25519 public key:
//! - **Key agreement**: fresh ephemeral X25519 secret × recipient public key
//! - **Key derivation**: HKDF-SHA256 over the shared secret, salted with both
//!   public keys
//! - **Encryption**: AES-256-GCM with a random 96-bit nonce, both public keys
//!   bound as associated data
//!
//! Private keys are zeroized on drop and never serialized.

mod envelope;
mod keypair;

pub use envelope::{decrypt, encrypt, EncryptedPayload, ENVELOPE_VERSION, NONCE_SIZE};
pub use keypair::{KeyPair, PrivateKey, PublicKey, KEY_SIZE};

/// Crypto layer errors
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGen(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),
}
