//! Encrypted payload envelope (X25519 + HKDF-SHA256 + AES-256-GCM)

use super::keypair::{PrivateKey, PublicKey};
use super::CryptoError;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, SharedSecret};
use zeroize::Zeroizing;

/// Current envelope format version
pub const ENVELOPE_VERSION: u8 = 1;

/// AES-GCM nonce size in bytes
pub const NONCE_SIZE: usize = 12;

const KDF_INFO: &[u8] = b"custody-envelope-v1";

/// Ciphertext plus everything needed to decrypt it with the recipient's
/// private key. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub version: u8,
    /// Public key the payload was encrypted for
    pub recipient: PublicKey,
    /// Ephemeral X25519 public key of the sender
    pub ephemeral: PublicKey,
    #[serde(with = "hex::serde")]
    pub nonce: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub ciphertext: Vec<u8>,
}

impl EncryptedPayload {
    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    fn associated_data(&self) -> Vec<u8> {
        associated_data(self.version, &self.recipient, &self.ephemeral)
    }
}

fn associated_data(version: u8, recipient: &PublicKey, ephemeral: &PublicKey) -> Vec<u8> {
    let mut aad = Vec::with_capacity(1 + 2 * super::KEY_SIZE);
    aad.push(version);
    aad.extend_from_slice(recipient.as_bytes());
    aad.extend_from_slice(ephemeral.as_bytes());
    aad
}

fn derive_cipher(
    shared: &SharedSecret,
    recipient: &PublicKey,
    ephemeral: &PublicKey,
) -> Result<Aes256Gcm, String> {
    let mut salt = [0u8; 2 * super::KEY_SIZE];
    salt[..super::KEY_SIZE].copy_from_slice(ephemeral.as_bytes());
    salt[super::KEY_SIZE..].copy_from_slice(recipient.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared.as_bytes());
    let mut okm = Zeroizing::new([0u8; 32]);
    hk.expand(KDF_INFO, &mut okm[..])
        .map_err(|e| format!("HKDF expand: {}", e))?;
    Aes256Gcm::new_from_slice(&okm[..]).map_err(|e| format!("cipher init: {}", e))
}

/// Encrypt `payload` for `recipient`.
///
/// Fails only when the recipient key is malformed (a low-order point that
/// yields a non-contributory shared secret).
pub fn encrypt(payload: &[u8], recipient: &PublicKey) -> Result<EncryptedPayload, CryptoError> {
    let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = x25519_dalek::PublicKey::from(&ephemeral_secret);
    let ephemeral = PublicKey::from_bytes(ephemeral_public.as_bytes())?;

    let shared = ephemeral_secret.diffie_hellman(&recipient.to_dalek());
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKey(format!(
            "recipient key {} is a low-order point",
            recipient.fingerprint()
        )));
    }

    let cipher = derive_cipher(&shared, recipient, &ephemeral).map_err(CryptoError::Encryption)?;

    let mut nonce = vec![0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let aad = associated_data(ENVELOPE_VERSION, recipient, &ephemeral);
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: payload,
                aad: &aad,
            },
        )
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    log::debug!(
        "Encrypted {}B payload for {}",
        payload.len(),
        recipient.fingerprint()
    );

    Ok(EncryptedPayload {
        version: ENVELOPE_VERSION,
        recipient: *recipient,
        ephemeral,
        nonce,
        ciphertext,
    })
}

/// Decrypt an envelope with the recipient's private key
pub fn decrypt(
    envelope: &EncryptedPayload,
    private_key: &PrivateKey,
) -> Result<Vec<u8>, CryptoError> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(CryptoError::Decryption(format!(
            "unsupported envelope version {}",
            envelope.version
        )));
    }
    if private_key.public_key() != envelope.recipient {
        return Err(CryptoError::Decryption(
            "private key does not match envelope recipient".into(),
        ));
    }
    if envelope.nonce.len() != NONCE_SIZE {
        return Err(CryptoError::Decryption(format!(
            "nonce must be {} bytes, got {}",
            NONCE_SIZE,
            envelope.nonce.len()
        )));
    }

    let shared = private_key
        .to_dalek()
        .diffie_hellman(&envelope.ephemeral.to_dalek());
    if !shared.was_contributory() {
        return Err(CryptoError::Decryption("low-order ephemeral key".into()));
    }

    let cipher = derive_cipher(&shared, &envelope.recipient, &envelope.ephemeral)
        .map_err(CryptoError::Decryption)?;

    let aad = envelope.associated_data();
    cipher
        .decrypt(
            Nonce::from_slice(&envelope.nonce),
            Payload {
                msg: &envelope.ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| CryptoError::Decryption("authentication tag mismatch".into()))
}
