//! Secret splitter: K-of-N Shamir sharing of private keys
//!
//! Shares carry the split id, their index and a checksum so inconsistent
//! or corrupted sets are rejected instead of decoding to garbage.

mod field;
mod shamir;

pub use shamir::{reconstruct, refresh, split, Share, SplitSpec};

#[derive(Debug, thiserror::Error)]
pub enum SharingError {
    #[error("Invalid split spec: threshold {threshold} of {total_shares} shares")]
    InvalidSplitSpec { total_shares: u8, threshold: u8 },

    #[error("Insufficient shares: need {needed}, got {provided}")]
    InsufficientShares { needed: usize, provided: usize },

    #[error("Invalid share: {0}")]
    InvalidShare(String),

    #[error("Cannot split an empty secret")]
    EmptySecret,
}
