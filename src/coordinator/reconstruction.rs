//! Decryption requests: collect K shares, rebuild the key, open the payload
//!
//! ```text
//! PENDING -> COLLECTING -> RECONSTRUCTING -> DECRYPTING -> DONE
//!               |               |                |
//!               +---------------+----------------+--> FAILED
//! ```
//!
//! Shares are requested from every placement at once. Collection stops as
//! soon as K valid shares are in, or once the answers still outstanding can
//! no longer make up K; the rest of the requests are dropped.

use super::context::CustodyContext;
use super::manifest::{Placement, SecretRecord};
use crate::crypto::{decrypt, EncryptedPayload, PrivateKey};
use crate::custodian::CustodianError;
use crate::error::{CustodianFailure, CustodyError};
use crate::ledger::{AssetRef, OwnershipProof};
use crate::sharing::{reconstruct, Share, SharingError};
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tokio::time::{self, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestState {
    Pending,
    Collecting,
    Reconstructing,
    Decrypting,
    Done,
    Failed,
}

impl RequestState {
    pub fn can_transition_to(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Pending, Collecting)
                | (Collecting, Reconstructing)
                | (Reconstructing, Decrypting)
                | (Decrypting, Done)
                | (Pending | Collecting | Reconstructing | Decrypting, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Done | RequestState::Failed)
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Pending => "PENDING",
            RequestState::Collecting => "COLLECTING",
            RequestState::Reconstructing => "RECONSTRUCTING",
            RequestState::Decrypting => "DECRYPTING",
            RequestState::Done => "DONE",
            RequestState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: RequestState,
    pub to: RequestState,
    pub at: DateTime<Utc>,
    pub note: String,
}

/// One decryption request and the states it went through
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptionSession {
    pub request_id: Uuid,
    pub asset_ref: AssetRef,
    state: RequestState,
    history: Vec<StateTransition>,
}

impl DecryptionSession {
    pub fn new(asset_ref: AssetRef) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            asset_ref,
            state: RequestState::Pending,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// States visited, starting with `Pending`
    pub fn path(&self) -> Vec<RequestState> {
        std::iter::once(RequestState::Pending)
            .chain(self.history.iter().map(|t| t.to))
            .collect()
    }

    fn advance(&mut self, to: RequestState, note: impl Into<String>) {
        if !self.state.can_transition_to(to) {
            warn!(
                "Request {}: ignoring transition {} -> {}",
                self.request_id, self.state, to
            );
            return;
        }
        let note = note.into();
        info!(
            "Request {} for {}: {} -> {} ({})",
            &self.request_id.to_string()[..8],
            self.asset_ref,
            self.state,
            to,
            note
        );
        self.history.push(StateTransition {
            from: self.state,
            to,
            at: Utc::now(),
            note,
        });
        self.state = to;
    }
}

/// Decrypt the payload behind `asset` for the holder of `proof`
pub async fn request_decryption(
    ctx: &CustodyContext,
    asset: &AssetRef,
    proof: &OwnershipProof,
) -> Result<Vec<u8>, CustodyError> {
    let (_, result) = run_decryption(ctx, asset, proof).await;
    result
}

/// Like `request_decryption`, also returning the session with its history
pub async fn run_decryption(
    ctx: &CustodyContext,
    asset: &AssetRef,
    proof: &OwnershipProof,
) -> (DecryptionSession, Result<Vec<u8>, CustodyError>) {
    let mut session = DecryptionSession::new(asset.clone());
    let result = drive(ctx, asset, proof, &mut session).await;
    if let Err(e) = &result {
        session.advance(RequestState::Failed, e.to_string());
    }
    (session, result)
}

async fn drive(
    ctx: &CustodyContext,
    asset: &AssetRef,
    proof: &OwnershipProof,
    session: &mut DecryptionSession,
) -> Result<Vec<u8>, CustodyError> {
    let record = ctx
        .records
        .get(asset)
        .ok_or_else(|| CustodyError::UnknownAsset(asset.to_string()))?;
    if proof.asset_ref != *asset {
        return Err(CustodyError::ProofRejected(format!(
            "proof covers {}, not {}",
            proof.asset_ref, asset
        )));
    }

    session.advance(
        RequestState::Collecting,
        format!(
            "{} placements, need {}",
            record.placements.len(),
            record.quorum()
        ),
    );
    let shares = collect_shares(ctx, &record, proof).await?;

    session.advance(
        RequestState::Reconstructing,
        format!("{} valid shares", shares.len()),
    );
    let secret = reconstruct(&shares, record.split_spec)?;
    let private_key = PrivateKey::from_bytes(&secret)?;
    drop(secret);
    if private_key.public_key() != record.public_key {
        return Err(SharingError::InvalidShare(
            "reconstructed key does not match the recorded public key".into(),
        )
        .into());
    }

    session.advance(RequestState::Decrypting, "key matches record");
    let bytes = ctx.blobs.fetch(&record.content_id)?;
    let envelope =
        EncryptedPayload::from_bytes(&bytes).map_err(|e| CustodyError::Envelope(e.to_string()))?;
    let payload = decrypt(&envelope, &private_key)?;

    session.advance(RequestState::Done, format!("{} bytes", payload.len()));
    Ok(payload)
}

/// Ask every placement for its share and keep the first K valid ones
async fn collect_shares(
    ctx: &CustodyContext,
    record: &SecretRecord,
    proof: &OwnershipProof,
) -> Result<Vec<Share>, CustodyError> {
    let needed = record.quorum();
    let deadline = Instant::now() + ctx.config.request_deadline();

    let mut pending: FuturesUnordered<_> = record
        .placements
        .iter()
        .map(|placement| async move {
            let result = ctx
                .custodians
                .retrieve_share(
                    &placement.custodian_id,
                    &record.asset_ref,
                    placement.share_index,
                    proof,
                )
                .await;
            (placement, result)
        })
        .collect();

    let mut shares: Vec<Share> = Vec::with_capacity(needed);
    let mut failures: Vec<CustodianFailure> = Vec::new();
    let mut answered: HashSet<&str> = HashSet::new();

    let collecting = async {
        while let Some((placement, result)) = pending.next().await {
            answered.insert(placement.custodian_id.as_str());
            let checked = result.and_then(|share| {
                validate_share(&share, record, placement)?;
                Ok(share)
            });
            match checked {
                Ok(share) => {
                    debug!("Share {} from {}", share.index, placement.custodian_id);
                    shares.push(share);
                    if shares.len() >= needed {
                        break;
                    }
                }
                Err(error) => {
                    warn!("No share from {}: {}", placement.custodian_id, error);
                    failures.push(CustodianFailure {
                        custodian_id: placement.custodian_id.clone(),
                        error,
                    });
                }
            }
            if shares.len() + pending.len() < needed {
                debug!("Quorum out of reach, {} requests outstanding", pending.len());
                break;
            }
        }
    };
    let timed_out = time::timeout_at(deadline, collecting).await.is_err();
    if timed_out {
        warn!(
            "Collection for {} hit its deadline with {}/{} shares",
            record.asset_ref,
            shares.len(),
            needed
        );
    }
    drop(pending);

    if shares.len() >= needed {
        return Ok(shares);
    }

    // requests cut short by an early stop are not failures of their own
    for placement in &record.placements {
        if timed_out && !answered.contains(placement.custodian_id.as_str()) {
            failures.push(CustodianFailure {
                custodian_id: placement.custodian_id.clone(),
                error: CustodianError::Unreachable("no answer before the request deadline".into()),
            });
        }
    }

    let all_rejected = !failures.is_empty()
        && failures
            .iter()
            .all(|f| matches!(f.error, CustodianError::ProofRejected(_)));
    if all_rejected {
        let reasons: Vec<String> = failures.iter().map(|f| f.to_string()).collect();
        return Err(CustodyError::ProofRejected(reasons.join("; ")));
    }

    Err(CustodyError::QuorumUnavailable {
        needed,
        collected: shares.len(),
        failures,
    })
}

/// A share only counts if it is the one the record says this custodian holds
fn validate_share(
    share: &Share,
    record: &SecretRecord,
    placement: &Placement,
) -> Result<(), CustodianError> {
    if share.split_id != record.split_id {
        return Err(CustodianError::Protocol(format!(
            "share belongs to split {}",
            share.split_id
        )));
    }
    if share.index != placement.share_index {
        return Err(CustodianError::Protocol(format!(
            "expected share {}, got {}",
            placement.share_index, share.index
        )));
    }
    if !share.verify_checksum() {
        return Err(CustodianError::Protocol(format!(
            "share {} fails its checksum",
            share.index
        )));
    }
    match &share.owner_proof {
        Some(p) if p.asset_ref == record.asset_ref => Ok(()),
        Some(p) => Err(CustodianError::Protocol(format!(
            "share is bound to {}",
            p.asset_ref
        ))),
        None => Err(CustodianError::Protocol("share carries no owner proof".into())),
    }
}
