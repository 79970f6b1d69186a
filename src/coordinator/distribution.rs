//! Protecting a payload: encrypt, store, split, distribute, commit
//!
//! The private key exists only inside `protect`; it is split and dropped
//! (zeroized) before any share leaves for a custodian.
//!
//! Shares go out in two phases. Custodians hold a stored share as pending;
//! only once at least K are placed does the coordinator commit them. A run
//! that fails before that leaves pending shares, which the next attempt
//! for the asset replaces.

use super::context::CustodyContext;
use super::manifest::{Placement, SecretRecord};
use crate::crypto::{encrypt, KeyPair};
use crate::custodian::{CustodianError, HealthStatus};
use crate::error::{CustodianFailure, CustodyError};
use crate::ledger::{AssetRef, Identity, OwnershipProof};
use crate::sharing::{split, Share, SplitSpec};
use crate::storage::StorageError;
use chrono::Utc;
use log::{info, warn};
use std::collections::VecDeque;

/// Encrypt `payload` for a fresh key, store the ciphertext, and hand one
/// share of the key to each of N healthy custodians.
///
/// Healthy custodians are taken in id order; a custodian that fails to
/// store its share is replaced by the next spare. Fails with
/// `QuorumUnavailable` if fewer than K custodians are healthy or fewer
/// than K shares could be placed and committed.
pub async fn protect(
    ctx: &CustodyContext,
    owner: &Identity,
    asset: &AssetRef,
    payload: &[u8],
    spec: SplitSpec,
) -> Result<SecretRecord, CustodyError> {
    spec.validate()?;
    let reservation = ctx.records.reserve(asset)?;
    let proof = ctx.ledger.sign_proof(owner, asset)?;

    let statuses = ctx.custodians.health_check_all().await;
    let (healthy, unhealthy): (Vec<_>, Vec<_>) =
        statuses.into_iter().partition(|(_, status)| status.is_usable());
    let healthy: Vec<String> = healthy.into_iter().map(|(id, _)| id).collect();

    if healthy.len() < spec.quorum() {
        return Err(CustodyError::QuorumUnavailable {
            needed: spec.quorum(),
            collected: healthy.len(),
            failures: unhealthy.into_iter().map(unhealthy_failure).collect(),
        });
    }
    if healthy.len() < spec.total_shares as usize {
        warn!(
            "Only {} healthy custodians for {} shares of {}",
            healthy.len(),
            spec.total_shares,
            asset
        );
    }

    let key_pair = KeyPair::generate()?;
    let public_key = key_pair.public_key;
    let envelope = encrypt(payload, &public_key)?;
    let envelope_bytes = envelope
        .to_bytes()
        .map_err(|e| CustodyError::Envelope(e.to_string()))?;
    let content_id = ctx.blobs.store(&envelope_bytes)?;

    let shares = split(key_pair.private_key().as_bytes(), spec)?;
    drop(key_pair);

    let split_id = shares[0].split_id;
    let shares: Vec<Share> = shares
        .into_iter()
        .map(|s| s.with_owner_proof(proof.clone()))
        .collect();

    let (placements, mut failures) = distribute(ctx, &shares, &healthy, &proof).await?;

    if placements.len() < spec.quorum() {
        warn!(
            "Placed only {} of {} shares for {}; nothing committed",
            placements.len(),
            spec.total_shares,
            asset
        );
        return Err(CustodyError::QuorumUnavailable {
            needed: spec.quorum(),
            collected: placements.len(),
            failures,
        });
    }

    let commit_proof = ctx.ledger.sign_proof(owner, asset)?;
    let mut record = SecretRecord {
        asset_ref: asset.clone(),
        content_id,
        public_key,
        split_id,
        split_spec: spec,
        placements,
        created_at: Utc::now(),
    };
    reservation
        .record(record.clone())
        .map_err(StorageError::from)?;

    let placed = record.placements.len();
    let committed = match commit(ctx, &record, &commit_proof, &mut failures).await {
        Ok(c) => c,
        Err(e) => {
            reservation.withdraw();
            return Err(e);
        }
    };
    if committed.len() < spec.quorum() {
        warn!(
            "Committed only {} of {} shares for {}",
            committed.len(),
            spec.total_shares,
            asset
        );
        reservation.withdraw();
        return Err(CustodyError::QuorumUnavailable {
            needed: spec.quorum(),
            collected: committed.len(),
            failures,
        });
    }
    if committed.len() < placed {
        record.placements = committed;
        if let Err(e) = reservation.record(record.clone()) {
            warn!("Record for {} still lists uncommitted shares: {}", asset, e);
        }
    }
    if record.placements.len() < shares.len() {
        warn!(
            "Placed {} of {} shares for {} (tolerates {} more losses)",
            record.placements.len(),
            shares.len(),
            asset,
            record.placements.len() - spec.quorum()
        );
    }

    info!(
        "Protected {}: {} ciphertext {}, shares on [{}]",
        asset,
        spec,
        &record.content_id.as_str()[..12],
        record
            .placements
            .iter()
            .map(|p| format!("{}#{}", p.custodian_id, p.share_index))
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(record)
}

fn unhealthy_failure((custodian_id, status): (String, HealthStatus)) -> CustodianFailure {
    CustodianFailure {
        custodian_id,
        error: CustodianError::Unreachable(format!("health status {:?}", status)),
    }
}

/// Store shares concurrently on the first healthy custodians, then move
/// any share that failed onto the remaining spares one by one.
async fn distribute(
    ctx: &CustodyContext,
    shares: &[Share],
    healthy: &[String],
    proof: &OwnershipProof,
) -> Result<(Vec<Placement>, Vec<CustodianFailure>), CustodyError> {
    let primaries = shares.len().min(healthy.len());
    let (targets, spares) = healthy.split_at(primaries);
    let mut spares: VecDeque<&String> = spares.iter().collect();

    let attempts = shares.iter().zip(targets).map(|(share, id)| async move {
        let result = ctx.custodians.store_share(id, share, proof).await;
        (share, id, result)
    });
    let results = futures::future::join_all(attempts).await;

    let mut placements = Vec::with_capacity(shares.len());
    let mut failures = Vec::new();
    let mut unplaced: Vec<&Share> = shares[primaries..].iter().collect();

    for (share, id, result) in results {
        match result {
            Ok(_) => placements.push(Placement {
                custodian_id: id.clone(),
                share_index: share.index,
            }),
            Err(CustodianError::ProofRejected(reason)) => {
                return Err(CustodyError::ProofRejected(format!("{}: {}", id, reason)))
            }
            Err(error) => {
                warn!("Share {} not stored on {}: {}", share.index, id, error);
                failures.push(CustodianFailure {
                    custodian_id: id.clone(),
                    error,
                });
                unplaced.push(share);
            }
        }
    }

    for share in unplaced {
        while let Some(spare) = spares.pop_front() {
            match ctx.custodians.store_share(spare, share, proof).await {
                Ok(_) => {
                    info!("Share {} redirected to spare {}", share.index, spare);
                    placements.push(Placement {
                        custodian_id: spare.clone(),
                        share_index: share.index,
                    });
                    break;
                }
                Err(CustodianError::ProofRejected(reason)) => {
                    return Err(CustodyError::ProofRejected(format!("{}: {}", spare, reason)))
                }
                Err(error) => {
                    warn!("Spare {} could not take share {}: {}", spare, share.index, error);
                    failures.push(CustodianFailure {
                        custodian_id: spare.clone(),
                        error,
                    });
                }
            }
        }
    }

    placements.sort_by_key(|p| p.share_index);
    Ok((placements, failures))
}

/// Commit every placed share concurrently; keeps the placements whose
/// custodian confirmed
async fn commit(
    ctx: &CustodyContext,
    record: &SecretRecord,
    proof: &OwnershipProof,
    failures: &mut Vec<CustodianFailure>,
) -> Result<Vec<Placement>, CustodyError> {
    let attempts = record.placements.iter().map(|placement| async move {
        let result = ctx
            .custodians
            .commit_share(
                &placement.custodian_id,
                &record.asset_ref,
                record.split_id,
                proof,
            )
            .await;
        (placement, result)
    });
    let results = futures::future::join_all(attempts).await;

    let mut committed = Vec::with_capacity(results.len());
    for (placement, result) in results {
        match result {
            Ok(_) => committed.push(placement.clone()),
            Err(CustodianError::ProofRejected(reason)) => {
                return Err(CustodyError::ProofRejected(format!(
                    "{}: {}",
                    placement.custodian_id, reason
                )))
            }
            Err(error) => {
                warn!(
                    "Share {} not committed on {}: {}",
                    placement.share_index, placement.custodian_id, error
                );
                failures.push(CustodianFailure {
                    custodian_id: placement.custodian_id.clone(),
                    error,
                });
            }
        }
    }
    Ok(committed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::fixtures::{harness, test_spec};
    use crate::coordinator::{request_decryption, RecordBook};
    use crate::custodian::CustodianEndpoint;
    use crate::ledger::{Ledger, LedgerError};
    use std::sync::atomic::Ordering;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_one_share_per_custodian() {
        let h = harness(5, |_, _| {});
        let record = protect(&h.ctx, &h.owner, &h.asset, b"media", test_spec())
            .await
            .unwrap();

        assert_eq!(record.placements.len(), 5);
        let mut ids: Vec<&str> = record
            .placements
            .iter()
            .map(|p| p.custodian_id.as_str())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 5);
        for c in &h.custodians {
            assert_eq!(c.inner.share_count().await, 1);
        }
        assert_eq!(h.ctx.records.get(&h.asset), Some(record));
    }

    #[tokio::test]
    async fn test_two_of_five_healthy_is_quorum_unavailable() {
        let h = harness(5, |_, _| {});
        for c in &h.custodians[2..] {
            c.inner.set_status(HealthStatus::Unavailable).await;
        }

        let result = protect(&h.ctx, &h.owner, &h.asset, b"media", test_spec()).await;
        match result {
            Err(CustodyError::QuorumUnavailable {
                needed,
                collected,
                failures,
            }) => {
                assert_eq!(needed, 3);
                assert_eq!(collected, 2);
                assert_eq!(failures.len(), 3);
            }
            other => panic!("expected QuorumUnavailable, got {:?}", other),
        }
        assert!(!h.ctx.records.contains(&h.asset));
        for c in &h.custodians {
            assert_eq!(c.inner.share_count().await, 0);
        }
    }

    #[tokio::test]
    async fn test_degraded_custodians_are_skipped() {
        let h = harness(5, |_, _| {});
        h.custodians[0]
            .inner
            .set_status(HealthStatus::Degraded)
            .await;

        let record = protect(&h.ctx, &h.owner, &h.asset, b"media", test_spec())
            .await
            .unwrap();
        assert_eq!(record.placements.len(), 4);
        assert!(record.placement_for(h.custodians[0].id()).is_none());
    }

    #[tokio::test]
    async fn test_failed_store_redirects_to_spare() {
        let h = harness(6, |i, c| {
            if i == 1 {
                // passes the health check, then fails every store
                c.fail_stores = true;
            }
        });

        let record = protect(&h.ctx, &h.owner, &h.asset, b"media", test_spec())
            .await
            .unwrap();
        assert_eq!(record.placements.len(), 5);
        assert!(record.placement_for("custodian-2").is_none());
        let spare = record.placement_for("custodian-6").unwrap();
        assert_eq!(spare.share_index, 2);
        assert!(h.custodians[1].calls.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_store_rejection_is_fatal() {
        let h = harness(5, |i, c| c.reject_proofs.store(i == 3, Ordering::SeqCst));
        let result = protect(&h.ctx, &h.owner, &h.asset, b"media", test_spec()).await;
        assert!(matches!(result, Err(CustodyError::ProofRejected(_))));
        assert!(!h.ctx.records.contains(&h.asset));
    }

    #[tokio::test]
    async fn test_only_owner_may_protect_once() {
        let h = harness(5, |_, _| {});
        let stranger = Identity::generate();
        let result = protect(&h.ctx, &stranger, &h.asset, b"media", test_spec()).await;
        assert!(matches!(
            result,
            Err(CustodyError::Ledger(LedgerError::NotOwner { .. }))
        ));

        protect(&h.ctx, &h.owner, &h.asset, b"media", test_spec())
            .await
            .unwrap();
        let again = protect(&h.ctx, &h.owner, &h.asset, b"other", test_spec()).await;
        assert!(matches!(again, Err(CustodyError::AlreadyProtected(_))));
    }

    #[tokio::test]
    async fn test_invalid_spec_rejected_before_any_work() {
        let h = harness(5, |_, _| {});
        let bad = SplitSpec {
            total_shares: 3,
            threshold: 4,
        };
        let result = protect(&h.ctx, &h.owner, &h.asset, b"media", bad).await;
        assert!(matches!(result, Err(CustodyError::Sharing(_))));
        for c in &h.custodians {
            assert_eq!(c.calls.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn test_failed_protect_can_be_retried() {
        let h = harness(5, |i, c| c.reject_proofs.store(i == 3, Ordering::SeqCst));
        let result = protect(&h.ctx, &h.owner, &h.asset, b"media", test_spec()).await;
        assert!(matches!(result, Err(CustodyError::ProofRejected(_))));
        assert_eq!(h.custodians[0].inner.share_count().await, 1);

        h.custodians[3].reject_proofs.store(false, Ordering::SeqCst);
        let record = protect(&h.ctx, &h.owner, &h.asset, b"media", test_spec())
            .await
            .unwrap();
        assert_eq!(record.placements.len(), 5);
        for c in &h.custodians {
            assert_eq!(c.inner.share_count().await, 1);
        }

        let proof = h.ledger.sign_proof(&h.owner, &h.asset).unwrap();
        let payload = request_decryption(&h.ctx, &h.asset, &proof).await.unwrap();
        assert_eq!(payload, b"media");
    }

    #[tokio::test]
    async fn test_concurrent_protects_place_one_split() {
        let h = harness(5, |_, _| {});
        let (a, b) = tokio::join!(
            protect(&h.ctx, &h.owner, &h.asset, b"first", test_spec()),
            protect(&h.ctx, &h.owner, &h.asset, b"second", test_spec()),
        );
        let (record, loser) = match (a, b) {
            (Ok(r), Err(e)) | (Err(e), Ok(r)) => (r, e),
            other => panic!("expected exactly one protect to win, got {:?}", other),
        };
        assert!(matches!(
            loser,
            CustodyError::ProtectionInFlight(_) | CustodyError::AlreadyProtected(_)
        ));
        assert_eq!(record.placements.len(), 5);

        let proof = h.ledger.sign_proof(&h.owner, &h.asset).unwrap();
        let payload = request_decryption(&h.ctx, &h.asset, &proof).await.unwrap();
        assert!(payload == b"first" || payload == b"second");
    }

    #[tokio::test]
    async fn test_unsaved_record_leaves_asset_unprotected() {
        let mut h = harness(5, |_, _| {});
        let path = std::env::temp_dir()
            .join(format!("custody-missing-{}", Uuid::new_v4()))
            .join("records.json");
        h.ctx.records = RecordBook::open(&path).unwrap();

        let result = protect(&h.ctx, &h.owner, &h.asset, b"media", test_spec()).await;
        assert!(matches!(result, Err(CustodyError::Storage(_))));
        assert!(!h.ctx.records.contains(&h.asset));

        // nothing was committed, so a retry with a working book succeeds
        h.ctx.records = RecordBook::in_memory();
        let record = protect(&h.ctx, &h.owner, &h.asset, b"media", test_spec())
            .await
            .unwrap();
        assert_eq!(record.placements.len(), 5);
        let proof = h.ledger.sign_proof(&h.owner, &h.asset).unwrap();
        let payload = request_decryption(&h.ctx, &h.asset, &proof).await.unwrap();
        assert_eq!(payload, b"media");
    }

    #[tokio::test]
    async fn test_commits_below_quorum_fail() {
        let h = harness(5, |i, c| c.fail_commits = i < 3);
        let result = protect(&h.ctx, &h.owner, &h.asset, b"media", test_spec()).await;
        match result {
            Err(CustodyError::QuorumUnavailable {
                needed,
                collected,
                failures,
            }) => {
                assert_eq!(needed, 3);
                assert_eq!(collected, 2);
                assert_eq!(failures.len(), 3);
            }
            other => panic!("expected QuorumUnavailable, got {:?}", other),
        }
        assert!(!h.ctx.records.contains(&h.asset));
    }

    #[tokio::test]
    async fn test_record_lists_only_committed_shares() {
        let h = harness(5, |i, c| c.fail_commits = i == 4);
        let record = protect(&h.ctx, &h.owner, &h.asset, b"media", test_spec())
            .await
            .unwrap();
        assert_eq!(record.placements.len(), 4);
        assert!(record.placement_for("custodian-5").is_none());
        assert_eq!(h.ctx.records.get(&h.asset), Some(record));
    }
}
