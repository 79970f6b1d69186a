//! Coordinator-side access to the custodian set
//!
//! Every call gets its own timeout; a timeout counts as unreachable.
//! Unreachable errors are retried with exponential backoff up to
//! `max_attempts`, every other error is returned at once.

use super::attestation::{verify_quote, AttestationPolicy};
use super::endpoint::{CustodianEndpoint, CustodianRecord, HealthStatus, StoreAck};
use super::CustodianError;
use crate::ledger::{AssetRef, OwnershipProof};
use crate::sharing::Share;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::time::{self, Duration};
use uuid::Uuid;

/// Retry policy for transient custodian failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`; doubles each time, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// The custodian set, as seen by the coordinator
pub struct CustodianClient {
    endpoints: BTreeMap<String, Arc<dyn CustodianEndpoint>>,
    records: RwLock<BTreeMap<String, CustodianRecord>>,
    retry: RetryPolicy,
    call_timeout: Duration,
    policy: AttestationPolicy,
}

impl CustodianClient {
    pub fn new(retry: RetryPolicy, call_timeout: Duration, policy: AttestationPolicy) -> Self {
        Self {
            endpoints: BTreeMap::new(),
            records: RwLock::new(BTreeMap::new()),
            retry,
            call_timeout,
            policy,
        }
    }

    /// Add a custodian. Its status stays `Unavailable` until a health check.
    pub fn register(&mut self, endpoint: Arc<dyn CustodianEndpoint>) {
        let id = endpoint.id().to_string();
        let record = CustodianRecord {
            custodian_id: id.clone(),
            endpoint: endpoint.location(),
            health_status: HealthStatus::Unavailable,
        };
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), record);
        if self.endpoints.insert(id.clone(), endpoint).is_some() {
            warn!("Custodian {} registered twice, keeping the newer endpoint", id);
        }
    }

    /// Registered ids, sorted
    pub fn custodian_ids(&self) -> Vec<String> {
        self.endpoints.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Snapshot of every custodian record
    pub fn records(&self) -> Vec<CustodianRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn record(&self, id: &str) -> Option<CustodianRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn endpoint(&self, id: &str) -> Result<&Arc<dyn CustodianEndpoint>, CustodianError> {
        self.endpoints
            .get(id)
            .ok_or_else(|| CustodianError::Unreachable(format!("unknown custodian {}", id)))
    }

    fn set_status(&self, id: &str, status: HealthStatus) {
        if let Some(record) = self
            .records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(id)
        {
            record.health_status = status;
        }
    }

    async fn with_retry<T, F, Fut>(&self, id: &str, op: &str, mut call: F) -> Result<T, CustodianError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CustodianError>>,
    {
        let mut attempt = 1;
        loop {
            let result = match time::timeout(self.call_timeout, call()).await {
                Ok(r) => r,
                Err(_) => Err(CustodianError::Unreachable(format!(
                    "{} on {} timed out after {:?}",
                    op, id, self.call_timeout
                ))),
            };
            match result {
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        "{} on {} failed (attempt {}/{}): {}; retrying in {:?}",
                        op, id, attempt, self.retry.max_attempts, e, delay
                    );
                    time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Store `share` on custodian `id`
    pub async fn store_share(
        &self,
        id: &str,
        share: &Share,
        proof: &OwnershipProof,
    ) -> Result<StoreAck, CustodianError> {
        let endpoint = self.endpoint(id)?;
        self.with_retry(id, "store_share", || endpoint.store_share(share, proof))
            .await
    }

    /// Commit the pending share of `split_id` for `asset` on custodian `id`
    pub async fn commit_share(
        &self,
        id: &str,
        asset: &AssetRef,
        split_id: Uuid,
        proof: &OwnershipProof,
    ) -> Result<StoreAck, CustodianError> {
        let endpoint = self.endpoint(id)?;
        self.with_retry(id, "commit_share", || {
            endpoint.commit_share(asset, split_id, proof)
        })
        .await
    }

    /// Fetch share `share_index` of `asset` from custodian `id`
    pub async fn retrieve_share(
        &self,
        id: &str,
        asset: &AssetRef,
        share_index: u8,
        proof: &OwnershipProof,
    ) -> Result<Share, CustodianError> {
        let endpoint = self.endpoint(id)?;
        self.with_retry(id, "retrieve_share", || {
            endpoint.retrieve_share(asset, share_index, proof)
        })
        .await
    }

    /// Health-check custodian `id` and verify its attestation quote.
    ///
    /// Any failure, including an untrusted quote, reads as `Unavailable`.
    pub async fn health(&self, id: &str) -> HealthStatus {
        let status = match self.check_health(id).await {
            Ok(status) => status,
            Err(e) => {
                warn!("Custodian {} unavailable: {}", id, e);
                HealthStatus::Unavailable
            }
        };
        self.set_status(id, status);
        status
    }

    async fn check_health(&self, id: &str) -> Result<HealthStatus, CustodianError> {
        let endpoint = self.endpoint(id)?;
        let challenge = Uuid::new_v4().to_string();
        let report = self
            .with_retry(id, "health", || endpoint.health(&challenge))
            .await?;

        if report.custodian_id != id {
            return Err(CustodianError::Protocol(format!(
                "answered as {}",
                report.custodian_id
            )));
        }
        let quote = report
            .quote
            .as_ref()
            .ok_or_else(|| CustodianError::Protocol("no attestation quote".into()))?;
        if quote.report.custodian_id != id {
            return Err(CustodianError::Protocol(format!(
                "quote is for {}",
                quote.report.custodian_id
            )));
        }
        let verdict = verify_quote(quote, &challenge, &self.policy);
        if !verdict.is_trusted() {
            return Err(CustodianError::Protocol(format!(
                "attestation not trusted: {:?}",
                verdict
            )));
        }
        debug!("Custodian {} attested: {:?}", id, report.status);
        Ok(report.status)
    }

    /// Health-check every custodian concurrently. Sorted by id.
    pub async fn health_check_all(&self) -> Vec<(String, HealthStatus)> {
        let checks = self.endpoints.keys().map(|id| async move {
            let status = self.health(id).await;
            (id.clone(), status)
        });
        futures::future::join_all(checks).await
    }
}
