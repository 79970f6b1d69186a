//! Explicit handles the coordinator works through

use super::manifest::RecordBook;
use crate::config::CustodyConfig;
use crate::custodian::{CustodianClient, CustodianEndpoint};
use crate::ledger::Ledger;
use crate::storage::BlobStore;
use std::sync::Arc;

/// Everything a protect or decrypt call needs. Built once by the caller
/// and passed in; there is no process-wide connection.
pub struct CustodyContext {
    pub config: CustodyConfig,
    pub ledger: Arc<dyn Ledger>,
    pub blobs: Arc<dyn BlobStore>,
    pub custodians: CustodianClient,
    pub records: RecordBook,
}

impl CustodyContext {
    pub fn new(config: CustodyConfig, ledger: Arc<dyn Ledger>, blobs: Arc<dyn BlobStore>) -> Self {
        let custodians = CustodianClient::new(
            config.retry.clone(),
            config.call_timeout(),
            config.attestation.clone(),
        );
        Self {
            config,
            ledger,
            blobs,
            custodians,
            records: RecordBook::in_memory(),
        }
    }

    pub fn with_records(mut self, records: RecordBook) -> Self {
        self.records = records;
        self
    }

    pub fn register_custodian(&mut self, endpoint: Arc<dyn CustodianEndpoint>) {
        self.custodians.register(endpoint);
    }
}
