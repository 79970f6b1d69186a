//! Custodians: independent, attested holders of key shares
//!
//! - **Endpoint**: the `CustodianEndpoint` capability trait
//! - **Enclave**: a (simulated) TEE custodian that seals shares and checks
//!   ownership proofs against the ledger
//! - **Attestation**: challenge/quote protocol used by health checks
//! - **Sealed Storage**: AES-GCM sealing and the persistent sealed index
//! - **Protocol / Remote**: JSON frames over TCP, client endpoint and server loop
//! - **Client**: timeout-bounded, retrying access used by the coordinator

pub mod attestation;
pub mod client;
pub mod enclave;
pub mod endpoint;
pub mod protocol;
pub mod remote;
pub mod sealed_storage;

pub use attestation::{
    verify_quote, AttestationPolicy, AttestationQuote, AttestationVerdict, EnclaveIdentity,
    EnclaveMeasurement, EnclaveReport, SecurityLevel, TeeBackend,
};
pub use client::{CustodianClient, RetryPolicy};
pub use enclave::{EnclaveConfig, EnclaveCustodian};
pub use endpoint::{CustodianEndpoint, CustodianRecord, HealthReport, HealthStatus, StoreAck};
pub use protocol::{CustodianMessage, CustodianRequest, CustodianResponse, MessagePayload};
pub use remote::{serve_custodian, RemoteCustodian};
pub use sealed_storage::{SealedIndex, SealedShare, SealingKey};

use serde::{Deserialize, Serialize};

/// Custodian errors. Also the error half of the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum CustodianError {
    #[error("Custodian unreachable: {0}")]
    Unreachable(String),

    #[error("Ownership proof rejected: {0}")]
    ProofRejected(String),

    #[error("No share held: {0}")]
    NotFound(String),

    #[error("A different share is already stored: {0}")]
    AlreadyStored(String),

    #[error("Sealing error: {0}")]
    Sealing(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl CustodianError {
    /// Worth retrying; everything else is final
    pub fn is_transient(&self) -> bool {
        matches!(self, CustodianError::Unreachable(_))
    }
}
