//! Reconstruction coordinator
//!
//! Protects payloads by spreading key shares over custodians and serves
//! decryption requests by gathering a quorum of them back.

pub mod context;
pub mod distribution;
pub mod manifest;
pub mod reconstruction;

pub use context::CustodyContext;
pub use distribution::protect;
pub use manifest::{Placement, RecordBook, Reservation, SecretRecord};
pub use reconstruction::{
    request_decryption, run_decryption, DecryptionSession, RequestState, StateTransition,
};

#[cfg(test)]
pub(crate) mod fixtures {
    use super::CustodyContext;
    use crate::config::CustodyConfig;
    use crate::custodian::client::tests::FlakyCustodian;
    use crate::custodian::{EnclaveConfig, EnclaveCustodian, RetryPolicy};
    use crate::ledger::{AssetRef, Identity, InMemoryLedger};
    use crate::sharing::SplitSpec;
    use crate::storage::MemoryBlobStore;
    use std::sync::Arc;

    pub(crate) struct Harness {
        pub ctx: CustodyContext,
        pub ledger: Arc<InMemoryLedger>,
        pub owner: Identity,
        pub asset: AssetRef,
        pub custodians: Vec<Arc<FlakyCustodian>>,
    }

    pub(crate) fn test_spec() -> SplitSpec {
        SplitSpec {
            total_shares: 5,
            threshold: 3,
        }
    }

    /// `n` simulated custodians named `custodian-1..n`, each passed to
    /// `configure` with its zero-based position before registration
    pub(crate) fn harness(n: usize, configure: impl Fn(usize, &mut FlakyCustodian)) -> Harness {
        let config = CustodyConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff_ms: 1,
                max_backoff_ms: 5,
            },
            call_timeout_ms: 200,
            request_deadline_ms: 2_000,
            ..CustodyConfig::default()
        };
        let ledger = Arc::new(InMemoryLedger::new());
        let owner = Identity::generate();
        let asset = ledger.mint(&owner.account());

        let mut ctx = CustodyContext::new(config, ledger.clone(), Arc::new(MemoryBlobStore::new()));
        let mut custodians = Vec::with_capacity(n);
        for i in 0..n {
            let enclave = EnclaveCustodian::new(
                EnclaveConfig::simulated(format!("custodian-{}", i + 1)),
                ledger.clone(),
            )
            .unwrap();
            let mut flaky = FlakyCustodian::new(enclave);
            configure(i, &mut flaky);
            let flaky = Arc::new(flaky);
            ctx.register_custodian(flaky.clone());
            custodians.push(flaky);
        }

        Harness {
            ctx,
            ledger,
            owner,
            asset,
            custodians,
        }
    }
}
