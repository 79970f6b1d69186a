//! Remote attestation for custodian enclaves
//!
//! Before a share is handed to a custodian the client challenges it:
//! 1. Client sends a fresh nonce with the health request
//! 2. Enclave answers with a quote (measurement + report + nonce) signed
//!    by its attestation key
//! 3. Client verifies the quote against its [`AttestationPolicy`]
//!
//! Custodians whose quote fails the policy are treated as unavailable.

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Where a custodian's enclave runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeeBackend {
    IntelSgx,
    ArmTrustZone,
    /// In-process simulation; offers no isolation
    Simulated,
}

impl TeeBackend {
    pub fn name(&self) -> &str {
        match self {
            TeeBackend::IntelSgx => "sgx",
            TeeBackend::ArmTrustZone => "trustzone",
            TeeBackend::Simulated => "simulated",
        }
    }

    pub fn is_hardware(&self) -> bool {
        *self != TeeBackend::Simulated
    }

    /// Security level actually reachable on this host
    pub fn probe(&self) -> SecurityLevel {
        match self {
            TeeBackend::IntelSgx if probe_sgx() => SecurityLevel::Hardware,
            TeeBackend::ArmTrustZone if probe_trustzone() => SecurityLevel::Hardware,
            TeeBackend::Simulated => SecurityLevel::Software,
            other => {
                log::warn!("{} not available, falling back to simulated enclave", other.name());
                SecurityLevel::Software
            }
        }
    }
}

const SGX_DEVICES: [&str; 2] = ["/dev/sgx_enclave", "/dev/isgx"];
const OPTEE_DEVICES: [&str; 2] = ["/dev/tee0", "/dev/opteearmtz00"];

fn any_device(paths: &[&str]) -> bool {
    paths.iter().any(|p| std::path::Path::new(p).exists())
}

fn probe_sgx() -> bool {
    cfg!(target_arch = "x86_64") && any_device(&SGX_DEVICES)
}

fn probe_trustzone() -> bool {
    cfg!(target_arch = "aarch64") && any_device(&OPTEE_DEVICES)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityLevel {
    /// Hardware-backed TEE
    Hardware,
    /// Software simulation, development only
    Software,
    /// Hardware TEE detected but health check failed
    Degraded,
}

/// Code and signer identity of an enclave build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnclaveMeasurement {
    pub mrenclave: String,
    pub mrsigner: String,
    pub product_id: u16,
    pub isv_svn: u16,
}

impl EnclaveMeasurement {
    /// Simulated measurement via SHA-256
    pub fn compute(code_identity: &str, signer: &str, product_id: u16, svn: u16) -> Self {
        let mrenclave = hex::encode(
            Sha256::new()
                .chain_update(code_identity.as_bytes())
                .chain_update(b"mrenclave-v1")
                .finalize(),
        );
        let mrsigner = hex::encode(
            Sha256::new()
                .chain_update(signer.as_bytes())
                .chain_update(b"mrsigner-v1")
                .finalize(),
        );
        Self {
            mrenclave,
            mrsigner,
            product_id,
            isv_svn: svn,
        }
    }
}

/// State summary included in every quote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnclaveReport {
    pub custodian_id: String,
    pub sealed_shares: usize,
    pub uptime_secs: i64,
}

/// Attestation quote produced by an enclave
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationQuote {
    pub measurement: EnclaveMeasurement,
    /// Challenge nonce from the verifier
    pub nonce: String,
    pub backend: TeeBackend,
    pub security_level: SecurityLevel,
    pub timestamp: DateTime<Utc>,
    pub report: EnclaveReport,
    /// Hex Ed25519 key that signed this quote
    pub attestation_key: String,
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

impl AttestationQuote {
    fn digest(&self) -> [u8; 32] {
        let mut h = Sha256::new();
        h.update(b"custody-attestation-quote-v1");
        h.update(self.measurement.mrenclave.as_bytes());
        h.update(self.measurement.mrsigner.as_bytes());
        h.update(self.measurement.product_id.to_le_bytes());
        h.update(self.measurement.isv_svn.to_le_bytes());
        h.update((self.nonce.len() as u32).to_le_bytes());
        h.update(self.nonce.as_bytes());
        h.update(self.backend.name().as_bytes());
        h.update([self.security_level as u8]);
        h.update(self.timestamp.timestamp_millis().to_le_bytes());
        h.update((self.report.custodian_id.len() as u32).to_le_bytes());
        h.update(self.report.custodian_id.as_bytes());
        h.update((self.report.sealed_shares as u64).to_le_bytes());
        h.update(self.report.uptime_secs.to_le_bytes());
        h.update(self.attestation_key.as_bytes());
        h.finalize().into()
    }

    fn signature_valid(&self) -> bool {
        let key_bytes: [u8; 32] = match hex::decode(&self.attestation_key)
            .ok()
            .and_then(|b| b.try_into().ok())
        {
            Some(b) => b,
            None => return false,
        };
        let key = match VerifyingKey::from_bytes(&key_bytes) {
            Ok(k) => k,
            Err(_) => return false,
        };
        match Signature::from_slice(&self.signature) {
            Ok(sig) => key.verify_strict(&self.digest(), &sig).is_ok(),
            Err(_) => false,
        }
    }
}

/// Everything an enclave needs to produce quotes
pub struct EnclaveIdentity {
    pub backend: TeeBackend,
    pub security_level: SecurityLevel,
    pub measurement: EnclaveMeasurement,
    attestation_key: SigningKey,
}

impl EnclaveIdentity {
    pub fn new(backend: TeeBackend, measurement: EnclaveMeasurement) -> Self {
        Self {
            security_level: backend.probe(),
            backend,
            measurement,
            attestation_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn attestation_key_hex(&self) -> String {
        hex::encode(self.attestation_key.verifying_key().as_bytes())
    }

    /// Produce a signed quote binding `nonce` and `report`
    pub fn quote(&self, report: EnclaveReport, nonce: &str) -> AttestationQuote {
        let mut quote = AttestationQuote {
            measurement: self.measurement.clone(),
            nonce: nonce.to_string(),
            backend: self.backend,
            security_level: self.security_level,
            timestamp: Utc::now(),
            report,
            attestation_key: self.attestation_key_hex(),
            signature: Vec::new(),
        };
        quote.signature = self.attestation_key.sign(&quote.digest()).to_bytes().to_vec();
        quote
    }
}

/// Which custodian enclaves the coordinator is willing to trust.
///
/// Empty allow-lists admit anything; the default admits simulated
/// enclaves so development setups work out of the box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttestationPolicy {
    pub trusted_enclaves: Vec<String>,
    pub trusted_signers: Vec<String>,
    pub trusted_keys: Vec<String>,
    pub min_svn: u16,
    pub allow_simulated: bool,
    pub max_quote_age_secs: i64,
    pub min_security_level: SecurityLevel,
}

impl Default for AttestationPolicy {
    fn default() -> Self {
        Self {
            trusted_enclaves: vec![],
            trusted_signers: vec![],
            trusted_keys: vec![],
            min_svn: 0,
            allow_simulated: true,
            max_quote_age_secs: 300,
            min_security_level: SecurityLevel::Software,
        }
    }
}

fn listed(allow: &[String], value: &str) -> bool {
    allow.is_empty() || allow.iter().any(|v| v == value)
}

impl AttestationPolicy {
    /// Hardware enclaves only, signed by one of `trusted_signers`
    pub fn strict(trusted_signers: Vec<String>) -> Self {
        Self {
            trusted_signers,
            min_svn: 1,
            allow_simulated: false,
            max_quote_age_secs: 60,
            min_security_level: SecurityLevel::Hardware,
            ..Self::default()
        }
    }

    /// Why an authentic quote is still not acceptable, if it is not
    fn objection(&self, quote: &AttestationQuote) -> Option<String> {
        let level = quote.security_level;
        if level == SecurityLevel::Software && !self.allow_simulated {
            return Some("simulated enclaves are not allowed".into());
        }
        if self.min_security_level == SecurityLevel::Hardware && level != SecurityLevel::Hardware {
            return Some(format!("{:?} enclave, hardware required", level));
        }
        let m = &quote.measurement;
        if m.isv_svn < self.min_svn {
            return Some(format!("isv_svn {} < {}", m.isv_svn, self.min_svn));
        }
        if !listed(&self.trusted_enclaves, &m.mrenclave) {
            return Some(format!("unknown mrenclave {}", m.mrenclave));
        }
        if !listed(&self.trusted_signers, &m.mrsigner) {
            return Some(format!("unknown mrsigner {}", m.mrsigner));
        }
        if !listed(&self.trusted_keys, &quote.attestation_key) {
            return Some("unknown attestation key".into());
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttestationVerdict {
    Trusted {
        custodian_id: String,
        security_level: SecurityLevel,
    },
    /// Authentic quote from an enclave the policy does not admit
    Untrusted { reason: String },
    /// Forged, corrupted or replayed quote
    Invalid { reason: String },
    Expired,
}

impl AttestationVerdict {
    pub fn is_trusted(&self) -> bool {
        matches!(self, Self::Trusted { .. })
    }
}

/// Check that `quote` is fresh, answers `expected_nonce`, is signed by the
/// key it names, and passes `policy`
pub fn verify_quote(
    quote: &AttestationQuote,
    expected_nonce: &str,
    policy: &AttestationPolicy,
) -> AttestationVerdict {
    if (Utc::now() - quote.timestamp).num_seconds() > policy.max_quote_age_secs {
        return AttestationVerdict::Expired;
    }
    if quote.nonce != expected_nonce {
        return AttestationVerdict::Invalid {
            reason: format!("answers challenge {:?}", quote.nonce),
        };
    }
    if !quote.signature_valid() {
        return AttestationVerdict::Invalid {
            reason: "bad quote signature".into(),
        };
    }
    match policy.objection(quote) {
        Some(reason) => AttestationVerdict::Untrusted { reason },
        None => AttestationVerdict::Trusted {
            custodian_id: quote.report.custodian_id.clone(),
            security_level: quote.security_level,
        },
    }
}
