pub mod constraint;
pub mod signer;
pub mod types;

use std::collections::HashSet;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::AttestError;
use types::AttestationRecord;

/// Produces the serialized attestation record (runs at the isolated-node boundary).
#[async_trait]
pub trait AttestationProvider: Send + Sync {
    async fn produce_attestation(&self) -> Result<Bytes, AttestError>;
}

/// Verifies a serialized attestation record (runs on the client side).
#[async_trait]
pub trait AttestationVerifier: Send + Sync {
    /// Deserialize and verify `raw`, returning the record only if it is fully trusted.
    async fn verify(&self, raw: &[u8]) -> Result<AttestationRecord, AttestError>;
}

/// Verifier backed by a set of trusted attestation authority keys.
///
/// PRODUCTION and DEBUG records must be signed by one of the configured keys.
/// SIMULATION and INSECURE records have no hardware root to chain to, so they
/// are accepted as long as they are self-consistent; whether those modes are
/// acceptable at all is the constraint's decision.
#[derive(Debug, Clone, Default)]
pub struct TrustedAuthorities {
    keys: HashSet<[u8; 32]>,
}

impl TrustedAuthorities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_authority(mut self, key: [u8; 32]) -> Self {
        self.keys.insert(key);
        self
    }

    pub fn contains(&self, key: &[u8; 32]) -> bool {
        self.keys.contains(key)
    }
}

#[async_trait]
impl AttestationVerifier for TrustedAuthorities {
    async fn verify(&self, raw: &[u8]) -> Result<AttestationRecord, AttestError> {
        let record = AttestationRecord::deserialize(raw)?;

        if record.security_mode().requires_trusted_authority()
            && !self.contains(record.authority_key())
        {
            return Err(AttestError::UntrustedAuthority(hex::encode(
                record.authority_key(),
            )));
        }

        tracing::debug!(
            digest = hex::encode(record.digest()),
            mode = %record.security_mode(),
            "attestation record verified"
        );
        Ok(record)
    }
}
