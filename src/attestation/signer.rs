use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

use super::types::{AttestationRecord, Measurement, SecurityMode};
use crate::crypto::PublicKey;

/// An attestation authority: signs records binding a node's mail key to its
/// measurement.
///
/// Hardware quoting is outside this crate. In simulation the node signs its
/// own records with a generated key, which is what this type does.
pub struct AttestationSigner {
    signing_key: SigningKey,
}

impl AttestationSigner {
    /// Generate a new random authority key.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Create from existing secret key bytes (32 bytes).
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    /// Public half, for [`super::TrustedAuthorities`].
    pub fn authority_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn attest(
        &self,
        public_key: PublicKey,
        measurement: Measurement,
        product_id: u16,
        security_mode: SecurityMode,
    ) -> AttestationRecord {
        AttestationRecord::sign(
            &self.signing_key,
            public_key,
            measurement,
            product_id,
            security_mode,
        )
    }
}

impl std::fmt::Debug for AttestationSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "AttestationSigner({})",
            hex::encode(&self.authority_key()[..8])
        )
    }
}
