use sha2::{Digest, Sha256};

use super::PublicKey;

const MAIL_CONTEXT_DOMAIN: &[u8] = b"enclave-mail:context:v1\0";

/// Compute the per-message context hash used as the HKDF salt.
///
/// `context = SHA256(domain || len(topic) || topic || sequence || sender_pk || recipient_pk)`
///
/// Keys are placed by role, not sorted: a message from A to B and one from B
/// to A on the same topic and sequence get different keys.
pub fn compute_mail_context(
    topic: &str,
    sequence: u64,
    sender_pk: &PublicKey,
    recipient_pk: &PublicKey,
) -> [u8; 32] {
    let mut hasher = Sha256::new();

    hasher.update(MAIL_CONTEXT_DOMAIN);
    hasher.update((topic.len() as u64).to_be_bytes());
    hasher.update(topic.as_bytes());
    hasher.update(sequence.to_be_bytes());
    hasher.update(sender_pk);
    hasher.update(recipient_pk);

    hasher.finalize().into()
}
