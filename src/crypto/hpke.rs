use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use super::SymmetricKey;
use crate::error::CryptoError;

/// An X25519 key pair used to address and open mail.
#[derive(Clone)]
pub struct KeyPair {
    pub secret: StaticSecret,
    pub public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuild a key pair from a stored 32-byte secret.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_bytes(&self) -> super::PublicKey {
        self.public.to_bytes()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair(public={})", hex::encode(&self.public.as_bytes()[..8]))
    }
}

/// A per-message AEAD key, wiped on drop.
pub struct MessageKey(SymmetricKey);

impl MessageKey {
    pub fn as_bytes(&self) -> &SymmetricKey {
        &self.0
    }
}

impl Drop for MessageKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Perform X25519 and derive the key for one mail message via HKDF.
///
/// `context` is the message context hash (see [`super::transcript`]); it
/// differs for every `(topic, sequence, sender, recipient)` tuple, so no two
/// distinct messages share a key even between the same pair of keys.
pub fn derive_message_key(
    our_secret: &StaticSecret,
    their_public: &PublicKey,
    context: &[u8; 32],
) -> Result<MessageKey, CryptoError> {
    let shared_secret = our_secret.diffie_hellman(their_public);
    if !shared_secret.was_contributory() {
        return Err(CryptoError::NonContributoryKey);
    }

    let hkdf = Hkdf::<Sha256>::new(Some(context), shared_secret.as_bytes());

    let mut key = [0u8; 32];
    hkdf.expand(b"enclave-mail-message-key", &mut key)
        .map_err(|_| CryptoError::HkdfExpandFailed)?;

    Ok(MessageKey(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_agreement_symmetry() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let context = [0xCC; 32];

        let a = derive_message_key(&alice.secret, &bob.public, &context).unwrap();
        let b = derive_message_key(&bob.secret, &alice.public, &context).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn context_separates_keys() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let k1 = derive_message_key(&alice.secret, &bob.public, &[1; 32]).unwrap();
        let k2 = derive_message_key(&alice.secret, &bob.public, &[2; 32]).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn identity_point_rejected() {
        let alice = KeyPair::generate();
        let zero = PublicKey::from([0u8; 32]);
        let result = derive_message_key(&alice.secret, &zero, &[0; 32]);
        assert!(matches!(result, Err(CryptoError::NonContributoryKey)));
    }

    #[test]
    fn secret_bytes_restore_public_key() {
        let restored = KeyPair::from_secret_bytes([7u8; 32]);
        let again = KeyPair::from_secret_bytes([7u8; 32]);
        assert_eq!(restored.public_bytes(), again.public_bytes());
    }
}
