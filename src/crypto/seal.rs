use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::ChaCha20Poly1305;
use rand::rngs::OsRng;
use rand::RngCore;

use super::hpke::MessageKey;
use super::{Nonce, MAIL_SUITE};
use crate::error::CryptoError;

/// Draw a fresh random nonce.
///
/// Message keys are already unique per `(topic, sequence)`; the random nonce
/// keeps a caller that reuses a sequence number from repeating a keystream.
pub fn random_nonce() -> Nonce {
    let mut nonce = [0u8; 12];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt `plaintext`, binding `aad`. Output is ciphertext followed by the tag.
pub fn seal(
    key: &MessageKey,
    nonce: &Nonce,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| {
        CryptoError::InvalidKeyLength {
            expected: MAIL_SUITE.key_len(),
            actual: key.as_bytes().len(),
        }
    })?;

    cipher
        .encrypt(
            chacha20poly1305::Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed("AEAD seal failed".into()))
}

/// Decrypt and authenticate `ciphertext` against `aad`.
///
/// Every failure is reported as [`CryptoError::AuthenticationFailure`]; the
/// caller learns nothing about why a tag did not verify.
pub fn open(
    key: &MessageKey,
    nonce: &Nonce,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| CryptoError::AuthenticationFailure)?;

    cipher
        .decrypt(
            chacha20poly1305::Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::AuthenticationFailure)
}
