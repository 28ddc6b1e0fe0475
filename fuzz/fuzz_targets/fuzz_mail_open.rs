#![no_main]

use libfuzzer_sys::fuzz_target;

use enclave_mail::crypto::hpke::KeyPair;
use enclave_mail::Mailbox;

fuzz_target!(|data: &[u8]| {
    // Fixed keys: forging a valid envelope is out of reach, so every input
    // must be rejected cleanly.
    let recipient = KeyPair::from_secret_bytes([0x42; 32]);
    let peer = KeyPair::from_secret_bytes([0x17; 32]);

    let mut anonymous = Mailbox::new(recipient.clone());
    assert!(anonymous.decrypt(data).is_err());

    let mut pinned = Mailbox::new(recipient).with_peer(peer.public_bytes());
    assert!(pinned.decrypt(data).is_err());
});
