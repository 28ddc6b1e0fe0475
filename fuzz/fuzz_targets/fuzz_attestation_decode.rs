#![no_main]

use libfuzzer_sys::fuzz_target;

use enclave_mail::AttestationRecord;

fuzz_target!(|data: &[u8]| {
    // Anything that verifies must re-encode to the exact input.
    if let Ok(record) = AttestationRecord::deserialize(data) {
        assert_eq!(&record.serialize()[..], data);
        let _ = record.to_string();
    }
});
