#![no_main]

use libfuzzer_sys::fuzz_target;

use enclave_mail::Constraint;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    // Canonical form must parse back to the same constraint.
    if let Ok(constraint) = Constraint::parse(text) {
        let canonical = constraint.to_string();
        assert_eq!(Constraint::parse(&canonical).ok(), Some(constraint));
    }
});
