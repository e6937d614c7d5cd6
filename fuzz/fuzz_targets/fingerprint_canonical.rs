//! Fuzz target for request fingerprinting.
//!
//! Fingerprints of arbitrary JSON must be well-formed, stable across a
//! serialize/parse cycle, and parse back to themselves.
//!
//! Run with: cargo +nightly fuzz run fingerprint_canonical -- -max_total_time=60

#![no_main]

use ballast_core::Fingerprint;
use libfuzzer_sys::fuzz_target;
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    let Ok(payload) = serde_json::from_slice::<Value>(data) else {
        return;
    };

    let fingerprint = Fingerprint::compute("default", &payload);
    assert_eq!(
        Fingerprint::parse(fingerprint.as_str()).as_ref(),
        Some(&fingerprint)
    );

    // Re-serializing may reorder keys or reformat numbers; the digest must not move.
    if let Ok(text) = serde_json::to_string(&payload) {
        if let Ok(reparsed) = serde_json::from_str::<Value>(&text) {
            assert_eq!(Fingerprint::compute("default", &reparsed), fingerprint);
        }
    }

    assert_ne!(Fingerprint::compute("other", &payload), fingerprint);
});
