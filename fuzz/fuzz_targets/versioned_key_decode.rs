//! Fuzz target for cache key decoding.
//!
//! Any string either fails to decode or decodes to a key that re-encodes to
//! exactly the same string.
//!
//! Run with: cargo +nightly fuzz run versioned_key_decode -- -max_total_time=60

#![no_main]

use ballast_storage::VersionedKey;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    if let Some(key) = VersionedKey::decode(input) {
        assert_eq!(key.encode(), input, "decoded key must re-encode verbatim");
        assert!(input.starts_with(&VersionedKey::version_prefix(key.version())));
    }
});
