//! Version-scoped cache keys.
//!
//! A `VersionedKey` can only be built from an explicit artifact version and a
//! fingerprint, so no code path can look up or write an entry without naming
//! the version it belongs to. Entries written under an older version are never
//! deleted; they simply stop being addressable once the active version moves.

use std::fmt;

use ballast_core::{ArtifactVersion, Fingerprint};

/// Separator between the version and the fingerprint.
const SEPARATOR: char = ':';

/// A cache key bound to one artifact version.
///
/// # Format
///
/// `{version}:{fingerprint}`, with the version in decimal and the fingerprint
/// as 64 lowercase hex characters, e.g. `7:9f86d0...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionedKey {
    inner: VersionedKeyInner,
}

/// Private inner struct - prevents construction without a version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct VersionedKeyInner {
    version: ArtifactVersion,
    fingerprint: Fingerprint,
}

impl VersionedKey {
    pub fn new(version: ArtifactVersion, fingerprint: Fingerprint) -> Self {
        Self {
            inner: VersionedKeyInner {
                version,
                fingerprint,
            },
        }
    }

    pub fn version(&self) -> ArtifactVersion {
        self.inner.version
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.inner.fingerprint
    }

    /// Encode to the backend key string.
    pub fn encode(&self) -> String {
        format!(
            "{}{}{}",
            self.inner.version,
            SEPARATOR,
            self.inner.fingerprint.as_str()
        )
    }

    /// Decode a backend key.
    ///
    /// Returns `None` if the separator is missing, the version is not a
    /// plain decimal integer without leading zeros, or the fingerprint is
    /// malformed. A decoded key always re-encodes to its input.
    pub fn decode(key: &str) -> Option<Self> {
        let (version, fingerprint) = key.split_once(SEPARATOR)?;
        if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if version.len() > 1 && version.starts_with('0') {
            return None;
        }
        let version = version.parse::<u64>().ok()?;
        let fingerprint = Fingerprint::parse(fingerprint)?;
        Some(Self::new(ArtifactVersion::new(version), fingerprint))
    }

    /// Prefix shared by every key of `version`.
    pub fn version_prefix(version: ArtifactVersion) -> String {
        format!("{}{}", version, SEPARATOR)
    }
}

impl fmt::Display for VersionedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn fp() -> Fingerprint {
        Fingerprint::compute("default", &json!({"x": 1}))
    }

    #[test]
    fn test_encode_format() {
        let key = VersionedKey::new(ArtifactVersion::new(7), fp());
        let encoded = key.encode();
        assert!(encoded.starts_with("7:"));
        assert_eq!(encoded.len(), 2 + 64);
        assert_eq!(key.to_string(), encoded);
    }

    #[test]
    fn test_decode_valid() {
        let key = VersionedKey::new(ArtifactVersion::new(42), fp());
        let decoded = VersionedKey::decode(&key.encode()).unwrap();
        assert_eq!(decoded, key);
        assert_eq!(decoded.version(), ArtifactVersion::new(42));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let hex = fp().as_str().to_string();
        assert!(VersionedKey::decode(&hex).is_none());
        assert!(VersionedKey::decode(&format!(":{}", hex)).is_none());
        assert!(VersionedKey::decode(&format!("+3:{}", hex)).is_none());
        assert!(VersionedKey::decode(&format!("03:{}", hex)).is_none());
        assert!(VersionedKey::decode(&format!("0:{}", hex)).is_some());
        assert!(VersionedKey::decode("3:not-a-fingerprint").is_none());
        assert!(VersionedKey::decode(&format!("3:{}", hex.to_uppercase())).is_none());
    }

    #[test]
    fn test_versions_never_collide() {
        let a = VersionedKey::new(ArtifactVersion::new(1), fp());
        let b = VersionedKey::new(ArtifactVersion::new(2), fp());
        assert_ne!(a.encode(), b.encode());
        assert!(a.encode().starts_with(&VersionedKey::version_prefix(ArtifactVersion::new(1))));
        assert!(!b.encode().starts_with(&VersionedKey::version_prefix(ArtifactVersion::new(1))));
    }

    proptest! {
        #[test]
        fn prop_decode_never_panics(s in ".{0,100}") {
            let _ = VersionedKey::decode(&s);
        }

        #[test]
        fn prop_prefix_matches_own_version_only(v in 0u64..10_000, w in 0u64..10_000) {
            let key = VersionedKey::new(ArtifactVersion::new(v), fp());
            let prefix = VersionedKey::version_prefix(ArtifactVersion::new(w));
            prop_assert_eq!(key.encode().starts_with(&prefix), v == w);
        }
    }
}
