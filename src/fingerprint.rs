//! Content fingerprinting for cache-key material.
//!
//! The fingerprint folds only the first 1 KiB of image bytes into a 32-bit
//! rolling accumulator and appends the total size. That makes it
//! deterministic and cheap, but NOT collision-resistant: two images sharing
//! their first kilobyte and total size collide and would share a cache
//! entry. It is memoization key material, not a content-integrity check,
//! and is deliberately not a cryptographic hash.

use crate::pipeline::validate::ImageAsset;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How many leading bytes participate in the rolling hash.
const PREFIX_LEN: usize = 1024;

/// Derived cache-key material for an image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint an asset: 32-bit rolling hash over the first 1 KiB,
    /// combined with the total size for better uniqueness.
    pub fn of(asset: &ImageAsset) -> Self {
        let prefix = &asset.bytes[..asset.bytes.len().min(PREFIX_LEN)];
        let mut hash: u32 = 0;
        for &b in prefix {
            hash = hash.wrapping_mul(31).wrapping_add(u32::from(b));
        }
        Fingerprint(format!("{:x}_{}", hash, asset.size_bytes))
    }

    /// Time+random fallback key for an asset whose bytes could not be read.
    ///
    /// Intentionally unstable: every call produces a distinct key, so the
    /// operation behaves as a permanent cache miss. Callers must not rely on
    /// it for lookup.
    pub fn ephemeral() -> Self {
        Fingerprint(format!(
            "fallback_{}_{}",
            Utc::now().timestamp_millis(),
            &uuid::Uuid::new_v4().simple().to_string()[..7]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(bytes: Vec<u8>) -> ImageAsset {
        let size = bytes.len() as u64;
        ImageAsset {
            bytes,
            mime_type: "image/png".into(),
            size_bytes: size,
            format: "png".into(),
        }
    }

    #[test]
    fn deterministic_across_calls() {
        let a = asset(vec![1, 2, 3, 4, 5]);
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&a));
    }

    #[test]
    fn includes_size_suffix() {
        let a = asset(vec![9; 42]);
        assert!(Fingerprint::of(&a).as_str().ends_with("_42"));
    }

    #[test]
    fn only_first_kib_participates() {
        // Same 1 KiB prefix and same size: identical fingerprints even
        // though the tails differ. Documents the known collision behaviour.
        let mut x = vec![7u8; 2048];
        let mut y = vec![7u8; 2048];
        x[2000] = 1;
        y[2000] = 2;
        assert_eq!(Fingerprint::of(&asset(x)), Fingerprint::of(&asset(y)));
    }

    #[test]
    fn tail_difference_changes_size_component() {
        let x = vec![7u8; 2048];
        let y = vec![7u8; 2049];
        assert_ne!(Fingerprint::of(&asset(x)), Fingerprint::of(&asset(y)));
    }

    #[test]
    fn ephemeral_is_unstable() {
        assert_ne!(Fingerprint::ephemeral(), Fingerprint::ephemeral());
        assert!(Fingerprint::ephemeral().as_str().starts_with("fallback_"));
    }

    #[test]
    fn empty_asset_hashes_to_zero() {
        let a = asset(vec![]);
        assert_eq!(Fingerprint::of(&a).as_str(), "0_0");
    }
}
