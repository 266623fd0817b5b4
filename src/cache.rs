//! Result memoization keyed by fingerprint, operation kind, and the
//! operation's relevant-option subset.
//!
//! The cache is injected into the engine behind the [`ResultCache`] trait so
//! the eviction policy is swappable and testable in isolation. The default
//! [`LruResultCache`] is bounded by entry count — an unbounded map would
//! grow for the life of the process. The `get`/`put` contract is plain
//! memoization: last write wins, no TTL, process lifetime only. Writes are
//! not coalesced here; in-flight request deduplication lives in
//! [`crate::flight`].

use crate::fingerprint::Fingerprint;
use crate::options::OperationKind;
use crate::output::{CaptionOutput, DocumentOutput, OcrOutput};
use lru::LruCache;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use tracing::debug;

/// Identity of a memoized result.
///
/// `options_json` is the serde_json rendering of the operation's
/// relevant-option subset — field order is fixed by the subset struct, so
/// equal subsets always serialize identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub fingerprint: Fingerprint,
    pub kind: OperationKind,
    pub options_json: String,
}

impl CacheKey {
    pub fn new<S: Serialize>(
        fingerprint: Fingerprint,
        kind: OperationKind,
        relevant_options: &S,
    ) -> Self {
        let options_json = serde_json::to_string(relevant_options)
            .expect("relevant-option subsets serialize infallibly");
        Self {
            fingerprint,
            kind,
            options_json,
        }
    }
}

/// A stored operation result, tagged by kind.
#[derive(Debug, Clone)]
pub enum CachedResult {
    Ocr(OcrOutput),
    Caption(CaptionOutput),
    Document(DocumentOutput),
}

/// Get/put contract the engine depends on.
///
/// `put` unconditionally overwrites an existing entry for the same key.
pub trait ResultCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<CachedResult>;
    fn put(&self, key: CacheKey, value: CachedResult);
    /// Number of live entries, exposed through `get_configuration`.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Default bounded cache: least-recently-used eviction by entry count.
pub struct LruResultCache {
    inner: Mutex<LruCache<CacheKey, CachedResult>>,
}

impl LruResultCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("max(1) is non-zero");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl ResultCache for LruResultCache {
    fn get(&self, key: &CacheKey) -> Option<CachedResult> {
        let mut cache = self.inner.lock().expect("cache lock poisoned");
        let hit = cache.get(key).cloned();
        if hit.is_some() {
            debug!(fingerprint = %key.fingerprint, kind = ?key.kind, "cache hit");
        }
        hit
    }

    fn put(&self, key: CacheKey, value: CachedResult) {
        let mut cache = self.inner.lock().expect("cache lock poisoned");
        cache.put(key, value);
    }

    fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{OcrOptions, OperationKind};
    use crate::output::OcrResult;
    use crate::pipeline::validate::ImageInfo;
    use crate::providers::ProviderId;

    fn key(tag: &str) -> CacheKey {
        CacheKey {
            fingerprint: Fingerprint::ephemeral(),
            kind: OperationKind::Ocr,
            options_json: tag.to_string(),
        }
    }

    fn entry(text: &str) -> CachedResult {
        CachedResult::Ocr(crate::output::OperationOutput {
            id: "ocr_x".into(),
            result: OcrResult {
                text: text.into(),
                ..Default::default()
            },
            processing_time_ms: 1,
            provider: ProviderId::Local,
            timestamp: chrono::Utc::now(),
            image_info: ImageInfo {
                mime_type: "image/png".into(),
                size_bytes: 1,
                format: "png".into(),
            },
            options: OcrOptions::default(),
            from_cache: false,
        })
    }

    #[test]
    fn put_then_get() {
        let cache = LruResultCache::new(4);
        let k = key("a");
        cache.put(k.clone(), entry("hello"));
        assert!(cache.get(&k).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn last_write_wins() {
        let cache = LruResultCache::new(4);
        let k = key("a");
        cache.put(k.clone(), entry("first"));
        cache.put(k.clone(), entry("second"));
        match cache.get(&k).unwrap() {
            CachedResult::Ocr(out) => assert_eq!(out.result.text, "second"),
            _ => panic!("wrong variant"),
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn capacity_bound_evicts_lru() {
        let cache = LruResultCache::new(2);
        let (k1, k2, k3) = (key("1"), key("2"), key("3"));
        cache.put(k1.clone(), entry("1"));
        cache.put(k2.clone(), entry("2"));
        cache.get(&k1); // touch k1 so k2 is the eviction victim
        cache.put(k3.clone(), entry("3"));
        assert!(cache.get(&k1).is_some());
        assert!(cache.get(&k2).is_none());
        assert!(cache.get(&k3).is_some());
    }

    #[test]
    fn distinct_option_json_means_distinct_entries() {
        let cache = LruResultCache::new(4);
        let fp = Fingerprint::ephemeral();
        let k1 = CacheKey {
            fingerprint: fp.clone(),
            kind: OperationKind::Ocr,
            options_json: "{\"language\":\"eng\"}".into(),
        };
        let k2 = CacheKey {
            fingerprint: fp,
            kind: OperationKind::Ocr,
            options_json: "{\"language\":\"fra\"}".into(),
        };
        cache.put(k1.clone(), entry("eng"));
        cache.put(k2.clone(), entry("fra"));
        assert_eq!(cache.len(), 2);
    }
}
