//! Error types for the img2text library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Img2TextError`] — the full taxonomy returned from the public engine
//!   surface: configuration and validation failures that happen *before* any
//!   provider call, and provider failures re-raised afterwards.
//!
//! * [`ProviderFailure`] — an opaque, cloneable wrapper around whatever the
//!   underlying recognition backend surfaced (HTTP status, vendor error body,
//!   timeout). It is `Clone` because in-flight deduplication broadcasts one
//!   provider outcome to every caller awaiting the same cache key.
//!
//! Validation and configuration errors are returned synchronously before any
//! provider call or cache mutation; provider failures are additionally
//! reported through the `onError` event. Nothing is retried automatically —
//! retry policy belongs to the caller or to the provider's own backend.

use crate::providers::ProviderId;
use thiserror::Error;

/// All errors returned by the img2text library.
#[derive(Debug, Error)]
pub enum Img2TextError {
    // ── Lifecycle errors ──────────────────────────────────────────────────
    /// An operation was invoked before a successful `initialize`.
    #[error("conversion engine is not initialized — call initialize() first")]
    NotInitialized,

    /// Provider or callback configuration is unusable for the requested capability.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A cloud provider was selected without the credentials it requires.
    #[error("provider '{provider}' requires credentials that were not supplied.\n{hint}")]
    MissingCredentials { provider: ProviderId, hint: String },

    /// `analyze_document` was called while document analysis is disabled.
    #[error("feature is disabled: {0}")]
    FeatureDisabled(String),

    // ── Validation errors ─────────────────────────────────────────────────
    /// The input is not a well-formed image in an allowed format.
    #[error("invalid image input: {0}")]
    InvalidFormat(String),

    /// Decoded image size exceeds the configured maximum.
    #[error("image size {size} bytes exceeds the maximum of {max} bytes")]
    SizeLimit { size: u64, max: u64 },

    // ── Dispatch errors ───────────────────────────────────────────────────
    /// The underlying recognition backend failed.
    #[error(transparent)]
    Provider(#[from] ProviderFailure),

    // ── Event errors ──────────────────────────────────────────────────────
    /// `on`/`off` was called with a name outside the fixed event set.
    #[error("unknown event name: '{0}'")]
    UnknownEvent(String),
}

/// A failure surfaced by a recognition backend, with the provider it came from.
///
/// The message is deliberately opaque: each vendor reports errors in its own
/// shape and the engine does not interpret them beyond logging.
#[derive(Debug, Clone, Error)]
#[error("provider '{provider}' failed: {message}")]
pub struct ProviderFailure {
    pub provider: ProviderId,
    pub message: String,
}

impl ProviderFailure {
    pub fn new(provider: ProviderId, message: impl Into<String>) -> Self {
        Self {
            provider,
            message: message.into(),
        }
    }

    /// A provider call that exceeded the configured per-call timeout.
    pub fn timeout(provider: ProviderId, secs: u64) -> Self {
        Self::new(provider, format!("call timed out after {secs}s"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_limit_display() {
        let e = Img2TextError::SizeLimit { size: 11, max: 10 };
        let msg = e.to_string();
        assert!(msg.contains("11"), "got: {msg}");
        assert!(msg.contains("10"), "got: {msg}");
    }

    #[test]
    fn provider_failure_display() {
        let f = ProviderFailure::new(ProviderId::Google, "HTTP 403");
        assert!(f.to_string().contains("google"));
        assert!(f.to_string().contains("HTTP 403"));
    }

    #[test]
    fn timeout_display() {
        let f = ProviderFailure::timeout(ProviderId::Azure, 30);
        assert!(f.to_string().contains("30s"));
    }

    #[test]
    fn unknown_event_display() {
        let e = Img2TextError::UnknownEvent("onFoo".into());
        assert!(e.to_string().contains("onFoo"));
    }
}
