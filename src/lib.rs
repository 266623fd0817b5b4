//! # img2text
//!
//! Turn images into text: OCR, captioning, and document-structure analysis
//! behind one async engine with pluggable vision backends.
//!
//! ## Why this crate?
//!
//! Chat assistants and ingestion pipelines keep re-solving the same plumbing
//! around vision APIs: validating uploads, deduplicating identical requests,
//! memoizing expensive provider calls, and normalising five vendors' wire
//! formats into one result shape. This crate owns that plumbing so an
//! application only picks a provider and reads back typed results.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image (data-URI or bytes)
//!  │
//!  ├─ 1. Validate     format allow-list + size cap
//!  ├─ 2. Fingerprint  cheap rolling hash + size → cache-key material
//!  ├─ 3. Cache        bounded LRU lookup (per operation + relevant options)
//!  ├─ 4. Coalesce     concurrent identical requests share one provider call
//!  ├─ 5. Dispatch     local sidecar / Google / Azure / OpenAI / custom,
//!  │                  per-call timeout
//!  └─ 6. Deliver      store in cache, notify event listeners, return output
//! ```
//!
//! Document analysis additionally falls back to heuristic structure recovery
//! (headings, lists, tables, form fields, document type) over plain OCR text
//! when the selected backend has no native layout analysis — only Azure does.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use img2text::{ConversionEngine, EngineConfig, ImageInput, OcrOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = ConversionEngine::new();
//!     engine.initialize(EngineConfig::default())?;
//!
//!     let input = ImageInput::DataUri("data:image/png;base64,…".into());
//!     let output = engine.extract_text(&input, OcrOptions::default()).await?;
//!     println!("{}", output.result.text);
//!     eprintln!("provider: {}, cached: {}", output.provider, output.from_cache);
//!     Ok(())
//! }
//! ```
//!
//! ## Choosing a Provider
//!
//! | Provider | OCR | Caption | Native doc analysis | Credentials |
//! |----------|-----|---------|---------------------|-------------|
//! | `local`  | ✓ (sidecar) | ✓ | — | none |
//! | `google` | ✓ | labels-based | — | API key |
//! | `azure`  | ✓ (Read) | ✓ | ✓ (prebuilt-layout) | key + endpoint |
//! | `openai` | ✓ (VLM) | ✓ (VLM) | — | API key |
//! | `custom` | your callbacks | your callbacks | optional | none |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod options;
pub mod output;
pub mod pipeline;
pub mod providers;

mod flight;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cache::{CacheKey, CachedResult, LruResultCache, ResultCache};
pub use config::{Credentials, EngineConfig, EngineConfigBuilder};
pub use engine::{ConfigurationSnapshot, ConversionEngine};
pub use error::{Img2TextError, ProviderFailure};
pub use events::{EventPayload, ListenerId};
pub use fingerprint::Fingerprint;
pub use options::{CaptionOptions, DocumentOptions, OcrOptions, OperationKind};
pub use output::{
    CaptionOutput, CaptionResult, DocumentOutput, DocumentResult, DocumentType, OcrOutput,
    OcrResult,
};
pub use pipeline::validate::{ImageAsset, ImageInfo, ImageInput};
pub use providers::{custom::CustomCallbacks, Provider, ProviderId};
