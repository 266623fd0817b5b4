//! The conversion engine: validate → fingerprint → cache → dispatch → events.
//!
//! [`ConversionEngine`] is created empty and armed by [`initialize`]; every
//! operation before that fails fast with
//! [`Img2TextError::NotInitialized`]. Initialisation resolves the provider
//! slots (failing on missing credentials), builds or accepts a result cache,
//! and swaps the whole state in atomically — re-initialising replaces
//! providers and drops the old cache, while registered event listeners
//! survive.
//!
//! Each operation takes a snapshot of the current state up front; the state
//! lock is never held across an await, so a long provider call cannot block
//! re-initialisation or other calls.
//!
//! [`initialize`]: ConversionEngine::initialize

use crate::cache::{CacheKey, CachedResult, LruResultCache, ResultCache};
use crate::config::EngineConfig;
use crate::error::{Img2TextError, ProviderFailure};
use crate::events::{EventBus, EventKind, EventPayload, ListenerId};
use crate::fingerprint::Fingerprint;
use crate::flight::{self, Flight, Singleflight};
use crate::options::{CaptionOptions, DocumentOptions, OcrOptions, OperationKind};
use crate::output::{CaptionOutput, DocumentOutput, OcrOutput, OperationOutput};
use crate::pipeline::structure;
use crate::pipeline::validate::{self, ImageAsset, ImageInput};
use crate::providers::{Provider, ProviderId, ProviderRegistry};
use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Image-to-text conversion engine. Cheap to share behind an `Arc`; all
/// methods take `&self`.
pub struct ConversionEngine {
    state: RwLock<Option<Arc<EngineState>>>,
    events: EventBus,
}

struct EngineState {
    config: EngineConfig,
    registry: ProviderRegistry,
    cache: Arc<dyn ResultCache>,
    ocr_flights: Singleflight<OcrOutput>,
    caption_flights: Singleflight<CaptionOutput>,
    document_flights: Singleflight<DocumentOutput>,
}

impl Default for ConversionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionEngine {
    /// Create an engine with no providers armed.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(None),
            events: EventBus::new(),
        }
    }

    /// Arm the engine with `config` and the default bounded LRU cache.
    pub fn initialize(&self, config: EngineConfig) -> Result<(), Img2TextError> {
        let cache = Arc::new(LruResultCache::new(config.cache_capacity));
        self.initialize_with_cache(config, cache)
    }

    /// Arm the engine with a caller-supplied cache implementation.
    ///
    /// Re-initialising swaps providers and cache atomically; event listeners
    /// are kept. Nothing changes if provider resolution fails.
    pub fn initialize_with_cache(
        &self,
        config: EngineConfig,
        cache: Arc<dyn ResultCache>,
    ) -> Result<(), Img2TextError> {
        let registry = ProviderRegistry::from_config(&config)?;
        info!(
            ocr = %config.ocr_provider,
            captioning = %config.captioning_provider,
            "conversion engine initialized"
        );
        let state = Arc::new(EngineState {
            config,
            registry,
            cache,
            ocr_flights: Singleflight::new(),
            caption_flights: Singleflight::new(),
            document_flights: Singleflight::new(),
        });
        *self.state.write().expect("state lock poisoned") = Some(state);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().expect("state lock poisoned").is_some()
    }

    fn snapshot(&self) -> Result<Arc<EngineState>, Img2TextError> {
        self.state
            .read()
            .expect("state lock poisoned")
            .clone()
            .ok_or(Img2TextError::NotInitialized)
    }

    // ── Events ───────────────────────────────────────────────────────────

    /// Register a listener for one of the five lifecycle events
    /// (`onOcrStart`, `onOcrComplete`, `onCaptioningStart`,
    /// `onCaptioningComplete`, `onError`).
    pub fn on(
        &self,
        event: &str,
        callback: impl Fn(&EventPayload) + Send + Sync + 'static,
    ) -> Result<ListenerId, Img2TextError> {
        self.events.on(event, callback)
    }

    /// Unregister a listener previously returned by [`on`](Self::on).
    pub fn off(&self, event: &str, id: ListenerId) -> Result<bool, Img2TextError> {
        self.events.off(event, id)
    }

    fn emit_lifecycle(
        &self,
        kind: EventKind,
        operation_id: &str,
        operation: OperationKind,
        image: &ImageAsset,
    ) {
        self.events.emit(
            kind,
            &EventPayload {
                operation_id: operation_id.to_string(),
                operation,
                timestamp: Utc::now(),
                image_info: Some(image.info()),
                error: None,
            },
        );
    }

    fn emit_error(&self, operation_id: &str, operation: OperationKind, error: &ProviderFailure) {
        self.events.emit(
            EventKind::Error,
            &EventPayload {
                operation_id: operation_id.to_string(),
                operation,
                timestamp: Utc::now(),
                image_info: None,
                error: Some(error.to_string()),
            },
        );
    }

    // ── OCR ──────────────────────────────────────────────────────────────

    /// Extract text from an image.
    pub async fn extract_text(
        &self,
        input: &ImageInput,
        options: OcrOptions,
    ) -> Result<OcrOutput, Img2TextError> {
        let state = self.snapshot()?;
        let provider = Arc::clone(&state.registry.ocr);
        ensure_capability(&provider, OperationKind::Ocr)?;
        let image = validate::validate(input, &state.config)?;
        let options = resolve_ocr_options(options, &state.config);

        let operation_id = operation_id(OperationKind::Ocr);
        let key = CacheKey::new(
            fingerprint_for(&image),
            OperationKind::Ocr,
            &options.key_subset(),
        );

        if !options.skip_cache {
            if let Some(CachedResult::Ocr(mut hit)) = state.cache.get(&key) {
                hit.id = operation_id.clone();
                hit.timestamp = Utc::now();
                hit.from_cache = true;
                // A hit never dispatches, so listeners hear nothing for it.
                return Ok(hit);
            }
        }
        self.emit_lifecycle(EventKind::OcrStart, &operation_id, OperationKind::Ocr, &image);

        let outcome = match state.ocr_flights.begin(&key) {
            Flight::Follow(rx) => flight::follow(rx, provider.id()).await.map(|mut out| {
                // The follower shares the leader's result but keeps its own
                // invocation identity and resolved options.
                out.id = operation_id.clone();
                out.options = options.clone();
                out
            }),
            Flight::Lead(guard) => {
                let started = Instant::now();
                let call = provider.extract_text(&image, &options);
                let result =
                    with_timeout(call, state.config.provider_timeout_secs, provider.id()).await;
                let outcome = result.map(|ocr| OperationOutput {
                    id: operation_id.clone(),
                    result: ocr,
                    processing_time_ms: started.elapsed().as_millis() as u64,
                    provider: provider.id(),
                    timestamp: Utc::now(),
                    image_info: image.info(),
                    options: options.clone(),
                    from_cache: false,
                });
                if let Ok(output) = &outcome {
                    if !options.skip_cache {
                        state
                            .cache
                            .put(key.clone(), CachedResult::Ocr(output.clone()));
                    }
                }
                guard.finish(outcome.clone());
                outcome
            }
        };

        match outcome {
            Ok(output) => {
                self.emit_lifecycle(
                    EventKind::OcrComplete,
                    &operation_id,
                    OperationKind::Ocr,
                    &image,
                );
                Ok(output)
            }
            Err(failure) => {
                warn!(provider = %failure.provider, "ocr failed: {}", failure.message);
                self.emit_error(&operation_id, OperationKind::Ocr, &failure);
                Err(failure.into())
            }
        }
    }

    // ── Captioning ───────────────────────────────────────────────────────

    /// Generate a natural-language caption for an image.
    pub async fn generate_caption(
        &self,
        input: &ImageInput,
        options: CaptionOptions,
    ) -> Result<CaptionOutput, Img2TextError> {
        let state = self.snapshot()?;
        let provider = Arc::clone(&state.registry.captioning);
        ensure_capability(&provider, OperationKind::Caption)?;
        let image = validate::validate(input, &state.config)?;
        let options = resolve_caption_options(options, &state.config);

        let operation_id = operation_id(OperationKind::Caption);
        let key = CacheKey::new(
            fingerprint_for(&image),
            OperationKind::Caption,
            &options.key_subset(),
        );

        if !options.skip_cache {
            if let Some(CachedResult::Caption(mut hit)) = state.cache.get(&key) {
                hit.id = operation_id.clone();
                hit.timestamp = Utc::now();
                hit.from_cache = true;
                // A hit never dispatches, so listeners hear nothing for it.
                return Ok(hit);
            }
        }
        self.emit_lifecycle(
            EventKind::CaptioningStart,
            &operation_id,
            OperationKind::Caption,
            &image,
        );

        let outcome = match state.caption_flights.begin(&key) {
            Flight::Follow(rx) => flight::follow(rx, provider.id()).await.map(|mut out| {
                out.id = operation_id.clone();
                out.options = options.clone();
                out
            }),
            Flight::Lead(guard) => {
                let started = Instant::now();
                let call = provider.generate_caption(&image, &options);
                let result =
                    with_timeout(call, state.config.provider_timeout_secs, provider.id()).await;
                let outcome = result.map(|caption| OperationOutput {
                    id: operation_id.clone(),
                    result: caption,
                    processing_time_ms: started.elapsed().as_millis() as u64,
                    provider: provider.id(),
                    timestamp: Utc::now(),
                    image_info: image.info(),
                    options: options.clone(),
                    from_cache: false,
                });
                if let Ok(output) = &outcome {
                    if !options.skip_cache {
                        state
                            .cache
                            .put(key.clone(), CachedResult::Caption(output.clone()));
                    }
                }
                guard.finish(outcome.clone());
                outcome
            }
        };

        match outcome {
            Ok(output) => {
                self.emit_lifecycle(
                    EventKind::CaptioningComplete,
                    &operation_id,
                    OperationKind::Caption,
                    &image,
                );
                Ok(output)
            }
            Err(failure) => {
                warn!(provider = %failure.provider, "captioning failed: {}", failure.message);
                self.emit_error(&operation_id, OperationKind::Caption, &failure);
                Err(failure.into())
            }
        }
    }

    // ── Document analysis ────────────────────────────────────────────────

    /// Analyze the structure of a document image: typed blocks, tables,
    /// form fields, and a document-type classification.
    ///
    /// Backends without native document analysis are handled by running OCR
    /// and recovering structure heuristically from the extracted text.
    /// Document analysis has no start/complete events of its own; failures
    /// still reach `onError` listeners.
    pub async fn analyze_document(
        &self,
        input: &ImageInput,
        options: DocumentOptions,
    ) -> Result<DocumentOutput, Img2TextError> {
        let state = self.snapshot()?;
        if !state.config.enable_document_analysis {
            return Err(Img2TextError::FeatureDisabled(
                "document analysis is disabled in the engine configuration".into(),
            ));
        }
        let provider = Arc::clone(&state.registry.ocr);
        ensure_capability(&provider, OperationKind::Document)?;
        let image = validate::validate(input, &state.config)?;
        let options = resolve_document_options(options, &state.config);

        let operation_id = operation_id(OperationKind::Document);
        let key = CacheKey::new(
            fingerprint_for(&image),
            OperationKind::Document,
            &options.key_subset(),
        );

        if !options.skip_cache {
            if let Some(CachedResult::Document(mut hit)) = state.cache.get(&key) {
                hit.id = operation_id.clone();
                hit.timestamp = Utc::now();
                hit.from_cache = true;
                return Ok(hit);
            }
        }

        let outcome = match state.document_flights.begin(&key) {
            Flight::Follow(rx) => flight::follow(rx, provider.id()).await.map(|mut out| {
                out.id = operation_id.clone();
                out.options = options.clone();
                out
            }),
            Flight::Lead(guard) => {
                let started = Instant::now();
                let call = analyze_with(&provider, &image, &options, &state.config);
                let result =
                    with_timeout(call, state.config.provider_timeout_secs, provider.id()).await;
                let outcome = result.map(|document| OperationOutput {
                    id: operation_id.clone(),
                    result: document,
                    processing_time_ms: started.elapsed().as_millis() as u64,
                    provider: provider.id(),
                    timestamp: Utc::now(),
                    image_info: image.info(),
                    options: options.clone(),
                    from_cache: false,
                });
                if let Ok(output) = &outcome {
                    if !options.skip_cache {
                        state
                            .cache
                            .put(key.clone(), CachedResult::Document(output.clone()));
                    }
                }
                guard.finish(outcome.clone());
                outcome
            }
        };

        match outcome {
            Ok(output) => Ok(output),
            Err(failure) => {
                warn!(provider = %failure.provider, "document analysis failed: {}", failure.message);
                self.emit_error(&operation_id, OperationKind::Document, &failure);
                Err(failure.into())
            }
        }
    }

    // ── Introspection ────────────────────────────────────────────────────

    /// Current configuration, provider selection, and cache occupancy.
    pub fn get_configuration(&self) -> ConfigurationSnapshot {
        let state = self.state.read().expect("state lock poisoned").clone();
        match state {
            None => ConfigurationSnapshot {
                version: env!("CARGO_PKG_VERSION"),
                initialized: false,
                providers: None,
                settings: None,
                features: None,
                cache_size: 0,
            },
            Some(state) => {
                let c = &state.config;
                ConfigurationSnapshot {
                    version: env!("CARGO_PKG_VERSION"),
                    initialized: true,
                    providers: Some(ProvidersSnapshot {
                        ocr: c.ocr_provider,
                        captioning: c.captioning_provider,
                    }),
                    settings: Some(SettingsSnapshot {
                        ocr_default_language: c.ocr_default_language.clone(),
                        ocr_preprocessing: c.ocr_preprocessing,
                        ocr_page_segmentation: c.ocr_page_segmentation,
                        ocr_engine_mode: c.ocr_engine_mode,
                        captioning_language: c.captioning_language.clone(),
                        captioning_model: c.captioning_model.clone(),
                        max_image_size: c.max_image_size,
                        supported_image_formats: c.supported_image_formats.clone(),
                    }),
                    features: Some(FeaturesSnapshot {
                        document_analysis: c.enable_document_analysis,
                        table_extraction: c.enable_table_extraction,
                        form_extraction: c.enable_form_extraction,
                    }),
                    cache_size: state.cache.len(),
                }
            }
        }
    }
}

// ── Dispatch helpers ─────────────────────────────────────────────────────

/// Fail fast, before validation or cache work, when the provider cannot
/// serve the requested operation — in practice, a custom provider whose
/// callback for this capability was never supplied.
fn ensure_capability(
    provider: &Arc<dyn Provider>,
    kind: OperationKind,
) -> Result<(), Img2TextError> {
    if provider.supports(kind) {
        return Ok(());
    }
    let operation = match kind {
        OperationKind::Ocr => "extract_text",
        OperationKind::Caption => "generate_caption",
        OperationKind::Document => "analyze_document",
    };
    Err(Img2TextError::Configuration(format!(
        "provider '{}' has no {} callback configured",
        provider.id(),
        operation
    )))
}

async fn with_timeout<T>(
    call: impl std::future::Future<Output = Result<T, ProviderFailure>>,
    timeout_secs: u64,
    provider: ProviderId,
) -> Result<T, ProviderFailure> {
    match tokio::time::timeout(Duration::from_secs(timeout_secs), call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderFailure::timeout(provider, timeout_secs)),
    }
}

/// Native document analysis when the backend has it, heuristic recovery over
/// OCR output otherwise.
async fn analyze_with(
    provider: &Arc<dyn Provider>,
    image: &ImageAsset,
    options: &DocumentOptions,
    config: &EngineConfig,
) -> Result<crate::output::DocumentResult, ProviderFailure> {
    if let Some(native) = provider.document_analysis() {
        return native.analyze_document(image, options).await;
    }
    let ocr_options = OcrOptions {
        language: options.language.clone(),
        document_mode: true,
        preprocessing: Some(config.ocr_preprocessing),
        page_segmentation: Some(config.ocr_page_segmentation),
        engine_mode: Some(config.ocr_engine_mode),
        skip_cache: false,
    };
    let ocr = provider.extract_text(image, &ocr_options).await?;
    Ok(structure::recover(&ocr, options))
}

fn operation_id(kind: OperationKind) -> String {
    format!(
        "{}_{}",
        kind.id_prefix(),
        uuid::Uuid::new_v4().simple()
    )
}

/// Bytes that never made it through decoding get an unstable key, so the
/// call proceeds as a guaranteed cache miss.
fn fingerprint_for(image: &ImageAsset) -> Fingerprint {
    if image.bytes.is_empty() {
        Fingerprint::ephemeral()
    } else {
        Fingerprint::of(image)
    }
}

fn resolve_ocr_options(mut options: OcrOptions, config: &EngineConfig) -> OcrOptions {
    options
        .language
        .get_or_insert_with(|| config.ocr_default_language.clone());
    options.preprocessing.get_or_insert(config.ocr_preprocessing);
    options
        .page_segmentation
        .get_or_insert(config.ocr_page_segmentation);
    options.engine_mode.get_or_insert(config.ocr_engine_mode);
    options
}

fn resolve_caption_options(mut options: CaptionOptions, config: &EngineConfig) -> CaptionOptions {
    options
        .language
        .get_or_insert_with(|| config.captioning_language.clone());
    if options.model.is_none() {
        options.model = config.captioning_model.clone();
    }
    options
}

fn resolve_document_options(
    mut options: DocumentOptions,
    config: &EngineConfig,
) -> DocumentOptions {
    options
        .language
        .get_or_insert_with(|| config.ocr_default_language.clone());
    options
        .extract_tables
        .get_or_insert(config.enable_table_extraction);
    options
        .extract_forms
        .get_or_insert(config.enable_form_extraction);
    options
}

// ── Configuration snapshot ───────────────────────────────────────────────

/// Point-in-time view returned by [`ConversionEngine::get_configuration`].
#[derive(Debug, Clone, Serialize)]
pub struct ConfigurationSnapshot {
    pub version: &'static str,
    pub initialized: bool,
    pub providers: Option<ProvidersSnapshot>,
    pub settings: Option<SettingsSnapshot>,
    pub features: Option<FeaturesSnapshot>,
    pub cache_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvidersSnapshot {
    pub ocr: ProviderId,
    pub captioning: ProviderId,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettingsSnapshot {
    pub ocr_default_language: String,
    pub ocr_preprocessing: bool,
    pub ocr_page_segmentation: u8,
    pub ocr_engine_mode: u8,
    pub captioning_language: String,
    pub captioning_model: Option<String>,
    pub max_image_size: u64,
    pub supported_image_formats: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeaturesSnapshot {
    pub document_analysis: bool,
    pub table_extraction: bool,
    pub form_extraction: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_ids_carry_the_kind_prefix() {
        assert!(operation_id(OperationKind::Ocr).starts_with("ocr_"));
        assert!(operation_id(OperationKind::Caption).starts_with("caption_"));
        assert!(operation_id(OperationKind::Document).starts_with("doc_"));
        assert_ne!(
            operation_id(OperationKind::Ocr),
            operation_id(OperationKind::Ocr)
        );
    }

    #[test]
    fn ocr_options_resolve_from_config() {
        let config = EngineConfig::builder()
            .ocr_default_language("fra")
            .ocr_page_segmentation(6)
            .build()
            .unwrap();
        let resolved = resolve_ocr_options(OcrOptions::default(), &config);
        assert_eq!(resolved.language.as_deref(), Some("fra"));
        assert_eq!(resolved.page_segmentation, Some(6));

        // Caller-set fields win over config defaults.
        let resolved = resolve_ocr_options(
            OcrOptions {
                language: Some("deu".into()),
                ..Default::default()
            },
            &config,
        );
        assert_eq!(resolved.language.as_deref(), Some("deu"));
    }

    #[test]
    fn document_options_resolve_feature_flags() {
        let config = EngineConfig::builder()
            .enable_table_extraction(false)
            .build()
            .unwrap();
        let resolved = resolve_document_options(DocumentOptions::default(), &config);
        assert_eq!(resolved.extract_tables, Some(false));
        assert_eq!(resolved.extract_forms, Some(true));
    }

    #[test]
    fn uninitialized_snapshot_reports_nothing() {
        let engine = ConversionEngine::new();
        let snapshot = engine.get_configuration();
        assert!(!snapshot.initialized);
        assert!(snapshot.providers.is_none());
        assert_eq!(snapshot.cache_size, 0);
    }

    #[tokio::test]
    async fn operations_before_initialize_fail() {
        let engine = ConversionEngine::new();
        let input = ImageInput::Binary {
            bytes: vec![1],
            mime_type: "image/png".into(),
        };
        let err = engine
            .extract_text(&input, OcrOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Img2TextError::NotInitialized));
    }
}
