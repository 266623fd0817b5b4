//! Engine configuration.
//!
//! Every knob lives in one [`EngineConfig`], built via its
//! [`EngineConfigBuilder`] or taken wholesale from
//! [`EngineConfig::default()`]. Keeping the knobs together makes it trivial
//! to share a config across tasks, log it, and diff two runs to understand
//! why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A twenty-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! documented defaults for the rest.

use crate::error::Img2TextError;
use crate::providers::custom::CustomCallbacks;
use crate::providers::ProviderId;
use std::fmt;
use std::sync::Arc;

/// Configuration for a [`crate::engine::ConversionEngine`].
///
/// # Example
/// ```rust
/// use img2text::config::EngineConfig;
/// use img2text::providers::ProviderId;
///
/// let config = EngineConfig::builder()
///     .ocr_provider(ProviderId::Local)
///     .ocr_default_language("fra")
///     .max_image_size(4 * 1024 * 1024)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct EngineConfig {
    /// Backend used for text extraction. Default: [`ProviderId::Local`].
    pub ocr_provider: ProviderId,

    /// Language hint passed to OCR calls that don't set one. Default: `eng`.
    pub ocr_default_language: String,

    /// Ask the OCR backend to preprocess (deskew, denoise) before
    /// recognition, where the backend supports it. Default: true.
    pub ocr_preprocessing: bool,

    /// Page segmentation mode forwarded to engines that take one
    /// (Tesseract-style `psm`). Default: 3 (fully automatic).
    pub ocr_page_segmentation: u8,

    /// Engine mode forwarded to engines that take one (Tesseract-style
    /// `oem`). Default: 3 (engine default).
    pub ocr_engine_mode: u8,

    /// Backend used for caption generation. Default: [`ProviderId::Local`].
    pub captioning_provider: ProviderId,

    /// Captioning model identifier. `None` uses the backend's default.
    pub captioning_model: Option<String>,

    /// Language captions are requested in. Default: `en`.
    pub captioning_language: String,

    /// Allow `analyze_document` calls at all. When false the operation fails
    /// fast with [`Img2TextError::FeatureDisabled`]. Default: true.
    pub enable_document_analysis: bool,

    /// Extract tables during document analysis. Default: true.
    pub enable_table_extraction: bool,

    /// Extract form key/value fields during document analysis. Default: true.
    pub enable_form_extraction: bool,

    /// Largest accepted image in bytes (inclusive). Default: 10 MiB.
    ///
    /// The cap exists so one oversized upload cannot stall the pipeline or
    /// blow past a backend's request-size limit; every cloud vision API
    /// rejects payloads somewhere between 4 and 20 MB anyway.
    pub max_image_size: u64,

    /// Accepted MIME subtypes, compared case-insensitively.
    /// Default: jpg, jpeg, png, gif, bmp, tiff, webp.
    pub supported_image_formats: Vec<String>,

    /// API keys and endpoints for the cloud backends. Only the entries for
    /// the providers actually selected need to be present.
    pub credentials: Credentials,

    /// Caller-supplied callbacks backing [`ProviderId::Custom`]. Required
    /// when either provider slot selects `Custom`.
    pub custom_callbacks: Option<Arc<CustomCallbacks>>,

    /// Per-provider-call timeout in seconds. A call that exceeds it fails
    /// with a timeout [`crate::error::ProviderFailure`]; it is never
    /// silently retried. Default: 30.
    pub provider_timeout_secs: u64,

    /// Entry capacity of the default result cache. Ignored when the caller
    /// injects a cache of their own. Default: 256.
    pub cache_capacity: usize,

    /// Base URL of the local OCR/captioning sidecar. Default:
    /// `http://127.0.0.1:8884`.
    pub local_engine_endpoint: String,

    /// Languages the local sidecar has models for. OCR requests for a
    /// language outside this list still go through; the sidecar decides.
    pub local_engine_languages: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ocr_provider: ProviderId::Local,
            ocr_default_language: "eng".to_string(),
            ocr_preprocessing: true,
            ocr_page_segmentation: 3,
            ocr_engine_mode: 3,
            captioning_provider: ProviderId::Local,
            captioning_model: None,
            captioning_language: "en".to_string(),
            enable_document_analysis: true,
            enable_table_extraction: true,
            enable_form_extraction: true,
            max_image_size: 10 * 1024 * 1024,
            supported_image_formats: ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp"]
                .into_iter()
                .map(String::from)
                .collect(),
            credentials: Credentials::default(),
            custom_callbacks: None,
            provider_timeout_secs: 30,
            cache_capacity: 256,
            local_engine_endpoint: "http://127.0.0.1:8884".to_string(),
            local_engine_languages: vec!["eng".to_string(), "fra".to_string()],
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("ocr_provider", &self.ocr_provider)
            .field("ocr_default_language", &self.ocr_default_language)
            .field("ocr_preprocessing", &self.ocr_preprocessing)
            .field("ocr_page_segmentation", &self.ocr_page_segmentation)
            .field("ocr_engine_mode", &self.ocr_engine_mode)
            .field("captioning_provider", &self.captioning_provider)
            .field("captioning_model", &self.captioning_model)
            .field("captioning_language", &self.captioning_language)
            .field("enable_document_analysis", &self.enable_document_analysis)
            .field("enable_table_extraction", &self.enable_table_extraction)
            .field("enable_form_extraction", &self.enable_form_extraction)
            .field("max_image_size", &self.max_image_size)
            .field("supported_image_formats", &self.supported_image_formats)
            .field("credentials", &self.credentials)
            .field(
                "custom_callbacks",
                &self.custom_callbacks.as_ref().map(|_| "<CustomCallbacks>"),
            )
            .field("provider_timeout_secs", &self.provider_timeout_secs)
            .field("cache_capacity", &self.cache_capacity)
            .field("local_engine_endpoint", &self.local_engine_endpoint)
            .finish()
    }
}

impl EngineConfig {
    /// Create a new builder seeded with the defaults.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`EngineConfig`].
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn ocr_provider(mut self, provider: ProviderId) -> Self {
        self.config.ocr_provider = provider;
        self
    }

    pub fn ocr_default_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_default_language = lang.into();
        self
    }

    pub fn ocr_preprocessing(mut self, v: bool) -> Self {
        self.config.ocr_preprocessing = v;
        self
    }

    pub fn ocr_page_segmentation(mut self, psm: u8) -> Self {
        self.config.ocr_page_segmentation = psm;
        self
    }

    pub fn ocr_engine_mode(mut self, oem: u8) -> Self {
        self.config.ocr_engine_mode = oem;
        self
    }

    pub fn captioning_provider(mut self, provider: ProviderId) -> Self {
        self.config.captioning_provider = provider;
        self
    }

    pub fn captioning_model(mut self, model: impl Into<String>) -> Self {
        self.config.captioning_model = Some(model.into());
        self
    }

    pub fn captioning_language(mut self, lang: impl Into<String>) -> Self {
        self.config.captioning_language = lang.into();
        self
    }

    pub fn enable_document_analysis(mut self, v: bool) -> Self {
        self.config.enable_document_analysis = v;
        self
    }

    pub fn enable_table_extraction(mut self, v: bool) -> Self {
        self.config.enable_table_extraction = v;
        self
    }

    pub fn enable_form_extraction(mut self, v: bool) -> Self {
        self.config.enable_form_extraction = v;
        self
    }

    pub fn max_image_size(mut self, bytes: u64) -> Self {
        self.config.max_image_size = bytes;
        self
    }

    pub fn supported_image_formats<I, S>(mut self, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.supported_image_formats = formats.into_iter().map(Into::into).collect();
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = credentials;
        self
    }

    pub fn custom_callbacks(mut self, callbacks: CustomCallbacks) -> Self {
        self.config.custom_callbacks = Some(Arc::new(callbacks));
        self
    }

    pub fn provider_timeout_secs(mut self, secs: u64) -> Self {
        self.config.provider_timeout_secs = secs.max(1);
        self
    }

    pub fn cache_capacity(mut self, entries: usize) -> Self {
        self.config.cache_capacity = entries.max(1);
        self
    }

    pub fn local_engine_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.local_engine_endpoint = url.into();
        self
    }

    pub fn local_engine_languages<I, S>(mut self, langs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.local_engine_languages = langs.into_iter().map(Into::into).collect();
        self
    }

    /// Build the configuration, validating cross-field constraints.
    pub fn build(self) -> Result<EngineConfig, Img2TextError> {
        let c = &self.config;
        if c.supported_image_formats.is_empty() {
            return Err(Img2TextError::Configuration(
                "supported_image_formats must not be empty".into(),
            ));
        }
        if c.max_image_size == 0 {
            return Err(Img2TextError::Configuration(
                "max_image_size must be greater than zero".into(),
            ));
        }
        if (c.ocr_provider == ProviderId::Custom || c.captioning_provider == ProviderId::Custom)
            && c.custom_callbacks.is_none()
        {
            return Err(Img2TextError::Configuration(
                "the custom provider requires custom_callbacks".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Credentials ──────────────────────────────────────────────────────────

/// API keys and endpoints for the cloud backends.
///
/// `Debug` redacts key material so configs can be logged safely.
#[derive(Clone, Default)]
pub struct Credentials {
    pub google_api_key: Option<String>,
    pub azure_vision_key: Option<String>,
    pub azure_vision_endpoint: Option<String>,
    pub openai_api_key: Option<String>,
}

impl Credentials {
    /// Read credentials from the conventional environment variables:
    /// `GOOGLE_VISION_API_KEY`, `AZURE_VISION_KEY`, `AZURE_VISION_ENDPOINT`,
    /// `OPENAI_API_KEY`. Missing variables stay `None`.
    pub fn from_env() -> Self {
        Self {
            google_api_key: std::env::var("GOOGLE_VISION_API_KEY").ok(),
            azure_vision_key: std::env::var("AZURE_VISION_KEY").ok(),
            azure_vision_endpoint: std::env::var("AZURE_VISION_ENDPOINT").ok(),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn mask(v: &Option<String>) -> &'static str {
            if v.is_some() {
                "<set>"
            } else {
                "<unset>"
            }
        }
        f.debug_struct("Credentials")
            .field("google_api_key", &mask(&self.google_api_key))
            .field("azure_vision_key", &mask(&self.azure_vision_key))
            .field("azure_vision_endpoint", &self.azure_vision_endpoint)
            .field("openai_api_key", &mask(&self.openai_api_key))
            .finish()
    }
}
