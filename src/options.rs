//! Per-operation option bags and the relevant-option subsets that feed the
//! cache key.
//!
//! Callers pass options with most fields unset; the engine resolves them
//! against [`crate::config::EngineConfig`] defaults before dispatch, and the
//! resolved bag is echoed back in the result envelope. Only a *relevant
//! subset* of each bag participates in cache-key composition — options that
//! cannot change the provider's answer (e.g. `max_tokens` for captioning,
//! which only truncates) are deliberately excluded so they do not fragment
//! the cache.

use serde::{Deserialize, Serialize};

/// The three operations the engine performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Ocr,
    Caption,
    Document,
}

impl OperationKind {
    /// Short prefix used in operation ids (`ocr_…`, `caption_…`, `doc_…`).
    pub(crate) fn id_prefix(self) -> &'static str {
        match self {
            OperationKind::Ocr => "ocr",
            OperationKind::Caption => "caption",
            OperationKind::Document => "doc",
        }
    }
}

// ── OCR ──────────────────────────────────────────────────────────────────

/// Options for [`crate::ConversionEngine::extract_text`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrOptions {
    /// ISO language hint. Defaults to the engine's `ocr_default_language`.
    pub language: Option<String>,
    /// Ask the backend for document-grade text detection (denser layout model).
    pub document_mode: bool,
    /// Defaults to the engine's `ocr_preprocessing`.
    pub preprocessing: Option<bool>,
    /// Tesseract-style page segmentation mode. Defaults from config.
    pub page_segmentation: Option<u8>,
    /// Tesseract-style engine mode. Defaults from config.
    pub engine_mode: Option<u8>,
    /// Bypass the result cache for this call (no lookup, no store).
    pub skip_cache: bool,
}

/// The subset of [`OcrOptions`] that can change the provider's answer.
#[derive(Serialize)]
pub(crate) struct OcrKeyOptions<'a> {
    pub language: Option<&'a str>,
    pub document_mode: bool,
}

impl OcrOptions {
    pub(crate) fn key_subset(&self) -> OcrKeyOptions<'_> {
        OcrKeyOptions {
            language: self.language.as_deref(),
            document_mode: self.document_mode,
        }
    }
}

// ── Captioning ───────────────────────────────────────────────────────────

/// Options for [`crate::ConversionEngine::generate_caption`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionOptions {
    /// Defaults to the engine's `captioning_language`.
    pub language: Option<String>,
    /// Defaults to the engine's `captioning_model`.
    pub model: Option<String>,
    /// Output cap for VLM-style backends.
    pub max_tokens: u32,
    /// Sampling temperature for VLM-style backends.
    pub temperature: f32,
    /// Detailed description vs. a brief caption; detailed mode also requests
    /// alternatives and tags where the backend supports them.
    pub detailed: bool,
    /// Bypass the result cache for this call (no lookup, no store).
    pub skip_cache: bool,
}

impl Default for CaptionOptions {
    fn default() -> Self {
        Self {
            language: None,
            model: None,
            max_tokens: 100,
            temperature: 0.7,
            detailed: true,
            skip_cache: false,
        }
    }
}

/// The subset of [`CaptionOptions`] that can change the provider's answer.
///
/// `max_tokens` and `temperature` are excluded on purpose: two calls that
/// differ only in those fields share a cache entry.
#[derive(Serialize)]
pub(crate) struct CaptionKeyOptions<'a> {
    pub language: Option<&'a str>,
    pub model: Option<&'a str>,
    pub detailed: bool,
}

impl CaptionOptions {
    pub(crate) fn key_subset(&self) -> CaptionKeyOptions<'_> {
        CaptionKeyOptions {
            language: self.language.as_deref(),
            model: self.model.as_deref(),
            detailed: self.detailed,
        }
    }
}

// ── Document analysis ────────────────────────────────────────────────────

/// Options for [`crate::ConversionEngine::analyze_document`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentOptions {
    /// Defaults to the engine's `ocr_default_language`.
    pub language: Option<String>,
    /// Defaults to the engine's `enable_table_extraction`.
    pub extract_tables: Option<bool>,
    /// Defaults to the engine's `enable_form_extraction`.
    pub extract_forms: Option<bool>,
    /// Bypass the result cache for this call (no lookup, no store).
    pub skip_cache: bool,
}

/// The subset of [`DocumentOptions`] that can change the provider's answer.
#[derive(Serialize)]
pub(crate) struct DocumentKeyOptions<'a> {
    pub language: Option<&'a str>,
    pub extract_tables: Option<bool>,
    pub extract_forms: Option<bool>,
}

impl DocumentOptions {
    pub(crate) fn key_subset(&self) -> DocumentKeyOptions<'_> {
        DocumentKeyOptions {
            language: self.language.as_deref(),
            extract_tables: self.extract_tables,
            extract_forms: self.extract_forms,
        }
    }

    /// Table extraction flag after defaulting; `recover` and the vendor
    /// mappers both honour it.
    pub fn tables_enabled(&self) -> bool {
        self.extract_tables.unwrap_or(true)
    }

    /// Form extraction flag after defaulting.
    pub fn forms_enabled(&self) -> bool {
        self.extract_forms.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caption_defaults() {
        let o = CaptionOptions::default();
        assert_eq!(o.max_tokens, 100);
        assert!(o.detailed);
        assert!(!o.skip_cache);
    }

    #[test]
    fn caption_key_subset_ignores_max_tokens() {
        let a = CaptionOptions {
            max_tokens: 100,
            ..Default::default()
        };
        let b = CaptionOptions {
            max_tokens: 4096,
            ..Default::default()
        };
        let ka = serde_json::to_string(&a.key_subset()).unwrap();
        let kb = serde_json::to_string(&b.key_subset()).unwrap();
        assert_eq!(ka, kb);
    }

    #[test]
    fn ocr_key_subset_includes_document_mode() {
        let mut o = OcrOptions::default();
        let plain = serde_json::to_string(&o.key_subset()).unwrap();
        o.document_mode = true;
        let doc = serde_json::to_string(&o.key_subset()).unwrap();
        assert_ne!(plain, doc);
    }
}
