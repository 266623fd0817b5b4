//! Self-hosted sidecar backend.
//!
//! Talks to a small OCR/captioning HTTP service running next to the
//! application (a Tesseract wrapper or similar), so conversions work with no
//! cloud account at all. The sidecar exposes two JSON endpoints:
//!
//! * `POST /ocr`     — base64 image + Tesseract-style knobs, returns text
//!   with word/line detail.
//! * `POST /caption` — base64 image + generation knobs, returns a caption.

use crate::config::EngineConfig;
use crate::error::{Img2TextError, ProviderFailure};
use crate::options::{CaptionOptions, OcrOptions};
use crate::output::{CaptionResult, Line, OcrResult, Word};
use crate::pipeline::validate::ImageAsset;
use crate::providers::{Provider, ProviderId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug)]
pub struct LocalProvider {
    endpoint: String,
    languages: Vec<String>,
    default_language: String,
    preprocessing: bool,
    page_segmentation: u8,
    engine_mode: u8,
    caption_language: String,
    http: reqwest::Client,
}

impl LocalProvider {
    /// Fails when `local_engine_languages` is empty: a sidecar with no
    /// language models cannot OCR anything, so the misconfiguration is
    /// reported at initialisation rather than on the first call.
    pub fn new(config: &EngineConfig, http: reqwest::Client) -> Result<Self, Img2TextError> {
        if config.local_engine_languages.is_empty() {
            return Err(Img2TextError::Configuration(
                "local_engine_languages must list at least one installed language".into(),
            ));
        }
        Ok(Self {
            endpoint: config.local_engine_endpoint.trim_end_matches('/').to_string(),
            languages: config.local_engine_languages.clone(),
            default_language: config.ocr_default_language.clone(),
            preprocessing: config.ocr_preprocessing,
            page_segmentation: config.ocr_page_segmentation,
            engine_mode: config.ocr_engine_mode,
            caption_language: config.captioning_language.clone(),
            http,
        })
    }

    /// Languages the sidecar reports having models for.
    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    fn has_language(&self, language: &str) -> bool {
        self.languages.iter().any(|l| l.eq_ignore_ascii_case(language))
    }

    fn failure(message: impl Into<String>) -> ProviderFailure {
        ProviderFailure::new(ProviderId::Local, message)
    }
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct OcrRequest<'a> {
    image_base64: String,
    language: &'a str,
    psm: u8,
    oem: u8,
    preprocessing: bool,
}

#[derive(Deserialize)]
struct OcrResponse {
    text: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    words: Vec<WireWord>,
    #[serde(default)]
    lines: Vec<WireLine>,
    language: Option<String>,
}

#[derive(Deserialize)]
struct WireWord {
    text: String,
    #[serde(default)]
    confidence: f32,
}

#[derive(Deserialize)]
struct WireLine {
    text: String,
    #[serde(default)]
    confidence: f32,
}

#[derive(Serialize)]
struct CaptionRequest<'a> {
    image_base64: String,
    language: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct CaptionResponse {
    caption: String,
    #[serde(default)]
    confidence: f32,
    model: Option<String>,
}

fn map_ocr(resp: OcrResponse) -> OcrResult {
    OcrResult {
        text: resp.text,
        confidence: resp.confidence,
        words: resp
            .words
            .into_iter()
            .map(|w| Word {
                text: w.text,
                confidence: w.confidence,
                bbox: None,
            })
            .collect(),
        lines: resp
            .lines
            .into_iter()
            .map(|l| Line::new(l.text, l.confidence))
            .collect(),
        blocks: Vec::new(),
        orientation: None,
        language: resp.language,
    }
}

fn map_caption(resp: CaptionResponse) -> CaptionResult {
    CaptionResult {
        caption: resp.caption,
        confidence: resp.confidence,
        model: resp.model,
        alternatives: Vec::new(),
        tags: Vec::new(),
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Local
    }

    async fn extract_text(
        &self,
        image: &ImageAsset,
        options: &OcrOptions,
    ) -> Result<OcrResult, ProviderFailure> {
        let language = options.language.as_deref().unwrap_or(&self.default_language);
        if !self.has_language(language) {
            return Err(Self::failure(format!(
                "language '{language}' is not installed on the local engine (available: {})",
                self.languages.join(", ")
            )));
        }
        debug!(endpoint = %self.endpoint, language, "local ocr request");
        let request = OcrRequest {
            image_base64: image.to_base64(),
            language,
            psm: options.page_segmentation.unwrap_or(self.page_segmentation),
            oem: options.engine_mode.unwrap_or(self.engine_mode),
            preprocessing: options.preprocessing.unwrap_or(self.preprocessing),
        };

        let response = self
            .http
            .post(format!("{}/ocr", self.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::failure(format!("sidecar unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(Self::failure(format!(
                "sidecar returned HTTP {}",
                response.status()
            )));
        }
        let body: OcrResponse = response
            .json()
            .await
            .map_err(|e| Self::failure(format!("malformed sidecar response: {e}")))?;
        Ok(map_ocr(body))
    }

    async fn generate_caption(
        &self,
        image: &ImageAsset,
        options: &CaptionOptions,
    ) -> Result<CaptionResult, ProviderFailure> {
        let language = options.language.as_deref().unwrap_or(&self.caption_language);
        let request = CaptionRequest {
            image_base64: image.to_base64(),
            language,
            model: options.model.as_deref(),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };

        let response = self
            .http
            .post(format!("{}/caption", self.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::failure(format!("sidecar unreachable: {e}")))?;
        if !response.status().is_success() {
            return Err(Self::failure(format!(
                "sidecar returned HTTP {}",
                response.status()
            )));
        }
        let body: CaptionResponse = response
            .json()
            .await
            .map_err(|e| Self::failure(format!("malformed sidecar response: {e}")))?;
        Ok(map_caption(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_full_ocr_response() {
        let body = r#"{
            "text": "Hello world",
            "confidence": 0.93,
            "words": [
                {"text": "Hello", "confidence": 0.95},
                {"text": "world", "confidence": 0.91}
            ],
            "lines": [{"text": "Hello world", "confidence": 0.93}],
            "language": "eng"
        }"#;
        let resp: OcrResponse = serde_json::from_str(body).unwrap();
        let result = map_ocr(resp);
        assert_eq!(result.text, "Hello world");
        assert_eq!(result.words.len(), 2);
        assert_eq!(result.lines[0].text, "Hello world");
        assert_eq!(result.language.as_deref(), Some("eng"));
    }

    #[test]
    fn missing_detail_fields_default() {
        let resp: OcrResponse = serde_json::from_str(r#"{"text": "bare"}"#).unwrap();
        let result = map_ocr(resp);
        assert_eq!(result.text, "bare");
        assert!(result.words.is_empty());
        assert!(result.language.is_none());
    }

    #[test]
    fn maps_caption_response() {
        let resp: CaptionResponse = serde_json::from_str(
            r#"{"caption": "a cat on a mat", "confidence": 0.8, "model": "blip-base"}"#,
        )
        .unwrap();
        let result = map_caption(resp);
        assert_eq!(result.caption, "a cat on a mat");
        assert_eq!(result.model.as_deref(), Some("blip-base"));
    }

    #[test]
    fn endpoint_trailing_slash_is_stripped() {
        let mut config = EngineConfig::default();
        config.local_engine_endpoint = "http://10.0.0.5:9000/".into();
        let provider = LocalProvider::new(&config, reqwest::Client::new()).unwrap();
        assert_eq!(provider.endpoint, "http://10.0.0.5:9000");
    }

    #[test]
    fn empty_language_list_is_rejected_at_construction() {
        let mut config = EngineConfig::default();
        config.local_engine_languages = Vec::new();
        let err = LocalProvider::new(&config, reqwest::Client::new()).unwrap_err();
        assert!(matches!(err, Img2TextError::Configuration(_)));
    }

    #[tokio::test]
    async fn uninstalled_language_fails_before_any_request() {
        // The language check runs before the HTTP send, so no sidecar is
        // needed to observe the rejection.
        let config = EngineConfig::default(); // eng + fra
        let provider = LocalProvider::new(&config, reqwest::Client::new()).unwrap();
        let image = ImageAsset {
            bytes: vec![1, 2, 3],
            mime_type: "image/png".into(),
            size_bytes: 3,
            format: "png".into(),
        };
        let options = OcrOptions {
            language: Some("jpn".into()),
            ..Default::default()
        };
        let err = provider.extract_text(&image, &options).await.unwrap_err();
        assert_eq!(err.provider, ProviderId::Local);
        assert!(err.message.contains("jpn"));
        assert!(err.message.contains("eng"));
    }

    #[test]
    fn language_check_is_case_insensitive() {
        let config = EngineConfig::default();
        let provider = LocalProvider::new(&config, reqwest::Client::new()).unwrap();
        assert!(provider.has_language("ENG"));
        assert!(!provider.has_language("deu"));
    }
}
