//! Vision backends behind a common [`Provider`] trait.
//!
//! The engine never talks to a vendor API directly; it dispatches through
//! `Arc<dyn Provider>` handles resolved once at initialisation. That keeps
//! vendor quirks (auth schemes, wire formats, polling) inside one module
//! each, and lets tests substitute a scripted provider via
//! [`ProviderId::Custom`] without any network.
//!
//! Native document analysis is a separate capability: most backends can only
//! OCR, so [`Provider::document_analysis`] returns `None` by default and the
//! engine falls back to heuristic structure recovery over the OCR text.

use crate::config::EngineConfig;
use crate::error::{Img2TextError, ProviderFailure};
use crate::options::{CaptionOptions, DocumentOptions, OcrOptions, OperationKind};
use crate::output::{CaptionResult, DocumentResult, OcrResult};
use crate::pipeline::validate::ImageAsset;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub mod azure;
pub mod custom;
pub mod google;
pub mod local;
pub mod openai;

/// Identifies a backend. Serialises to its lowercase wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// Self-hosted OCR/captioning sidecar, no credentials needed.
    Local,
    /// Google Cloud Vision.
    Google,
    /// Azure AI Vision (the only backend with native document analysis).
    Azure,
    /// OpenAI-compatible vision-language model endpoint.
    OpenAi,
    /// Caller-supplied callbacks.
    Custom,
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderId::Local => "local",
            ProviderId::Google => "google",
            ProviderId::Azure => "azure",
            ProviderId::OpenAi => "openai",
            ProviderId::Custom => "custom",
        };
        f.write_str(name)
    }
}

/// A vision backend able to extract text and generate captions.
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Whether this backend can serve `kind` at all. The engine checks this
    /// before dispatch and turns `false` into a configuration error. Every
    /// backend supports everything by default; only the callback-backed
    /// custom provider narrows it.
    fn supports(&self, _kind: OperationKind) -> bool {
        true
    }

    async fn extract_text(
        &self,
        image: &ImageAsset,
        options: &OcrOptions,
    ) -> Result<OcrResult, ProviderFailure>;

    async fn generate_caption(
        &self,
        image: &ImageAsset,
        options: &CaptionOptions,
    ) -> Result<CaptionResult, ProviderFailure>;

    /// Native document analysis, if this backend has it. The default is
    /// `None`; the engine then recovers structure heuristically from OCR
    /// output instead.
    fn document_analysis(&self) -> Option<&dyn DocumentAnalysis> {
        None
    }
}

/// Native structured-document analysis (layout, tables, key/value fields).
#[async_trait]
pub trait DocumentAnalysis: Send + Sync {
    async fn analyze_document(
        &self,
        image: &ImageAsset,
        options: &DocumentOptions,
    ) -> Result<DocumentResult, ProviderFailure>;
}

/// The two provider slots the engine dispatches through. Document analysis
/// rides on the OCR slot.
pub struct ProviderRegistry {
    pub ocr: Arc<dyn Provider>,
    pub captioning: Arc<dyn Provider>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("ocr", &self.ocr.id())
            .field("captioning", &self.captioning.id())
            .finish()
    }
}

impl ProviderRegistry {
    /// Resolve both slots from the configuration.
    ///
    /// Fails with [`Img2TextError::MissingCredentials`] when a selected
    /// cloud backend has no key configured — at initialisation, not on the
    /// first conversion call.
    pub fn from_config(config: &EngineConfig) -> Result<Self, Img2TextError> {
        let http = http_client(config.provider_timeout_secs)?;
        let ocr = build_provider(config.ocr_provider, config, &http)?;
        let captioning = if config.captioning_provider == config.ocr_provider {
            Arc::clone(&ocr)
        } else {
            build_provider(config.captioning_provider, config, &http)?
        };
        Ok(Self { ocr, captioning })
    }
}

fn build_provider(
    id: ProviderId,
    config: &EngineConfig,
    http: &reqwest::Client,
) -> Result<Arc<dyn Provider>, Img2TextError> {
    match id {
        ProviderId::Local => Ok(Arc::new(local::LocalProvider::new(config, http.clone())?)),
        ProviderId::Google => {
            let key = config.credentials.google_api_key.clone().ok_or_else(|| {
                Img2TextError::MissingCredentials {
                    provider: ProviderId::Google,
                    hint: "set credentials.google_api_key or GOOGLE_VISION_API_KEY".into(),
                }
            })?;
            Ok(Arc::new(google::GoogleVisionProvider::new(
                key,
                config,
                http.clone(),
            )))
        }
        ProviderId::Azure => {
            let key = config.credentials.azure_vision_key.clone().ok_or_else(|| {
                Img2TextError::MissingCredentials {
                    provider: ProviderId::Azure,
                    hint: "set credentials.azure_vision_key or AZURE_VISION_KEY".into(),
                }
            })?;
            let endpoint =
                config
                    .credentials
                    .azure_vision_endpoint
                    .clone()
                    .ok_or_else(|| Img2TextError::MissingCredentials {
                        provider: ProviderId::Azure,
                        hint: "set credentials.azure_vision_endpoint or AZURE_VISION_ENDPOINT"
                            .into(),
                    })?;
            Ok(Arc::new(azure::AzureVisionProvider::new(
                key,
                endpoint,
                config,
                http.clone(),
            )))
        }
        ProviderId::OpenAi => {
            let key = config.credentials.openai_api_key.clone().ok_or_else(|| {
                Img2TextError::MissingCredentials {
                    provider: ProviderId::OpenAi,
                    hint: "set credentials.openai_api_key or OPENAI_API_KEY".into(),
                }
            })?;
            Ok(Arc::new(openai::OpenAiVisionProvider::new(
                key,
                config,
                http.clone(),
            )))
        }
        ProviderId::Custom => {
            let callbacks = config.custom_callbacks.clone().ok_or_else(|| {
                Img2TextError::Configuration(
                    "the custom provider requires custom_callbacks".into(),
                )
            })?;
            Ok(Arc::new(custom::CustomProvider::new(callbacks)))
        }
    }
}

/// Shared HTTP client. The request timeout here is a transport-level
/// backstop; the engine applies its own per-operation deadline on top.
fn http_client(timeout_secs: u64) -> Result<reqwest::Client, Img2TextError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Img2TextError::Configuration(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;

    #[test]
    fn provider_id_display_is_lowercase() {
        assert_eq!(ProviderId::Local.to_string(), "local");
        assert_eq!(ProviderId::Google.to_string(), "google");
        assert_eq!(ProviderId::Azure.to_string(), "azure");
        assert_eq!(ProviderId::OpenAi.to_string(), "openai");
        assert_eq!(ProviderId::Custom.to_string(), "custom");
    }

    #[test]
    fn provider_id_serde_round_trip() {
        let json = serde_json::to_string(&ProviderId::OpenAi).unwrap();
        assert_eq!(json, "\"openai\"");
        let back: ProviderId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ProviderId::OpenAi);
    }

    #[test]
    fn google_without_key_is_missing_credentials() {
        let config = EngineConfig::builder()
            .ocr_provider(ProviderId::Google)
            .build()
            .unwrap();
        let err = ProviderRegistry::from_config(&config).unwrap_err();
        assert!(matches!(
            err,
            Img2TextError::MissingCredentials {
                provider: ProviderId::Google,
                ..
            }
        ));
    }

    #[test]
    fn azure_needs_key_and_endpoint() {
        let config = EngineConfig::builder()
            .ocr_provider(ProviderId::Azure)
            .credentials(Credentials {
                azure_vision_key: Some("k".into()),
                ..Default::default()
            })
            .build()
            .unwrap();
        let err = ProviderRegistry::from_config(&config).unwrap_err();
        assert!(matches!(err, Img2TextError::MissingCredentials { .. }));
    }

    #[test]
    fn shared_slot_reuses_the_same_provider() {
        let config = EngineConfig::default(); // both slots Local
        let registry = ProviderRegistry::from_config(&config).unwrap();
        assert!(Arc::ptr_eq(&registry.ocr, &registry.captioning));
    }
}
