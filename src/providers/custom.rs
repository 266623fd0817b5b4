//! Caller-supplied backend: plug in your own async callbacks.
//!
//! Each operation slot is optional — a deployment that only needs OCR can
//! supply just `extract_text`. Invoking an operation whose callback is
//! absent fails with a provider error rather than panicking, and native
//! document analysis is only advertised when an `analyze_document` callback
//! exists, so the engine's heuristic fallback still applies otherwise.

use crate::error::ProviderFailure;
use crate::options::{CaptionOptions, DocumentOptions, OcrOptions, OperationKind};
use crate::output::{CaptionResult, DocumentResult, OcrResult};
use crate::pipeline::validate::ImageAsset;
use crate::providers::{DocumentAnalysis, Provider, ProviderId};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;

pub type OcrCallback = Box<
    dyn Fn(ImageAsset, OcrOptions) -> BoxFuture<'static, Result<OcrResult, ProviderFailure>>
        + Send
        + Sync,
>;

pub type CaptionCallback = Box<
    dyn Fn(
            ImageAsset,
            CaptionOptions,
        ) -> BoxFuture<'static, Result<CaptionResult, ProviderFailure>>
        + Send
        + Sync,
>;

pub type DocumentCallback = Box<
    dyn Fn(
            ImageAsset,
            DocumentOptions,
        ) -> BoxFuture<'static, Result<DocumentResult, ProviderFailure>>
        + Send
        + Sync,
>;

/// The callback set backing [`ProviderId::Custom`].
#[derive(Default)]
pub struct CustomCallbacks {
    pub extract_text: Option<OcrCallback>,
    pub generate_caption: Option<CaptionCallback>,
    pub analyze_document: Option<DocumentCallback>,
}

impl CustomCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extract_text<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ImageAsset, OcrOptions) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<OcrResult, ProviderFailure>> + Send + 'static,
    {
        self.extract_text = Some(Box::new(move |image, options| f(image, options).boxed()));
        self
    }

    pub fn with_generate_caption<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ImageAsset, CaptionOptions) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<CaptionResult, ProviderFailure>> + Send + 'static,
    {
        self.generate_caption = Some(Box::new(move |image, options| f(image, options).boxed()));
        self
    }

    pub fn with_analyze_document<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ImageAsset, DocumentOptions) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<DocumentResult, ProviderFailure>> + Send + 'static,
    {
        self.analyze_document = Some(Box::new(move |image, options| f(image, options).boxed()));
        self
    }
}

pub struct CustomProvider {
    callbacks: Arc<CustomCallbacks>,
}

impl CustomProvider {
    pub fn new(callbacks: Arc<CustomCallbacks>) -> Self {
        Self { callbacks }
    }

    fn missing(operation: &str) -> ProviderFailure {
        ProviderFailure::new(
            ProviderId::Custom,
            format!("no {operation} callback configured"),
        )
    }
}

#[async_trait]
impl Provider for CustomProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Custom
    }

    fn supports(&self, kind: OperationKind) -> bool {
        match kind {
            OperationKind::Ocr => self.callbacks.extract_text.is_some(),
            OperationKind::Caption => self.callbacks.generate_caption.is_some(),
            // Document analysis can ride on OCR: without a dedicated
            // callback the engine recovers structure from extracted text.
            OperationKind::Document => {
                self.callbacks.analyze_document.is_some() || self.callbacks.extract_text.is_some()
            }
        }
    }

    async fn extract_text(
        &self,
        image: &ImageAsset,
        options: &OcrOptions,
    ) -> Result<OcrResult, ProviderFailure> {
        match &self.callbacks.extract_text {
            Some(f) => f(image.clone(), options.clone()).await,
            None => Err(Self::missing("extract_text")),
        }
    }

    async fn generate_caption(
        &self,
        image: &ImageAsset,
        options: &CaptionOptions,
    ) -> Result<CaptionResult, ProviderFailure> {
        match &self.callbacks.generate_caption {
            Some(f) => f(image.clone(), options.clone()).await,
            None => Err(Self::missing("generate_caption")),
        }
    }

    fn document_analysis(&self) -> Option<&dyn DocumentAnalysis> {
        // Only advertise the capability when a callback is wired up; the
        // engine otherwise falls back to heuristic structure recovery.
        self.callbacks
            .analyze_document
            .as_ref()
            .map(|_| self as &dyn DocumentAnalysis)
    }
}

#[async_trait]
impl DocumentAnalysis for CustomProvider {
    async fn analyze_document(
        &self,
        image: &ImageAsset,
        options: &DocumentOptions,
    ) -> Result<DocumentResult, ProviderFailure> {
        match &self.callbacks.analyze_document {
            Some(f) => f(image.clone(), options.clone()).await,
            None => Err(Self::missing("analyze_document")),
        }
    }
}
