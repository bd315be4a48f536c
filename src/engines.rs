//! Adapter traits for the models the pipeline drives.
//!
//! The crate ships no vision-model bindings. Layout detection, text
//! recognition and formula recognition are consumed through object-safe
//! traits, injected as `Arc<dyn …>` and called from blocking contexts
//! only (they are expected to be CPU-heavy). The chat model behind
//! question synthesis goes through the same kind of seam, async since it
//! is network-bound. Embedders wire up real models; tests wire up
//! deterministic stubs.

use std::sync::Arc;

use futures::future::BoxFuture;
use image::RgbImage;
use thiserror::Error;

use crate::model::Region;

/// Failure inside a vision engine, carried as its display text.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(msg: impl Into<String>) -> Self {
        EngineError(msg.into())
    }
}

/// Detects labeled layout regions on a full page image.
pub trait LayoutDetector: Send + Sync {
    /// Run detection on the image at `image_path` and return its regions
    /// in reading order.
    fn detect(&self, image_path: &std::path::Path) -> Result<Vec<Region>, EngineError>;
}

/// Recognizes plain text lines inside a cropped region.
pub trait TextRecognizer: Send + Sync {
    /// Returns recognized lines in order; an empty vec is a valid result
    /// for a blank crop.
    fn recognize(&self, crop: &RgbImage) -> Result<Vec<String>, EngineError>;
}

/// Recognizes a formula crop as LaTeX.
pub trait FormulaRecognizer: Send + Sync {
    /// Returns LaTeX strings; usually one per crop.
    fn recognize(&self, crop: &RgbImage) -> Result<Vec<String>, EngineError>;
}

/// A chat-completion backend bound to one model, driven by the question
/// synthesizer.
///
/// Returns a boxed future so the trait stays object-safe; production
/// wires an LLM provider behind it, tests wire canned responses.
pub trait ChatModel: Send + Sync {
    /// Model identifier recorded in question-file metadata.
    fn model_name(&self) -> &str;

    /// One chat call: system prompt and user prompt in, raw response
    /// text out.
    fn complete<'a>(
        &'a self,
        system: &'a str,
        user: &'a str,
        temperature: f32,
        max_tokens: usize,
    ) -> BoxFuture<'a, Result<String, EngineError>>;
}

/// The three engines bundled for injection.
#[derive(Clone)]
pub struct Engines {
    pub layout: Arc<dyn LayoutDetector>,
    pub text: Arc<dyn TextRecognizer>,
    pub formula: Arc<dyn FormulaRecognizer>,
}

impl Engines {
    pub fn new(
        layout: Arc<dyn LayoutDetector>,
        text: Arc<dyn TextRecognizer>,
        formula: Arc<dyn FormulaRecognizer>,
    ) -> Self {
        Self {
            layout,
            text,
            formula,
        }
    }
}

impl std::fmt::Debug for Engines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engines")
            .field("layout", &"<dyn LayoutDetector>")
            .field("text", &"<dyn TextRecognizer>")
            .field("formula", &"<dyn FormulaRecognizer>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RegionLabel;

    struct FixedDetector;

    impl LayoutDetector for FixedDetector {
        fn detect(&self, _: &std::path::Path) -> Result<Vec<Region>, EngineError> {
            Ok(vec![Region::new(RegionLabel::Text, [0.0, 0.0, 10.0, 10.0])])
        }
    }

    struct EchoRecognizer(&'static str);

    impl TextRecognizer for EchoRecognizer {
        fn recognize(&self, _: &RgbImage) -> Result<Vec<String>, EngineError> {
            Ok(vec![self.0.to_string()])
        }
    }

    impl FormulaRecognizer for EchoRecognizer {
        fn recognize(&self, _: &RgbImage) -> Result<Vec<String>, EngineError> {
            Ok(vec![self.0.to_string()])
        }
    }

    #[test]
    fn engines_bundle_is_usable_through_trait_objects() {
        let engines = Engines::new(
            Arc::new(FixedDetector),
            Arc::new(EchoRecognizer("hello")),
            Arc::new(EchoRecognizer("x^2")),
        );
        let regions = engines.layout.detect(std::path::Path::new("p.jpg")).unwrap();
        assert_eq!(regions.len(), 1);

        let crop = RgbImage::new(4, 4);
        assert_eq!(engines.text.recognize(&crop).unwrap(), vec!["hello"]);
        assert_eq!(engines.formula.recognize(&crop).unwrap(), vec!["x^2"]);

        let dbg = format!("{:?}", engines);
        assert!(dbg.contains("LayoutDetector"));
    }

    #[test]
    fn engine_error_displays_its_message() {
        let e = EngineError::new("model not loaded");
        assert_eq!(e.to_string(), "model not loaded");
    }

    struct CannedChat;

    impl ChatModel for CannedChat {
        fn model_name(&self) -> &str {
            "canned-1"
        }

        fn complete<'a>(
            &'a self,
            _system: &'a str,
            user: &'a str,
            _temperature: f32,
            _max_tokens: usize,
        ) -> BoxFuture<'a, Result<String, EngineError>> {
            Box::pin(async move { Ok(format!("echo: {user}")) })
        }
    }

    #[tokio::test]
    async fn chat_model_is_usable_through_a_trait_object() {
        let model: Arc<dyn ChatModel> = Arc::new(CannedChat);
        assert_eq!(model.model_name(), "canned-1");
        let out = model.complete("sys", "hi", 0.3, 100).await.unwrap();
        assert_eq!(out, "echo: hi");
    }
}
