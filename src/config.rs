//! Pipeline configuration with a validating builder.

use std::fmt;
use std::sync::Arc;

use edgequake_llm::LLMProvider;

use crate::error::DeckError;

/// Environment variable overriding the per-job LLM fan-out.
pub const LLM_CONCURRENCY_ENV: &str = "PDF2DECK_LLM_CONCURRENCY";

fn default_llm_concurrency() -> usize {
    std::env::var(LLM_CONCURRENCY_ENV)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(4)
}

fn default_ocr_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(4)
}

/// Tunables for one pipeline deployment.
///
/// Construct via [`PipelineConfig::builder`]; the builder clamps each knob
/// into its sane range and `build()` re-validates the whole set.
#[derive(Clone)]
pub struct PipelineConfig {
    /// Rasterization resolution for PDF pages. Default: 350.
    pub dpi: u32,

    /// Blocking-pool fan-out for page extraction within one document.
    /// Default: `min(4, available cores)`.
    pub ocr_workers: usize,

    /// Concurrent LLM calls during question synthesis. Default: 4, or the
    /// `PDF2DECK_LLM_CONCURRENCY` environment variable.
    pub llm_concurrency: usize,

    /// Model identifier passed to the provider factory. Default: None
    /// (provider default).
    pub model: Option<String>,

    /// Provider name (`openai`, `groq`, `ollama`, …). Default: None
    /// (resolved from the environment).
    pub provider_name: Option<String>,

    /// Pre-built provider instance. Takes precedence over name/env
    /// resolution; this is the injection point for tests.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Vision-capable model used for pages that carry images. Default:
    /// None (no swap; the text model sees image paths only).
    pub vision_model: Option<String>,

    /// Sampling temperature for question synthesis. Default: 0.3.
    pub temperature: f32,

    /// Max completion tokens per synthesis call. Default: 4000.
    pub max_tokens: usize,

    /// Total LLM attempts per page, first try included. Default: 3.
    pub max_attempts: u32,

    /// Base retry delay; rate-limit failures double it per occurrence.
    /// Default: 2000.
    pub retry_base_delay_ms: u64,

    /// Overlap ratio at which a formula counts as inline within a text
    /// paragraph. Default: 0.9.
    pub containment_threshold: f32,

    /// Minimum crop edge in pixels; smaller regions are discarded.
    /// Default: 10.
    pub min_crop_px: u32,

    /// Download timeout for URL sources in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Cleanup prunes surviving batch files larger than this. Default: 50.
    pub large_file_limit_mb: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 350,
            ocr_workers: default_ocr_workers(),
            llm_concurrency: default_llm_concurrency(),
            model: None,
            provider_name: None,
            provider: None,
            vision_model: None,
            temperature: 0.3,
            max_tokens: 4000,
            max_attempts: 3,
            retry_base_delay_ms: 2000,
            containment_threshold: 0.9,
            min_crop_px: 10,
            download_timeout_secs: 120,
            large_file_limit_mb: 50,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("dpi", &self.dpi)
            .field("ocr_workers", &self.ocr_workers)
            .field("llm_concurrency", &self.llm_concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("vision_model", &self.vision_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_attempts", &self.max_attempts)
            .field("retry_base_delay_ms", &self.retry_base_delay_ms)
            .field("containment_threshold", &self.containment_threshold)
            .field("min_crop_px", &self.min_crop_px)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("large_file_limit_mb", &self.large_file_limit_mb)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn ocr_workers(mut self, n: usize) -> Self {
        self.config.ocr_workers = n.max(1);
        self
    }

    pub fn llm_concurrency(mut self, n: usize) -> Self {
        self.config.llm_concurrency = n.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn vision_model(mut self, model: impl Into<String>) -> Self {
        self.config.vision_model = Some(model.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.max(1);
        self
    }

    pub fn retry_base_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_base_delay_ms = ms;
        self
    }

    pub fn containment_threshold(mut self, t: f32) -> Self {
        self.config.containment_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn min_crop_px(mut self, px: u32) -> Self {
        self.config.min_crop_px = px;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn large_file_limit_mb(mut self, mb: u64) -> Self {
        self.config.large_file_limit_mb = mb;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, DeckError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(DeckError::InvalidConfig(format!(
                "DPI must be 72-600, got {}",
                c.dpi
            )));
        }
        if c.llm_concurrency == 0 || c.ocr_workers == 0 {
            return Err(DeckError::InvalidConfig("Worker counts must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&c.containment_threshold) {
            return Err(DeckError::InvalidConfig(format!(
                "Containment threshold must be within 0.0-1.0, got {}",
                c.containment_threshold
            )));
        }
        Ok(self.config)
    }
}
