//! Error types for the deck-building pipeline.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`DeckError`] is **fatal**: the job cannot proceed at all (rejected
//!   sources, rasterization failure, no LLM provider). A job that hits one
//!   is marked `failed` and its working directory is preserved.
//!
//! * [`PageFailure`] is **non-fatal**: a single page dropped out (recognizer
//!   glitch, exhausted LLM retries) while the rest of the batch is fine.
//!   Collected into run summaries so callers can inspect partial success
//!   instead of losing a whole deck to one bad page.

use std::path::PathBuf;

use thiserror::Error;

/// All fatal errors returned by the deck pipeline.
///
/// Page-level failures use [`PageFailure`] and are collected in run
/// summaries rather than propagated here.
#[derive(Debug, Error)]
pub enum DeckError {
    // ── Source errors (rejected before any job state exists) ──────────────
    /// Deck creation was requested with an empty source list.
    #[error("No source files provided")]
    NoSources,

    /// A source file arrived without a usable name.
    #[error("Invalid file name: '{name}'")]
    InvalidFileName { name: String },

    /// A source file's media type is outside the accepted set.
    #[error("Unsupported media type '{mime}' for '{name}'\nAccepted: application/pdf, image/jpeg, image/png, image/jpg")]
    UnsupportedMediaType { name: String, mime: String },

    /// Local source path was not found.
    #[error("Source file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// HTTP URL was syntactically valid but the download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {timeout_secs}s for '{url}'")]
    DownloadTimeout { url: String, timeout_secs: u64 },

    /// The file exists and was read, but does not start with the PDF magic.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── Stage errors ──────────────────────────────────────────────────────
    /// pdfium could not open the document.
    #[error("Cannot open PDF '{path}': {detail}")]
    PdfOpenFailed { path: PathBuf, detail: String },

    /// pdfium failed to render one page.
    #[error("Rasterization failed on page {page}: {detail}")]
    RasterizationFailed { page: usize, detail: String },

    /// The layout detector failed on a page image.
    #[error("Layout detection failed for '{image}': {detail}")]
    LayoutDetection { image: PathBuf, detail: String },

    /// No LLM provider could be resolved from config or environment.
    #[error("LLM provider '{provider}' not configured. {hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Writing an output artifact failed.
    #[error("Failed to write output to '{path}'")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Setup errors ──────────────────────────────────────────────────────
    /// Configuration rejected by validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The PDFium library could not be located or loaded.
    #[error("PDFium binding failed: {0}\nSet PDFIUM_LIB_PATH or allow the automatic download.")]
    PdfiumBindingFailed(String),

    /// Unexpected internal failure (task panics and similar).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A single page that failed without taking the job down.
///
/// `Clone + Serialize` so run summaries can carry failures across task
/// boundaries and into persisted reports.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageFailure {
    /// Region extraction raised for the whole page.
    #[error("Extraction failed for {page}: {detail}")]
    Extraction { page: String, detail: String },

    /// Question synthesis exhausted its attempts or hit a hard failure.
    #[error("Synthesis failed for {page} after {attempts} attempt(s): {detail}")]
    Synthesis {
        page: String,
        attempts: u32,
        detail: String,
    },

    /// The extraction record held neither text nor usable images.
    #[error("No usable content in {page}")]
    NoContent { page: String },
}

impl PageFailure {
    /// The page artifact this failure refers to.
    pub fn page(&self) -> &str {
        match self {
            PageFailure::Extraction { page, .. } => page,
            PageFailure::Synthesis { page, .. } => page,
            PageFailure::NoContent { page } => page,
        }
    }
}
