//! # pdf2deck
//!
//! Turn scanned study material into flashcard decks.
//!
//! ## Why this crate?
//!
//! Scanned lecture notes and textbook pages are pictures, not text. Plain
//! OCR dumps lose the layout, mangle formulae and leave the reader with a
//! wall of words. This crate rasterises each page, detects its layout
//! regions, recognizes text and formulae per region, and has an LLM write
//! study questions for every page. The whole batch lands in one persistent
//! deck keyed by a UUID that doubles as the job id.
//!
//! ## Pipeline Overview
//!
//! ```text
//! sources (PDFs / page images)
//!  │
//!  ├─ 1. Ingest     verify media types, lay files out under the batch root
//!  ├─ 2. Rasterize  PDF pages to JPEG via pdfium (CPU-bound, blocking pool)
//!  ├─ 3. Layout     region detection per page image, cached as JSON
//!  ├─ 4. Extract    crop regions, recognize text and formulae into records
//!  ├─ 5. Synthesize questions per page via a chat model, with retry
//!  └─ 6. Unify      one deck file, images relocated, batch dir cleaned
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pdf2deck::{create_deck, AppContext, Engines, PipelineConfig, Source, StoragePaths};
//! # use pdf2deck::{EngineError, FormulaRecognizer, LayoutDetector, Region, TextRecognizer};
//! # struct Stub;
//! # impl LayoutDetector for Stub {
//! #     fn detect(&self, _: &std::path::Path) -> Result<Vec<Region>, EngineError> { Ok(vec![]) }
//! # }
//! # impl TextRecognizer for Stub {
//! #     fn recognize(&self, _: &image::RgbImage) -> Result<Vec<String>, EngineError> { Ok(vec![]) }
//! # }
//! # impl FormulaRecognizer for Stub {
//! #     fn recognize(&self, _: &image::RgbImage) -> Result<Vec<String>, EngineError> { Ok(vec![]) }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     # let (layout, text, formula): (Arc<Stub>, Arc<Stub>, Arc<Stub>) =
//!     #     (Arc::new(Stub), Arc::new(Stub), Arc::new(Stub));
//!     // Wire your layout/OCR models behind the adapter traits in
//!     // `pdf2deck::engines`; the LLM provider is auto-detected from
//!     // OPENAI_API_KEY and friends.
//!     let engines = Engines::new(layout, text, formula);
//!     let storage = StoragePaths::new("work/batch", "work/decks", "work/images");
//!     let ctx = AppContext::new(PipelineConfig::default(), storage, engines);
//!
//!     let deck_id = create_deck(
//!         &ctx,
//!         "Biology 101",
//!         vec![Source::from_arg("lecture1.pdf")],
//!     )
//!     .await?;
//!     println!("job started: {deck_id}");
//!     println!("{:?}", ctx.deck_status(&deck_id.to_string()));
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2deck` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! pdf2deck = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod context;
pub mod deck;
pub mod engines;
pub mod error;
pub mod geometry;
pub mod job;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use context::AppContext;
pub use engines::{ChatModel, EngineError, Engines, FormulaRecognizer, LayoutDetector, TextRecognizer};
pub use error::{DeckError, PageFailure};
pub use job::events::{event_channel, EventPublisher, JobEvent};
pub use job::orchestrator::{create_deck, run_pipeline};
pub use job::status::{deck_status, StatusBoard};
pub use model::{
    ChoiceOption, Deck, DeckId, DeckMetadata, DeckSummary, JobState, JobStatus, Question,
    QuestionFile, Region, RegionLabel,
};
pub use pipeline::ingest::Source;
pub use pipeline::synthesize::{ProviderChatModel, SynthesisTargets};
pub use progress::{DeckProgressCallback, NoopProgress, ProgressCallback};
pub use storage::StoragePaths;
