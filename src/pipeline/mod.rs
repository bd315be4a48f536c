//! Pipeline stages for scanned-document-to-deck conversion.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. switch the layout backend) without touching
//! other stages.
//!
//! ## Data Flow
//!
//! ```text
//! ingest ──▶ rasterize ──▶ layout ──▶ walk ──▶ synthesize
//! (files)     (pdfium)    (regions)   (OCR)   (questions)
//! ```
//!
//! 1. [`ingest`]     verify media types, place every source in the batch
//!    layout
//! 2. [`rasterize`]  render PDF pages to JPEG via pdfium; blocking, runs on
//!    the blocking pool
//! 3. [`layout`]     detect labeled regions on each page image, cached as
//!    JSON next to the images
//! 4. [`walk`]       crop and recognize every region, write per-page
//!    extraction records ([`extract`] holds the per-page core)
//! 5. [`synthesize`] drive the chat model with retry/backoff; the only stage
//!    with network I/O ([`parse`] and [`normalize`] shape its output)
//!
//! Deck assembly from the per-page artifacts lives in [`crate::deck`].

pub mod extract;
pub mod ingest;
pub mod layout;
pub mod normalize;
pub mod parse;
pub mod rasterize;
pub mod synthesize;
pub mod walk;
