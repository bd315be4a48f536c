//! The document walker: drive region extraction across every laid-out
//! page of the batch.
//!
//! The walk is driven by the layout files the detection stage left under
//! each document's `json/` directory. A layout without a matching page
//! image is skipped with a warning, as is a document missing its
//! `images/` or `json/` directory; the rest of the batch continues. An
//! existing extraction record skips its page outright, so interrupted
//! batches resume for free. Records are written to a temp file and
//! renamed so a crash never leaves a half-written record behind.
//!
//! Pages run concurrently on the blocking pool, `ocr_workers` at a time;
//! documents run in sequence.

use std::path::Path;

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::engines::Engines;
use crate::error::{DeckError, PageFailure};
use crate::model::ExtractionRecord;
use crate::pipeline::{extract, layout};
use crate::progress::ProgressCallback;
use crate::storage::StoragePaths;

/// What a walk produced.
#[derive(Debug, Default)]
pub struct WalkSummary {
    /// Document directories visited.
    pub documents: usize,
    /// Pages listed in the documents' `json/` directories.
    pub pages_total: usize,
    /// Records written by this walk.
    pub records_written: usize,
    /// Records that already existed and were skipped.
    pub records_existing: usize,
    /// Pages that failed extraction, with reasons.
    pub failures: Vec<PageFailure>,
}

impl WalkSummary {
    /// Pages with a usable record after the walk, new or resumed.
    pub fn records_available(&self) -> usize {
        self.records_written + self.records_existing
    }

    fn absorb(&mut self, other: WalkSummary) {
        self.documents += other.documents;
        self.pages_total += other.pages_total;
        self.records_written += other.records_written;
        self.records_existing += other.records_existing;
        self.failures.extend(other.failures);
    }
}

enum PageOutcome {
    Written { page: String },
    Failed(PageFailure),
}

/// Walk every document of the batch in sequence.
///
/// A missing batch root is a logged no-op, not an error.
pub async fn walk_batch(
    storage: &StoragePaths,
    engines: &Engines,
    config: &PipelineConfig,
    progress: &ProgressCallback,
) -> Result<WalkSummary, DeckError> {
    if !storage.batch_root().is_dir() {
        error!(
            "Batch root {} does not exist, nothing to walk",
            storage.batch_root().display()
        );
        return Ok(WalkSummary::default());
    }

    let docs = storage.document_names();
    info!("Walking {} document(s)", docs.len());

    let mut total = WalkSummary::default();
    for doc in docs {
        total.absorb(walk_document(&doc, storage, engines, config, progress).await?);
    }
    Ok(total)
}

/// Extract every laid-out page of `doc`, producing one record per page
/// that survives.
///
/// Page-level extraction failures are collected in the summary. A layout
/// detector failure aborts the walk: if the detector is broken, every
/// remaining page would fail the same way.
pub async fn walk_document(
    doc: &str,
    storage: &StoragePaths,
    engines: &Engines,
    config: &PipelineConfig,
    progress: &ProgressCallback,
) -> Result<WalkSummary, DeckError> {
    let json_dir = storage.doc_json_dir(doc);
    let images_dir = storage.doc_images_dir(doc);
    if !json_dir.is_dir() || !images_dir.is_dir() {
        warn!("Skipping '{}': missing images/ or json/ directory", doc);
        return Ok(WalkSummary {
            documents: 1,
            ..WalkSummary::default()
        });
    }

    let layouts = list_layout_names(&json_dir);
    info!("Walking '{}': {} laid-out page(s)", doc, layouts.len());

    let mut summary = WalkSummary {
        documents: 1,
        pages_total: layouts.len(),
        ..WalkSummary::default()
    };

    let mut pending = Vec::new();
    for layout_name in layouts {
        let Some(image_name) = layout_name.strip_suffix(".json") else {
            continue;
        };
        let image_path = images_dir.join(image_name);
        if !image_path.is_file() {
            warn!("Layout {} has no matching page image, skipping", layout_name);
            continue;
        }
        if storage.record_path(doc, &file_stem(&image_path)).exists() {
            debug!("record exists for {}, skipping", image_name);
            summary.records_existing += 1;
            continue;
        }
        pending.push(image_path);
    }

    let outcomes: Vec<Result<PageOutcome, DeckError>> = stream::iter(pending)
        .map(|image| {
            let doc = doc.to_string();
            let storage = storage.clone();
            let engines = engines.clone();
            let config = config.clone();
            let progress = progress.clone();
            async move {
                let task_doc = doc.clone();
                let outcome = tokio::task::spawn_blocking(move || {
                    process_page(&task_doc, &image, &storage, &engines, &config)
                })
                .await
                .map_err(|e| DeckError::Internal(format!("Page task panicked: {}", e)))??;

                match &outcome {
                    PageOutcome::Written { page } => progress.on_page_extracted(&doc, page),
                    PageOutcome::Failed(failure) => {
                        progress.on_page_failed(failure.page(), &failure.to_string())
                    }
                }
                Ok(outcome)
            }
        })
        .buffer_unordered(config.ocr_workers.max(1))
        .collect()
        .await;

    for outcome in outcomes {
        match outcome? {
            PageOutcome::Written { .. } => summary.records_written += 1,
            PageOutcome::Failed(failure) => {
                warn!("{}", failure);
                summary.failures.push(failure);
            }
        }
    }

    info!(
        "Walked '{}': {} written, {} resumed, {} failed",
        doc,
        summary.records_written,
        summary.records_existing,
        summary.failures.len()
    );
    Ok(summary)
}

/// One page's full extraction pass. Runs on the blocking pool.
///
/// The layout load goes back through the detector when the cached file
/// is corrupt, so a truncated layout costs a re-detection, not the page.
fn process_page(
    doc: &str,
    image_path: &Path,
    storage: &StoragePaths,
    engines: &Engines,
    config: &PipelineConfig,
) -> Result<PageOutcome, DeckError> {
    let image_name = file_name(image_path);
    let stem = file_stem(image_path);

    let layout_path = storage.layout_path(doc, &image_name);
    let page_layout = layout::detect_or_load(image_path, &layout_path, engines.layout.as_ref())?;

    let ocr_dir = storage.doc_ocr_dir(doc);
    match extract::extract_page(image_path, &page_layout, &ocr_dir, engines, config) {
        Ok(record) => {
            write_record(&record, &storage.record_path(doc, &stem))?;
            Ok(PageOutcome::Written { page: image_name })
        }
        Err(detail) => Ok(PageOutcome::Failed(PageFailure::Extraction {
            page: image_name,
            detail,
        })),
    }
}

/// Atomic record write: temp file in the same directory, then rename.
fn write_record(record: &ExtractionRecord, path: &Path) -> Result<(), DeckError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| DeckError::OutputWriteFailed {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| DeckError::Internal(format!("record serialization failed: {}", e)))?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| DeckError::OutputWriteFailed {
        path: tmp.clone(),
        source: e,
    })?;
    std::fs::rename(&tmp, path).map_err(|e| DeckError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    debug!("Wrote record {}", path.display());
    Ok(())
}

/// Layout file names under `dir`, lexicographically sorted.
fn list_layout_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|n| n.ends_with(".json"))
        .collect();
    names.sort();
    names
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
