//! Layout detection, with on-disk caching per page.
//!
//! Detection results are written next to the page under `json/` so an
//! interrupted batch can resume without re-running the detector. A cached
//! file that no longer parses is treated as stale and regenerated.
//!
//! [`detect_batch`] is the pipeline stage: it runs the detector over
//! every page image of every document, leaving one layout file per page
//! for the extraction walk to pick up. Blocking; the orchestrator runs
//! it through a task handle.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::engines::LayoutDetector;
use crate::error::DeckError;
use crate::model::PageLayout;
use crate::storage::StoragePaths;

/// Detect (or load) the layout of every page of every document in the
/// batch. Returns the number of pages with a layout file.
///
/// A detector error is fatal: if the model cannot run, every remaining
/// page would fail the same way.
pub fn detect_batch(storage: &StoragePaths, detector: &dyn LayoutDetector) -> Result<usize, DeckError> {
    let mut pages = 0;
    for doc in storage.document_names() {
        pages += detect_document(&doc, storage, detector)?;
    }
    Ok(pages)
}

/// Run layout detection over every page image of one document, writing
/// one layout file per page. Returns the number of pages covered.
pub fn detect_document(
    doc: &str,
    storage: &StoragePaths,
    detector: &dyn LayoutDetector,
) -> Result<usize, DeckError> {
    let images = list_page_images(&storage.doc_images_dir(doc));
    if images.is_empty() {
        warn!("'{}' has no page images, skipping layout detection", doc);
        return Ok(0);
    }
    for image in &images {
        let name = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let layout_path = storage.layout_path(doc, &name);
        detect_or_load(image, &layout_path, detector)?;
    }
    info!("Detected layout for {} page(s) of '{}'", images.len(), doc);
    Ok(images.len())
}

/// Load the cached layout for a page image, or run the detector and
/// persist the result.
///
/// Detected regions that do not already name their source page are
/// stamped with the page image's file name.
pub fn detect_or_load(
    image_path: &Path,
    layout_path: &Path,
    detector: &dyn LayoutDetector,
) -> Result<PageLayout, DeckError> {
    if layout_path.exists() {
        match load_layout(layout_path) {
            Ok(layout) => {
                debug!("Reusing cached layout: {}", layout_path.display());
                return Ok(layout);
            }
            Err(detail) => {
                warn!(
                    "Cached layout {} unreadable ({}), re-running detection",
                    layout_path.display(),
                    detail
                );
            }
        }
    }

    let mut boxes = detector
        .detect(image_path)
        .map_err(|e| DeckError::LayoutDetection {
            image: image_path.to_path_buf(),
            detail: e.to_string(),
        })?;
    if let Some(name) = image_path.file_name().map(|n| n.to_string_lossy().into_owned()) {
        for region in &mut boxes {
            region.source_page.get_or_insert_with(|| name.clone());
        }
    }
    debug!(
        "Detected {} regions in {}",
        boxes.len(),
        image_path.display()
    );

    let layout = PageLayout {
        input_path: Some(image_path.display().to_string()),
        boxes,
    };
    save_layout(&layout, layout_path)?;
    Ok(layout)
}

fn load_layout(path: &Path) -> Result<PageLayout, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&raw).map_err(|e| e.to_string())
}

/// Page images under `dir`, lexicographically sorted. A missing
/// directory is an empty document, not an error.
fn list_page_images(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut images: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| matches!(e.to_lowercase().as_str(), "jpg" | "jpeg" | "png"))
                .unwrap_or(false)
        })
        .collect();
    images.sort();
    images
}

fn save_layout(layout: &PageLayout, path: &Path) -> Result<(), DeckError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| DeckError::OutputWriteFailed {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let json = serde_json::to_string_pretty(layout)
        .map_err(|e| DeckError::Internal(format!("layout serialization failed: {}", e)))?;
    std::fs::write(path, json).map_err(|e| DeckError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    debug!(
        "Saved layout: {} ({} boxes)",
        path.display(),
        layout.boxes.len()
    );
    Ok(())
}
