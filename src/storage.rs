//! The directory contract: every path the pipeline reads or writes is
//! assembled here, nowhere else.
//!
//! Working layout under the batch root `B`:
//!
//! ```text
//! B/<doc>/images/page_<n>.jpg           rasterized or adopted page images
//! B/<doc>/json/<image_name>.json        layout detection output
//! B/<doc>/ocr_results/<stem>_processed.json
//! B/<doc>/ocr_results/<stem>_<label>_<n>.png
//! B/questions/<doc>/<stem>_questions.json
//! ```
//!
//! Permanent storage:
//!
//! ```text
//! {decks_root}/{deck_id}.json
//! {images_root}/{deck_id}/...           relocated crops (ocr_results/ mirrored)
//! ```

use std::path::{Path, PathBuf};

use crate::model::DeckId;

/// Directory name reserved for per-document question files inside a batch.
pub const QUESTIONS_DIR: &str = "questions";

/// Subdirectory of each document that holds extraction output.
pub const OCR_RESULTS_DIR: &str = "ocr_results";

/// Root directories for one pipeline deployment.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    batch_root: PathBuf,
    decks_root: PathBuf,
    images_root: PathBuf,
}

impl StoragePaths {
    pub fn new(
        batch_root: impl Into<PathBuf>,
        decks_root: impl Into<PathBuf>,
        images_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            batch_root: batch_root.into(),
            decks_root: decks_root.into(),
            images_root: images_root.into(),
        }
    }

    /// Transient working directory for in-flight batches.
    pub fn batch_root(&self) -> &Path {
        &self.batch_root
    }

    /// Permanent home of finished deck files.
    pub fn decks_root(&self) -> &Path {
        &self.decks_root
    }

    /// Permanent home of relocated question images.
    pub fn images_root(&self) -> &Path {
        &self.images_root
    }

    // ── Batch layout ──────────────────────────────────────────────────────

    /// Document directories currently in the batch, sorted, excluding the
    /// reserved `questions/` subdirectory. A missing batch root yields
    /// an empty list.
    pub fn document_names(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.batch_root) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| name != QUESTIONS_DIR)
            .collect();
        names.sort();
        names
    }

    pub fn doc_dir(&self, doc: &str) -> PathBuf {
        self.batch_root.join(doc)
    }

    pub fn doc_images_dir(&self, doc: &str) -> PathBuf {
        self.doc_dir(doc).join("images")
    }

    pub fn doc_json_dir(&self, doc: &str) -> PathBuf {
        self.doc_dir(doc).join("json")
    }

    pub fn doc_ocr_dir(&self, doc: &str) -> PathBuf {
        self.doc_dir(doc).join(OCR_RESULTS_DIR)
    }

    pub fn questions_root(&self) -> PathBuf {
        self.batch_root.join(QUESTIONS_DIR)
    }

    pub fn doc_questions_dir(&self, doc: &str) -> PathBuf {
        self.questions_root().join(doc)
    }

    /// `page_<n>.jpg`, 1-based.
    pub fn page_image_name(page: usize) -> String {
        format!("page_{page}.jpg")
    }

    /// `<image_name>.json` (full image name, extension kept) inside the
    /// document's `json/` directory.
    pub fn layout_path(&self, doc: &str, image_name: &str) -> PathBuf {
        self.doc_json_dir(doc).join(format!("{image_name}.json"))
    }

    /// `<image_stem>_processed.json` inside the document's `ocr_results/`.
    pub fn record_path(&self, doc: &str, image_stem: &str) -> PathBuf {
        self.doc_ocr_dir(doc).join(format!("{image_stem}_processed.json"))
    }

    /// `<record_stem>_questions.json` inside the document's questions dir.
    pub fn question_file_path(&self, doc: &str, record_stem: &str) -> PathBuf {
        self.doc_questions_dir(doc)
            .join(format!("{record_stem}_questions.json"))
    }

    // ── Permanent layout ──────────────────────────────────────────────────

    pub fn deck_file(&self, deck_id: DeckId) -> PathBuf {
        self.decks_root.join(format!("{deck_id}.json"))
    }

    pub fn deck_images_dir(&self, deck_id: DeckId) -> PathBuf {
        self.images_root.join(deck_id.to_string())
    }

    pub fn deck_ocr_images_dir(&self, deck_id: DeckId) -> PathBuf {
        self.deck_images_dir(deck_id).join(OCR_RESULTS_DIR)
    }

    /// Whether `path` already lives under the deck's permanent image dir.
    pub fn is_under_deck_images(&self, path: &Path, deck_id: DeckId) -> bool {
        path.starts_with(self.deck_images_dir(deck_id))
    }
}
