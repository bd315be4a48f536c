//! Question images outlive the batch directory: crops are adopted into
//! the deck's permanent image directory and every `img_path` is rewritten
//! to point there.
//!
//! The permanent home is a single canonical location,
//! `{images_root}/{deck_id}/ocr_results/<file>`. Relocation is
//! idempotent: paths already under that directory are left alone, so
//! re-running a deck build never shuffles images around.

use std::path::Path;

use tracing::{debug, warn};

use crate::error::DeckError;
use crate::model::{DeckId, Question};
use crate::storage::StoragePaths;

/// Copy every crop image under each document's `ocr_results/` into the
/// deck's permanent image directory.
///
/// Runs once per deck before paths are rewritten, so the rewrite step
/// only has to look in one place. Returns the number of files copied.
pub fn adopt_crop_images(storage: &StoragePaths, deck_id: DeckId) -> Result<usize, DeckError> {
    let dest = storage.deck_ocr_images_dir(deck_id);
    std::fs::create_dir_all(&dest).map_err(|e| DeckError::OutputWriteFailed {
        path: dest.clone(),
        source: e,
    })?;

    let mut copied = 0usize;
    let Ok(docs) = std::fs::read_dir(storage.batch_root()) else {
        return Ok(0);
    };
    for doc in docs.filter_map(|e| e.ok()) {
        let doc_name = doc.file_name().to_string_lossy().into_owned();
        let ocr_dir = storage.doc_ocr_dir(&doc_name);
        let Ok(entries) = std::fs::read_dir(&ocr_dir) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !is_image(&path) {
                continue;
            }
            let target = dest.join(entry.file_name());
            if target.exists() {
                continue;
            }
            match std::fs::copy(&path, &target) {
                Ok(_) => copied += 1,
                Err(e) => warn!("cannot adopt crop {}: {}", path.display(), e),
            }
        }
    }
    debug!("adopted {} crop image(s) into {}", copied, dest.display());
    Ok(copied)
}

/// Rewrite every question's `img_path` to the deck's permanent image
/// directory. Images that cannot be found anywhere are dropped rather
/// than shipped as dangling paths.
pub fn relocate_questions(questions: &mut [Question], storage: &StoragePaths, deck_id: DeckId) {
    for question in questions.iter_mut() {
        relocate_one(question, storage, deck_id);
    }
}

fn relocate_one(question: &mut Question, storage: &StoragePaths, deck_id: DeckId) {
    let Some(current) = question.img_path().map(str::to_string) else {
        return;
    };
    let path = Path::new(&current);

    if storage.is_under_deck_images(path, deck_id) && path.exists() {
        return;
    }

    let Some(name) = path.file_name() else {
        warn!("dropping unusable image path: {}", current);
        *question.img_path_mut() = None;
        return;
    };
    let target = storage.deck_ocr_images_dir(deck_id).join(name);

    if !target.exists() && path.exists() {
        // Not covered by the bulk adoption pass; copy it directly.
        if let Some(parent) = target.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::copy(path, &target) {
            warn!("cannot copy {} into the deck: {}", current, e);
        }
    }

    if target.exists() {
        *question.img_path_mut() = Some(target.display().to_string());
    } else {
        warn!("question image not found, dropping: {}", current);
        *question.img_path_mut() = None;
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_lowercase().as_str(), "png" | "jpg" | "jpeg"))
        .unwrap_or(false)
}
