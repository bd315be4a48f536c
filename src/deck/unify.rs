//! Deck unification: the last pipeline stage, folding every per-page
//! question file of a batch into one deck.
//!
//! Question files are read back as raw JSON rather than typed structs
//! because earlier runs (or earlier versions) may have written slightly
//! different shapes; [`crate::pipeline::normalize`] absorbs the
//! variation. A batch that produced no usable questions still yields a
//! valid deck containing a single placeholder card.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::deck::{relocate, store};
use crate::error::DeckError;
use crate::model::{Deck, DeckId, Question};
use crate::pipeline::normalize;
use crate::storage::StoragePaths;

/// Build and persist the deck for a finished batch.
///
/// Reads every `*_questions.json` under the batch's questions directory
/// in path order, normalizes the payloads, moves question images into
/// the deck's permanent image directory and writes the deck file.
pub fn unify_deck(
    deck_id: DeckId,
    deck_name: &str,
    storage: &StoragePaths,
) -> Result<Deck, DeckError> {
    relocate::adopt_crop_images(storage, deck_id)?;

    let mut questions = collect_questions(storage);
    if questions.is_empty() {
        info!("no questions generated for deck {}, adding a placeholder", deck_id);
        questions.push(Question::placeholder());
    }
    relocate::relocate_questions(&mut questions, storage, deck_id);

    let deck = Deck::assemble(deck_id, deck_name, questions);
    store::save_deck(&deck, storage)?;
    info!(
        "Unified deck '{}' with {} question(s)",
        deck_name, deck.metadata.question_count
    );
    Ok(deck)
}

/// Gather normalized questions from every question file in the batch.
/// A file that cannot be read or parsed costs its own questions only.
fn collect_questions(storage: &StoragePaths) -> Vec<Question> {
    let mut files = question_files(&storage.questions_root());
    files.sort();

    let mut questions = Vec::new();
    for path in files {
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("cannot read question file {}: {}", path.display(), e);
                continue;
            }
        };
        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                warn!("question file {} is not JSON: {}", path.display(), e);
                continue;
            }
        };
        let payload = normalize::flatten_question_payload(&value);
        let batch = normalize::normalize_batch(&payload);
        debug!("{}: {} question(s)", path.display(), batch.len());
        questions.extend(batch);
    }
    questions
}

/// All `*_questions.json` files under `root`, any depth.
fn question_files(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with("_questions.json"))
                .unwrap_or(false)
            {
                found.push(path);
            }
        }
    }
    found
}
