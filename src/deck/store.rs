//! Deck persistence: one pretty-printed JSON file per deck under
//! `{decks_root}/{deck_id}.json`, written atomically so a crash mid-save
//! never leaves a partial deck behind.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::error::DeckError;
use crate::model::{Deck, DeckId};
use crate::storage::StoragePaths;

/// Write the deck to its canonical location and return the path.
///
/// The path is always recomputed from the configured decks root; callers
/// cannot steer it. Deployments that once derived the root from an
/// install location tended to end up under a `build/` tree, so a root
/// that still looks like one gets flagged.
pub fn save_deck(deck: &Deck, storage: &StoragePaths) -> Result<PathBuf, DeckError> {
    let path = storage.deck_file(deck.metadata.deck_id);
    if path.components().any(|c| c.as_os_str() == "build") {
        warn!(
            "decks root {} contains a 'build' segment; check the configured storage roots",
            storage.decks_root().display()
        );
    }
    std::fs::create_dir_all(storage.decks_root()).map_err(|e| DeckError::OutputWriteFailed {
        path: storage.decks_root().to_path_buf(),
        source: e,
    })?;

    let json = serde_json::to_string_pretty(deck)
        .map_err(|e| DeckError::Internal(format!("cannot serialize deck: {}", e)))?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| DeckError::OutputWriteFailed {
        path: tmp.clone(),
        source: e,
    })?;
    std::fs::rename(&tmp, &path).map_err(|e| DeckError::OutputWriteFailed {
        path: path.clone(),
        source: e,
    })?;

    info!(
        "Deck saved: {} ({} questions)",
        path.display(),
        deck.metadata.question_count
    );
    Ok(path)
}

/// Load a deck by id. `Ok(None)` means no deck file exists; a file that
/// exists but cannot be read or parsed is an error, not an absence.
pub fn load_deck(storage: &StoragePaths, deck_id: DeckId) -> Result<Option<Deck>, DeckError> {
    let path = storage.deck_file(deck_id);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(DeckError::Internal(format!(
                "cannot read deck {}: {}",
                path.display(),
                e
            )))
        }
    };
    let deck = serde_json::from_str(&raw).map_err(|e| {
        DeckError::Internal(format!("deck file {} is corrupt: {}", path.display(), e))
    })?;
    Ok(Some(deck))
}

pub fn deck_exists(storage: &StoragePaths, deck_id: DeckId) -> bool {
    storage.deck_file(deck_id).exists()
}
