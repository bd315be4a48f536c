//! Job status tracking and lookup.
//!
//! While a deck job runs, the orchestrator posts its progress to a shared
//! [`StatusBoard`]. Once the deck file lands on disk it becomes the source of
//! truth: [`deck_status`] answers from the file first and only falls back to
//! the board for jobs still in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::deck::store;
use crate::model::{DeckId, JobStatus};
use crate::storage::StoragePaths;

/// In-memory map from deck id to the latest posted [`JobStatus`].
///
/// Clones share the same map, so the board can be handed to spawned jobs and
/// queried from anywhere.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<Mutex<HashMap<String, JobStatus>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, deck_id: DeckId, status: JobStatus) {
        self.lock().insert(deck_id.to_string(), status);
    }

    pub fn get(&self, deck_id: &str) -> Option<JobStatus> {
        self.lock().get(deck_id).cloned()
    }

    pub fn remove(&self, deck_id: &str) {
        self.lock().remove(deck_id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, JobStatus>> {
        // A poisoned lock still holds valid status entries.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Resolve the status of a deck id supplied by a caller.
///
/// The lookup order is fixed: a deck file on disk means complete regardless
/// of what the board says (stale board entries are dropped on the way), an
/// in-flight entry on the board is returned as posted, and anything else is
/// unknown. Unparseable ids never touch the filesystem.
pub fn deck_status(storage: &StoragePaths, board: &StatusBoard, raw_id: &str) -> JobStatus {
    let Some(deck_id) = DeckId::parse(raw_id) else {
        return JobStatus::unknown();
    };
    match store::load_deck(storage, deck_id) {
        Ok(Some(deck)) => {
            board.remove(raw_id);
            return JobStatus::complete(format!(
                "deck '{}' created with {} questions",
                deck.metadata.deck_name, deck.metadata.question_count
            ));
        }
        Ok(None) => {}
        Err(e) => warn!("Cannot read deck file for {}: {}", deck_id, e),
    }
    board.get(raw_id).unwrap_or_else(JobStatus::unknown)
}
