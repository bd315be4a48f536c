//! Progress reporting for deck builds.
//!
//! Implement [`DeckProgressCallback`] to observe a running job (CLI
//! progress bars, websocket bridges, metrics). Every method has a no-op
//! default so implementors only override what they care about. Callbacks
//! are invoked from async and blocking contexts alike and must be cheap;
//! anything slow belongs on the implementor's own channel.

use std::sync::Arc;

/// Observer for pipeline progress. All methods default to no-ops.
pub trait DeckProgressCallback: Send + Sync {
    /// A pipeline stage began or posted an update (human-readable text,
    /// the same strings that land on the status board).
    fn on_stage(&self, deck_id: &str, message: &str) {
        let _ = (deck_id, message);
    }

    /// Extraction finished for one page.
    fn on_page_extracted(&self, doc: &str, page: &str) {
        let _ = (doc, page);
    }

    /// Question synthesis produced a file for one page.
    fn on_questions_generated(&self, page: &str, count: usize) {
        let _ = (page, count);
    }

    /// One page dropped out (extraction or synthesis).
    fn on_page_failed(&self, page: &str, detail: &str) {
        let _ = (page, detail);
    }

    /// The deck was written; the job is complete.
    fn on_deck_complete(&self, deck_id: &str, question_count: usize) {
        let _ = (deck_id, question_count);
    }

    /// The job failed fatally.
    fn on_job_failed(&self, deck_id: &str, error: &str) {
        let _ = (deck_id, error);
    }
}

/// Callback that ignores every event. The default when none is supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl DeckProgressCallback for NoopProgress {}

/// Shared handle to a progress callback.
pub type ProgressCallback = Arc<dyn DeckProgressCallback>;
