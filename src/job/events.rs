//! Best-effort job event feed.
//!
//! Deck jobs run detached from the caller, so every stage transition is also
//! published as a [`JobEvent`]. Publishing never blocks the pipeline: with no
//! listener attached, or a listener lagging behind the channel capacity,
//! events are dropped rather than queued without bound.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::model::{DeckId, JobState};

/// One stage transition of a running deck job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub deck_id: DeckId,
    pub state: JobState,
    pub message: String,
}

/// Hands [`JobEvent`]s to an optional listener.
#[derive(Debug, Clone, Default)]
pub struct EventPublisher {
    tx: Option<mpsc::Sender<JobEvent>>,
}

impl EventPublisher {
    /// A publisher that drops every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Publish `event` if a listener is attached and keeping up.
    pub fn publish(&self, event: JobEvent) {
        let Some(tx) = &self.tx else { return };
        if let Err(e) = tx.try_send(event) {
            debug!("Dropping job event: {}", e);
        }
    }
}

/// Create a publisher plus the stream of events it feeds.
///
/// `capacity` bounds how far a slow listener may fall behind before newer
/// events are dropped.
pub fn event_channel(capacity: usize) -> (EventPublisher, ReceiverStream<JobEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventPublisher { tx: Some(tx) }, ReceiverStream::new(rx))
}
