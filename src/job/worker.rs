//! Handles for CPU-bound pipeline stages.
//!
//! Rasterisation, layout detection, deck unification and cleanup are all
//! synchronous, CPU-heavy work. [`TaskHandle::spawn`] moves such a stage onto
//! tokio's blocking pool; [`TaskHandle::wait`] polls it at a fixed interval so
//! the orchestrator stays responsive while the stage grinds away.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::DeckError;

/// How often [`TaskHandle::wait`] checks whether the task has finished.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A CPU-bound stage running on the blocking pool.
#[derive(Debug)]
pub struct TaskHandle<T> {
    label: &'static str,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> TaskHandle<T> {
    /// Spawn `work` on the blocking pool. `label` names the stage in the
    /// error raised if the task panics.
    pub fn spawn<F>(label: &'static str, work: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self {
            label,
            handle: tokio::task::spawn_blocking(work),
        }
    }

    /// Whether the task has run to completion (or panicked).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Poll the task until it finishes and return its output.
    ///
    /// A panic inside the task surfaces as [`DeckError::Internal`] naming the
    /// stage; it never unwinds into the caller.
    pub async fn wait(self) -> Result<T, DeckError> {
        while !self.handle.is_finished() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        self.handle
            .await
            .map_err(|e| DeckError::Internal(format!("{} task panicked: {}", self.label, e)))
    }
}
