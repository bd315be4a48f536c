//! Shared state for deck jobs.
//!
//! An [`AppContext`] bundles everything a running job needs: configuration,
//! storage roots, recognition engines, the status board, and the progress and
//! event sinks. It is cheap to clone, so the orchestrator hands an owned copy
//! to every spawned job.

use std::fmt;
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::engines::Engines;
use crate::error::DeckError;
use crate::job::events::EventPublisher;
use crate::job::status::{self, StatusBoard};
use crate::model::JobStatus;
use crate::pipeline::synthesize::{self, SynthesisTargets};
use crate::progress::{NoopProgress, ProgressCallback};
use crate::storage::StoragePaths;

#[derive(Clone)]
pub struct AppContext {
    pub config: PipelineConfig,
    pub storage: StoragePaths,
    pub engines: Engines,
    pub status: StatusBoard,
    pub progress: ProgressCallback,
    pub events: EventPublisher,
    /// Pre-resolved synthesis models. `None` resolves from `config` when a
    /// job reaches the synthesis stage.
    pub synthesis: Option<SynthesisTargets>,
}

impl AppContext {
    pub fn new(config: PipelineConfig, storage: StoragePaths, engines: Engines) -> Self {
        Self {
            config,
            storage,
            engines,
            status: StatusBoard::new(),
            progress: Arc::new(NoopProgress),
            events: EventPublisher::disabled(),
            synthesis: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = events;
        self
    }

    /// Use these models for question synthesis instead of resolving a
    /// provider from the configuration.
    pub fn with_synthesis_targets(mut self, targets: SynthesisTargets) -> Self {
        self.synthesis = Some(targets);
        self
    }

    /// The models the synthesis stage will call.
    pub fn synthesis_targets(&self) -> Result<SynthesisTargets, DeckError> {
        match &self.synthesis {
            Some(targets) => Ok(targets.clone()),
            None => synthesize::resolve_targets(&self.config),
        }
    }

    /// Status of `raw_id`, from the deck store or the status board.
    pub fn deck_status(&self, raw_id: &str) -> JobStatus {
        status::deck_status(&self.storage, &self.status, raw_id)
    }
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("storage", &self.storage)
            .field("engines", &self.engines)
            .field("status", &self.status)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}
