//! The deck job orchestrator.
//!
//! [`create_deck`] checks a source batch and spawns the pipeline as a
//! detached job; [`run_pipeline`] drives the stages in order and owns the
//! status transitions. A stage failure marks the job failed and leaves the
//! batch directory in place for inspection. Per-page trouble never fails a
//! job; it is collected into the returned [`DeckSummary`] instead.

use tracing::{debug, error, info, warn};

use crate::context::AppContext;
use crate::deck::unify;
use crate::error::DeckError;
use crate::job::cleanup;
use crate::job::events::JobEvent;
use crate::job::worker::TaskHandle;
use crate::model::{DeckId, DeckSummary, JobStatus};
use crate::pipeline::ingest::{self, DocumentKind, Source};
use crate::pipeline::{layout, rasterize, synthesize, walk};

/// Start building a deck from `sources` and return its id.
///
/// Verification runs before any job state exists, so a bad batch is an
/// immediate error, not a failed job. The returned id doubles as the job id
/// for status queries; the pipeline itself runs detached.
pub async fn create_deck(
    ctx: &AppContext,
    deck_name: &str,
    sources: Vec<Source>,
) -> Result<DeckId, DeckError> {
    ingest::verify_sources(&sources)?;

    let deck_id = DeckId::new();
    post(ctx, deck_id, JobStatus::processing("Deck creation started"));

    let task_ctx = ctx.clone();
    let name = deck_name.to_string();
    tokio::spawn(async move {
        if let Err(e) = run_pipeline(&task_ctx, deck_id, &name, sources).await {
            error!("Deck job {} failed: {}", deck_id, e);
        }
    });

    Ok(deck_id)
}

/// Run the full pipeline for one deck, posting every stage transition.
///
/// On a stage failure the job status is set to failed with the error text
/// and the batch directory is kept so the failed stage can be inspected and
/// the job retried.
pub async fn run_pipeline(
    ctx: &AppContext,
    deck_id: DeckId,
    deck_name: &str,
    sources: Vec<Source>,
) -> Result<DeckSummary, DeckError> {
    match run_stages(ctx, deck_id, deck_name, sources).await {
        Ok(summary) => Ok(summary),
        Err(e) => {
            let text = e.to_string();
            post(ctx, deck_id, JobStatus::failed(text.clone()));
            ctx.progress.on_job_failed(&deck_id.to_string(), &text);
            warn!(
                "Batch directory {} preserved for inspection",
                ctx.storage.batch_root().display()
            );
            Err(e)
        }
    }
}

async fn run_stages(
    ctx: &AppContext,
    deck_id: DeckId,
    deck_name: &str,
    sources: Vec<Source>,
) -> Result<DeckSummary, DeckError> {
    post(ctx, deck_id, JobStatus::processing("Saving uploaded files"));
    let documents =
        ingest::ingest_sources(sources, &ctx.storage, ctx.config.download_timeout_secs).await?;

    post(ctx, deck_id, JobStatus::processing("Rasterizing PDF pages"));
    for doc in &documents {
        if let DocumentKind::Pdf(pdf_path) = &doc.kind {
            let pdf = pdf_path.clone();
            let images_dir = ctx.storage.doc_images_dir(&doc.stem);
            let dpi = ctx.config.dpi;
            let pages = TaskHandle::spawn("Rasterization", move || {
                rasterize::rasterize_pdf(&pdf, &images_dir, dpi)
            })
            .wait()
            .await??;
            info!("Rasterized {} page(s) from '{}'", pages.len(), doc.name);
        }
    }

    post(ctx, deck_id, JobStatus::processing("Detecting page layout"));
    let storage = ctx.storage.clone();
    let engines = ctx.engines.clone();
    let detected = TaskHandle::spawn("Layout detection", move || {
        layout::detect_batch(&storage, engines.layout.as_ref())
    })
    .wait()
    .await??;
    debug!("Layout available for {} page(s)", detected);

    post(ctx, deck_id, JobStatus::processing("Extracting page content"));
    let walked = walk::walk_batch(&ctx.storage, &ctx.engines, &ctx.config, &ctx.progress).await?;

    post(ctx, deck_id, JobStatus::processing("Generating questions"));
    let targets = ctx.synthesis_targets()?;
    let synthesis =
        synthesize::synthesize_batch(&ctx.storage, &targets, &ctx.config, &ctx.progress).await;

    post(ctx, deck_id, JobStatus::processing("Building deck"));
    let storage = ctx.storage.clone();
    let name = deck_name.to_string();
    let deck = TaskHandle::spawn("Deck unification", move || {
        unify::unify_deck(deck_id, &name, &storage)
    })
    .wait()
    .await??;
    let question_count = deck.metadata.question_count;

    let status = JobStatus::complete(format!(
        "deck '{}' created with {} questions",
        deck_name, question_count
    ));
    info!("[{}] {}", deck_id, status.message);
    ctx.events.publish(JobEvent {
        deck_id,
        state: status.status,
        message: status.message.clone(),
    });
    ctx.progress.on_stage(&deck_id.to_string(), &status.message);
    ctx.progress.on_deck_complete(&deck_id.to_string(), question_count);
    // The saved deck file answers status queries from here on.
    ctx.status.remove(&deck_id.to_string());

    // The job is already complete; cleanup trouble is logged, never
    // propagated.
    let storage = ctx.storage.clone();
    let config = ctx.config.clone();
    match TaskHandle::spawn("Cleanup", move || cleanup::cleanup_batch(&storage, &config))
        .wait()
        .await
    {
        Ok(_) => {}
        Err(e) => warn!("Cleanup after deck {} failed: {}", deck_id, e),
    }

    let pages_extracted = walked.records_available();
    let question_files = synthesis.files_available();
    let mut failures = walked.failures;
    failures.extend(synthesis.failures);
    Ok(DeckSummary {
        deck_id,
        deck_name: deck_name.to_string(),
        deck_path: ctx.storage.deck_file(deck_id),
        question_count,
        documents: documents.len(),
        pages_extracted,
        question_files,
        failures,
    })
}

/// Log a stage transition and fan it out to the board, the event feed and
/// the progress callback.
fn post(ctx: &AppContext, deck_id: DeckId, status: JobStatus) {
    info!("[{}] {}", deck_id, status.message);
    ctx.events.publish(JobEvent {
        deck_id,
        state: status.status,
        message: status.message.clone(),
    });
    ctx.progress.on_stage(&deck_id.to_string(), &status.message);
    ctx.status.set(deck_id, status);
}
