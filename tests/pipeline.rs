//! Full-pipeline integration tests.
//!
//! Each test drives the crate through its public surface the way an
//! embedding application would: sources are page images encoded in memory,
//! layout and OCR run on stub engines behind the adapter traits, and
//! question synthesis replays scripted responses instead of calling a
//! provider. No network access and no PDF engine are needed, so the suite
//! runs in any environment.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use futures::future::BoxFuture;
use image::RgbImage;
use pdf2deck::{
    deck_status, event_channel, run_pipeline, AppContext, ChatModel, Deck, DeckId,
    DeckProgressCallback, EngineError, Engines, FormulaRecognizer, JobEvent, JobState,
    LayoutDetector, PageFailure, PipelineConfig, Question, Region, RegionLabel, Source,
    StatusBoard, StoragePaths, SynthesisTargets, TextRecognizer,
};
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio_stream::StreamExt;

/// The payload a well-behaved model returns: exactly 8 questions across
/// all four types, in the shape the synthesis prompt demands.
const GOOD_RESPONSE: &str = r#"{"questions": [
    {"question_type": "flashcard", "question": "What pigment absorbs light in photosynthesis?",
     "answer": "Chlorophyll", "tags": ["biology", "photosynthesis"]},
    {"question_type": "cloze", "question": "Photosynthesis converts light energy into _____ energy.",
     "answer": "chemical", "tags": ["biology"]},
    {"question_type": "true_false", "question": "Photosynthesis releases oxygen.",
     "answer": "true", "tags": ["biology"]},
    {"question_type": "multi_choice", "question": "Where do the light reactions occur?",
     "options": [
        {"choice": "Thylakoid membrane", "is_correct": true},
        {"choice": "Stroma", "is_correct": false},
        {"choice": "Mitochondrion", "is_correct": false}
     ],
     "correct_choice": "Thylakoid membrane", "tags": ["biology"]},
    {"question_type": "flashcard", "question": "Which gas enters the leaf through stomata?",
     "answer": "Carbon dioxide", "tags": ["biology"]},
    {"question_type": "flashcard", "question": "What sugar does the Calvin cycle build?",
     "answer": "Glucose", "tags": ["biology"]},
    {"question_type": "true_false", "question": "Roots perform most of a plant's photosynthesis.",
     "answer": "false", "tags": ["biology"]},
    {"question_type": "flashcard", "question": "Which organelle hosts photosynthesis?",
     "answer": "The chloroplast", "tags": ["biology"]}
]}"#;

// ── Stub engines ─────────────────────────────────────────────────────────

/// Sees a header band and a body paragraph on every page.
struct BandLayout;

impl LayoutDetector for BandLayout {
    fn detect(&self, _image: &Path) -> Result<Vec<Region>, EngineError> {
        Ok(vec![
            Region::new(RegionLabel::Header, [6.0, 6.0, 90.0, 20.0]),
            Region::new(RegionLabel::Text, [6.0, 24.0, 90.0, 88.0]),
        ])
    }
}

/// Sees a paragraph with a figure underneath it.
struct FigureLayout;

impl LayoutDetector for FigureLayout {
    fn detect(&self, _image: &Path) -> Result<Vec<Region>, EngineError> {
        Ok(vec![
            Region::new(RegionLabel::Text, [6.0, 6.0, 90.0, 44.0]),
            Region::new(RegionLabel::Figure, [6.0, 48.0, 90.0, 90.0]),
        ])
    }
}

/// Reads the same line off every region.
struct CannedText(&'static str);

impl TextRecognizer for CannedText {
    fn recognize(&self, _crop: &RgbImage) -> Result<Vec<String>, EngineError> {
        Ok(vec![self.0.to_string()])
    }
}

struct NoFormulae;

impl FormulaRecognizer for NoFormulae {
    fn recognize(&self, _crop: &RgbImage) -> Result<Vec<String>, EngineError> {
        Ok(vec![])
    }
}

fn stub_engines() -> Engines {
    Engines::new(
        Arc::new(BandLayout),
        Arc::new(CannedText("Photosynthesis converts light into chemical energy.")),
        Arc::new(NoFormulae),
    )
}

// ── Scripted chat models ─────────────────────────────────────────────────

/// Replies with the same text on every call.
struct CannedModel(String);

impl CannedModel {
    fn new(response: &str) -> Arc<Self> {
        Arc::new(Self(response.to_string()))
    }
}

impl ChatModel for CannedModel {
    fn model_name(&self) -> &str {
        "canned-model"
    }

    fn complete<'a>(
        &'a self,
        _system: &'a str,
        _user: &'a str,
        _temperature: f32,
        _max_tokens: usize,
    ) -> BoxFuture<'a, Result<String, EngineError>> {
        Box::pin(async move { Ok(self.0.clone()) })
    }
}

/// Works through a scripted list of outcomes, then repeats the good
/// payload forever.
struct ScriptedModel {
    steps: Mutex<Vec<Result<String, EngineError>>>,
}

impl ScriptedModel {
    fn new(mut steps: Vec<Result<String, EngineError>>) -> Arc<Self> {
        steps.reverse();
        Arc::new(Self {
            steps: Mutex::new(steps),
        })
    }
}

impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted-model"
    }

    fn complete<'a>(
        &'a self,
        _system: &'a str,
        _user: &'a str,
        _temperature: f32,
        _max_tokens: usize,
    ) -> BoxFuture<'a, Result<String, EngineError>> {
        Box::pin(async move {
            self.steps
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(GOOD_RESPONSE.to_string()))
        })
    }
}

/// Fails every call the same way.
struct FailingModel(&'static str);

impl ChatModel for FailingModel {
    fn model_name(&self) -> &str {
        "failing-model"
    }

    fn complete<'a>(
        &'a self,
        _system: &'a str,
        _user: &'a str,
        _temperature: f32,
        _max_tokens: usize,
    ) -> BoxFuture<'a, Result<String, EngineError>> {
        Box::pin(async move { Err(EngineError::new(self.0)) })
    }
}

/// Builds one flashcard around the first image path listed in the prompt.
struct ImageEchoModel;

impl ChatModel for ImageEchoModel {
    fn model_name(&self) -> &str {
        "echo-model"
    }

    fn complete<'a>(
        &'a self,
        _system: &'a str,
        user: &'a str,
        _temperature: f32,
        _max_tokens: usize,
    ) -> BoxFuture<'a, Result<String, EngineError>> {
        Box::pin(async move {
            let img = user
                .lines()
                .find_map(|line| line.strip_prefix("Image 1: "))
                .unwrap_or_default();
            Ok(serde_json::json!({
                "questions": [{
                    "question_type": "flashcard",
                    "question": "What does the figure show?",
                    "answer": "A labelled chloroplast",
                    "tags": ["biology", "figures"],
                    "img_path": img
                }]
            })
            .to_string())
        })
    }
}

// ── Test helpers ─────────────────────────────────────────────────────────

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// A scanned-page stand-in: a light gray PNG encoded in memory.
fn png_page(name: &str) -> Source {
    let page = RgbImage::from_pixel(96, 96, image::Rgb([247, 245, 240]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(page)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    Source::Bytes {
        name: name.to_string(),
        data: buf.into_inner(),
    }
}

fn build_ctx(root: &Path, engines: Engines, model: Arc<dyn ChatModel>) -> AppContext {
    let mut config = PipelineConfig::default();
    config.retry_base_delay_ms = 1;
    let storage = StoragePaths::new(
        root.join("work/batch"),
        root.join("work/decks"),
        root.join("work/decks/images"),
    );
    AppContext::new(config, storage, engines)
        .with_synthesis_targets(SynthesisTargets::text_only(model))
}

fn read_deck(path: &Path) -> Deck {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

// ── Happy path ───────────────────────────────────────────────────────────

#[tokio::test]
async fn two_page_image_batch_lands_in_one_deck() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let ctx = build_ctx(tmp.path(), stub_engines(), CannedModel::new(GOOD_RESPONSE));
    let id = DeckId::new();

    let summary = run_pipeline(
        &ctx,
        id,
        "Plant Biology",
        vec![png_page("leaf_structure.png"), png_page("chloroplast.png")],
    )
    .await
    .unwrap();

    assert_eq!(summary.documents, 2);
    assert_eq!(summary.pages_extracted, 2);
    assert_eq!(summary.question_files, 2);
    assert_eq!(summary.question_count, 16);
    assert!(summary.failures.is_empty());
    assert_eq!(
        summary.deck_path,
        ctx.storage.decks_root().join(format!("{id}.json"))
    );

    let deck = read_deck(&summary.deck_path);
    assert_eq!(deck.metadata.deck_id, id);
    assert_eq!(deck.metadata.deck_name, "Plant Biology");
    assert_eq!(deck.metadata.question_count, 16);
    assert_eq!(deck.questions.len(), 16);
    for kind in ["flashcard", "cloze", "true_false", "multi_choice"] {
        assert!(
            deck.questions.iter().any(|q| q.type_name() == kind),
            "no {kind} question survived normalization"
        );
    }
    assert!(deck.questions.iter().all(|q| !q.tags().is_empty()));
}

#[tokio::test]
async fn fenced_model_output_builds_the_same_deck() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let fenced = format!(
        "Here are the flashcards you asked for:\n```json\n{GOOD_RESPONSE}\n```\nGood luck with the exam!"
    );
    let ctx = build_ctx(tmp.path(), stub_engines(), CannedModel::new(&fenced));
    let id = DeckId::new();

    let summary = run_pipeline(&ctx, id, "Noisy Model", vec![png_page("scan.png")])
        .await
        .unwrap();
    assert_eq!(summary.question_count, 8);
    assert!(summary.failures.is_empty());

    let deck = read_deck(&summary.deck_path);
    assert_eq!(
        deck.questions[0].question(),
        "What pigment absorbs light in photosynthesis?"
    );
    match deck
        .questions
        .iter()
        .find(|q| q.type_name() == "multi_choice")
        .unwrap()
    {
        Question::MultiChoice {
            options,
            correct_choice,
            ..
        } => {
            assert_eq!(correct_choice, "Thylakoid membrane");
            assert_eq!(options.iter().filter(|o| o.is_correct).count(), 1);
        }
        other => panic!("expected multi_choice, got {}", other.type_name()),
    }
}

#[tokio::test]
async fn deck_file_is_plain_json_with_stable_key_names() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let ctx = build_ctx(tmp.path(), stub_engines(), CannedModel::new(GOOD_RESPONSE));
    let id = DeckId::new();

    let summary = run_pipeline(&ctx, id, "Mycology", vec![png_page("spores.png")])
        .await
        .unwrap();

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&summary.deck_path).unwrap()).unwrap();
    assert_eq!(raw["metadata"]["deck_id"].as_str().unwrap(), id.to_string());
    assert_eq!(raw["metadata"]["deck_name"], "Mycology");
    assert_eq!(raw["metadata"]["question_count"], 8);
    assert_eq!(raw["metadata"]["created_at"], raw["metadata"]["updated_at"]);
    assert!(raw["metadata"]["created_at"]
        .as_str()
        .unwrap()
        .ends_with('Z'));

    assert_eq!(raw["questions"][0]["question_type"], "flashcard");
    assert!(raw["questions"][0]["tags"].is_array());
    assert_eq!(raw["questions"][3]["question_type"], "multi_choice");
    assert_eq!(raw["questions"][3]["correct_choice"], "Thylakoid membrane");
    assert_eq!(raw["questions"][3]["options"][0]["is_correct"], true);
}

// ── Failure containment ──────────────────────────────────────────────────

#[tokio::test]
async fn a_failed_page_costs_its_questions_not_the_deck() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    // Documents synthesize in name order: algae fails, fungi succeeds.
    let model = ScriptedModel::new(vec![
        Err(EngineError::new("model 'nano-beta' was not found")),
        Ok(GOOD_RESPONSE.to_string()),
    ]);
    let ctx = build_ctx(tmp.path(), stub_engines(), model);
    let id = DeckId::new();

    let summary = run_pipeline(
        &ctx,
        id,
        "Mixed Luck",
        vec![png_page("algae.png"), png_page("fungi.png")],
    )
    .await
    .unwrap();

    assert_eq!(summary.question_count, 8);
    assert_eq!(summary.question_files, 1);
    assert_eq!(summary.failures.len(), 1);
    match &summary.failures[0] {
        PageFailure::Synthesis {
            page,
            attempts,
            detail,
        } => {
            assert_eq!(page, "algae_processed.json");
            assert_eq!(*attempts, 1, "fatal provider errors must not be retried");
            assert!(detail.contains("was not found"));
        }
        other => panic!("expected a synthesis failure, got {other:?}"),
    }
    assert!(!ctx
        .storage
        .question_file_path("algae", "algae_processed")
        .exists());
    assert!(ctx
        .storage
        .question_file_path("fungi", "fungi_processed")
        .exists());
    assert_eq!(ctx.deck_status(&id.to_string()).status, JobState::Complete);
}

#[tokio::test]
async fn batch_with_no_usable_questions_ships_a_placeholder_card() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let model = Arc::new(FailingModel("connection timed out while contacting the provider"));
    let ctx = build_ctx(tmp.path(), stub_engines(), model);
    let id = DeckId::new();

    let summary = run_pipeline(&ctx, id, "Empty Harvest", vec![png_page("scan.png")])
        .await
        .unwrap();

    assert_eq!(summary.question_files, 0);
    assert_eq!(summary.question_count, 1);
    assert_eq!(summary.failures.len(), 1);
    match &summary.failures[0] {
        PageFailure::Synthesis { attempts, .. } => {
            assert_eq!(*attempts, 3, "transient errors must exhaust every attempt");
        }
        other => panic!("expected a synthesis failure, got {other:?}"),
    }

    let deck = read_deck(&summary.deck_path);
    assert_eq!(deck.questions.len(), 1);
    assert_eq!(deck.questions[0].tags(), ["placeholder"]);

    let status = ctx.deck_status(&id.to_string());
    assert_eq!(status.status, JobState::Complete);
    assert_eq!(status.message, "deck 'Empty Harvest' created with 1 questions");
}

// ── Question images ──────────────────────────────────────────────────────

#[tokio::test]
async fn figure_crops_follow_their_questions_into_the_deck() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let engines = Engines::new(
        Arc::new(FigureLayout),
        Arc::new(CannedText("Figure 3: chloroplast ultrastructure.")),
        Arc::new(NoFormulae),
    );
    let ctx = build_ctx(tmp.path(), engines, Arc::new(ImageEchoModel));
    let id = DeckId::new();

    let summary = run_pipeline(&ctx, id, "Cell Organelles", vec![png_page("diagram.png")])
        .await
        .unwrap();
    assert_eq!(summary.pages_extracted, 1);
    assert_eq!(summary.question_count, 1);

    let deck = read_deck(&summary.deck_path);
    let img = deck.questions[0]
        .img_path()
        .expect("the question should keep its figure");
    assert!(img.ends_with("diagram_figure_1.png"), "{img}");
    assert!(
        ctx.storage.is_under_deck_images(Path::new(img), id),
        "{img} should live in the deck's permanent image directory"
    );
    assert!(Path::new(img).exists());
}

// ── Status lookups ───────────────────────────────────────────────────────

#[tokio::test]
async fn status_answers_from_the_deck_file_after_a_restart() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let ctx = build_ctx(tmp.path(), stub_engines(), CannedModel::new(GOOD_RESPONSE));
    let id = DeckId::new();

    run_pipeline(&ctx, id, "History 101", vec![png_page("scan.png")])
        .await
        .unwrap();

    // A fresh board stands in for a process that just started up.
    let fresh_board = StatusBoard::new();
    let status = deck_status(&ctx.storage, &fresh_board, &id.to_string());
    assert_eq!(status.status, JobState::Complete);
    assert_eq!(status.message, "deck 'History 101' created with 8 questions");

    let missing = deck_status(&ctx.storage, &fresh_board, &DeckId::new().to_string());
    assert_eq!(missing.status, JobState::Unknown);
    assert_eq!(missing.message, "Unknown deck ID");
}

// ── Observability ────────────────────────────────────────────────────────

#[tokio::test]
async fn stage_events_reach_the_subscriber_in_order() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let (publisher, stream) = event_channel(32);
    let ctx = build_ctx(tmp.path(), stub_engines(), CannedModel::new(GOOD_RESPONSE))
        .with_events(publisher);
    let id = DeckId::new();

    run_pipeline(&ctx, id, "Geology", vec![png_page("scan.png")])
        .await
        .unwrap();
    // The context holds the only sender; dropping it ends the stream.
    drop(ctx);

    let events: Vec<JobEvent> = stream.collect().await;
    assert!(events.iter().all(|e| e.deck_id == id));

    let messages: Vec<&str> = events.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(
        &messages[..6],
        &[
            "Saving uploaded files",
            "Rasterizing PDF pages",
            "Detecting page layout",
            "Extracting page content",
            "Generating questions",
            "Building deck",
        ]
    );
    let last = events.last().unwrap();
    assert_eq!(last.state, JobState::Complete);
    assert_eq!(last.message, "deck 'Geology' created with 8 questions");
    assert!(events[..events.len() - 1]
        .iter()
        .all(|e| e.state == JobState::Processing));
}

/// Collects every callback invocation as a readable log line.
#[derive(Default)]
struct RecordingProgress {
    log: Mutex<Vec<String>>,
}

impl RecordingProgress {
    fn push(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl DeckProgressCallback for RecordingProgress {
    fn on_stage(&self, _deck_id: &str, message: &str) {
        self.push(format!("stage: {message}"));
    }

    fn on_page_extracted(&self, doc: &str, page: &str) {
        self.push(format!("extracted: {doc}/{page}"));
    }

    fn on_questions_generated(&self, page: &str, count: usize) {
        self.push(format!("questions: {page} x{count}"));
    }

    fn on_page_failed(&self, page: &str, _detail: &str) {
        self.push(format!("failed: {page}"));
    }

    fn on_deck_complete(&self, _deck_id: &str, question_count: usize) {
        self.push(format!("complete: {question_count}"));
    }

    fn on_job_failed(&self, _deck_id: &str, error: &str) {
        self.push(format!("job failed: {error}"));
    }
}

#[tokio::test]
async fn progress_callbacks_trace_the_whole_run() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let progress = Arc::new(RecordingProgress::default());
    let ctx = build_ctx(tmp.path(), stub_engines(), CannedModel::new(GOOD_RESPONSE))
        .with_progress(progress.clone());

    run_pipeline(&ctx, DeckId::new(), "Field Notes", vec![png_page("notes.png")])
        .await
        .unwrap();

    let log = progress.entries();
    assert_eq!(log[0], "stage: Saving uploaded files");
    assert!(log.contains(&"extracted: notes/notes.png".to_string()));
    assert!(log.contains(&"questions: notes_processed.json x8".to_string()));
    assert!(log.contains(&"complete: 8".to_string()));
    assert!(!log.iter().any(|e| e.starts_with("failed:")));

    let position = |prefix: &str| log.iter().position(|e| e.starts_with(prefix)).unwrap();
    assert!(position("extracted:") < position("questions:"));
    assert!(position("questions:") < position("complete:"));
}
