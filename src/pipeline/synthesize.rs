//! Question synthesis: one chat call per extraction record, with retry,
//! recovery parsing and validation.
//!
//! ## Retry Strategy
//!
//! Provider failures are classified by message. Rate limits back off
//! exponentially, starting at `retry_base_delay_ms` and doubling per hit
//! (2 s, then 4 s at the defaults); timeouts and connection drops wait a
//! flat base delay; anything else fails the page immediately since
//! repeating a malformed request only burns quota. A page failing
//! synthesis costs that page, never the batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::engines::{ChatModel, EngineError};
use crate::error::{DeckError, PageFailure};
use crate::model::{
    utc_timestamp, ExtractionRecord, Question, QuestionFile, QuestionFileMetadata,
};
use crate::pipeline::{normalize, parse};
use crate::progress::ProgressCallback;
use crate::prompts::{build_question_prompt, SYNTHESIS_SYSTEM_PROMPT};
use crate::storage::StoragePaths;

/// The production [`ChatModel`]: an LLM provider plus the model it was
/// created for.
pub struct ProviderChatModel {
    provider: Arc<dyn LLMProvider>,
    model: String,
}

impl ProviderChatModel {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

impl ChatModel for ProviderChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn complete<'a>(
        &'a self,
        system: &'a str,
        user: &'a str,
        temperature: f32,
        max_tokens: usize,
    ) -> BoxFuture<'a, Result<String, EngineError>> {
        Box::pin(async move {
            let messages = vec![ChatMessage::system(system), ChatMessage::user(user)];
            let options = CompletionOptions {
                temperature: Some(temperature),
                max_tokens: Some(max_tokens),
                ..Default::default()
            };
            let response = self
                .provider
                .chat(&messages, Some(&options))
                .await
                .map_err(|e| EngineError::new(e.to_string()))?;
            debug!(
                "{}: {} input tokens, {} output tokens",
                self.model, response.prompt_tokens, response.completion_tokens
            );
            Ok(response.content)
        })
    }
}

/// The chat models a run synthesizes with: one for text-only pages and an
/// optional second one for pages that carry images.
#[derive(Clone)]
pub struct SynthesisTargets {
    pub text: Arc<dyn ChatModel>,
    pub vision: Option<Arc<dyn ChatModel>>,
}

impl SynthesisTargets {
    pub fn text_only(model: Arc<dyn ChatModel>) -> Self {
        Self {
            text: model,
            vision: None,
        }
    }

    /// The model for a page, preferring the vision model when the page
    /// carries images.
    fn for_page(&self, has_images: bool) -> &Arc<dyn ChatModel> {
        if has_images {
            self.vision.as_ref().unwrap_or(&self.text)
        } else {
            &self.text
        }
    }
}

/// Model used when a provider is named without one.
const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Resolve the chat models for a run, from most-specific to least:
///
/// 1. A pre-built provider in the config is used as-is for every page.
///    This is the injection point for callers with custom middleware.
/// 2. A named provider (plus optional model) goes through
///    [`ProviderFactory::create_llm_provider`], which reads the matching
///    API key from the environment.
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, when both are set,
///    pick at the execution-environment level.
/// 4. An `OPENAI_API_KEY` in the environment selects OpenAI, so users
///    with several keys get a stable default; otherwise
///    [`ProviderFactory::from_env`] scans the known key variables and
///    takes the first hit.
///
/// Named and environment resolution build a second provider bound to
/// `config.vision_model` when one is configured; a pre-built provider
/// cannot be rebound, so the vision model is ignored there.
pub fn resolve_targets(config: &PipelineConfig) -> Result<SynthesisTargets, DeckError> {
    if let Some(ref provider) = config.provider {
        if config.vision_model.is_some() {
            warn!("vision_model is ignored when a pre-built provider is injected");
        }
        let label = config.model.as_deref().unwrap_or("custom");
        return Ok(SynthesisTargets::text_only(Arc::new(
            ProviderChatModel::new(Arc::clone(provider), label),
        )));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return targets_for(name, model, config.vision_model.as_deref());
    }

    if let (Ok(name), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !name.is_empty() && !model.is_empty() {
            return targets_for(&name, &model, config.vision_model.as_deref());
        }
    }

    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if !key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return targets_for("openai", model, config.vision_model.as_deref());
        }
    }

    let (provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| DeckError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from the environment.\n\
                Set OPENAI_API_KEY or another provider key, or name a provider explicitly.\n\
                Error: {}",
                e
            ),
        })?;
    if config.vision_model.is_some() {
        warn!("vision_model is ignored with an auto-detected provider");
    }
    let label = config.model.as_deref().unwrap_or("auto");
    Ok(SynthesisTargets::text_only(Arc::new(
        ProviderChatModel::new(provider, label),
    )))
}

/// Build text and vision targets on one named provider.
fn targets_for(
    name: &str,
    model: &str,
    vision_model: Option<&str>,
) -> Result<SynthesisTargets, DeckError> {
    let text: Arc<dyn ChatModel> =
        Arc::new(ProviderChatModel::new(provider_for(name, model)?, model));
    let vision = match vision_model {
        Some(vm) => Some(Arc::new(ProviderChatModel::new(provider_for(name, vm)?, vm))
            as Arc<dyn ChatModel>),
        None => None,
    };
    Ok(SynthesisTargets { text, vision })
}

/// Instantiate a named provider bound to one model.
fn provider_for(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, DeckError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        DeckError::ProviderNotConfigured {
            provider: name.to_string(),
            hint: e.to_string(),
        }
    })
}

/// What one document's synthesis pass produced.
#[derive(Debug, Default)]
pub struct SynthesisSummary {
    /// Extraction records found for the document.
    pub records_total: usize,
    /// Question files written by this pass.
    pub files_written: usize,
    /// Question files that already existed and were skipped.
    pub files_existing: usize,
    /// Questions across all files written by this pass.
    pub questions_generated: usize,
    /// Pages that produced no questions, with reasons.
    pub failures: Vec<PageFailure>,
}

impl SynthesisSummary {
    /// Question files available after the pass, new or resumed.
    pub fn files_available(&self) -> usize {
        self.files_written + self.files_existing
    }

    fn absorb(&mut self, other: SynthesisSummary) {
        self.records_total += other.records_total;
        self.files_written += other.files_written;
        self.files_existing += other.files_existing;
        self.questions_generated += other.questions_generated;
        self.failures.extend(other.failures);
    }
}

/// Generate questions for every document of the batch, in sequence.
pub async fn synthesize_batch(
    storage: &StoragePaths,
    targets: &SynthesisTargets,
    config: &PipelineConfig,
    progress: &ProgressCallback,
) -> SynthesisSummary {
    let mut total = SynthesisSummary::default();
    for doc in storage.document_names() {
        total.absorb(synthesize_document(&doc, storage, targets, config, progress).await);
    }
    total
}

/// Generate questions for every extraction record of `doc`.
///
/// Records whose question file already exists are skipped, so an
/// interrupted batch resumes where it stopped. Pages run concurrently,
/// `llm_concurrency` calls in flight at a time.
pub async fn synthesize_document(
    doc: &str,
    storage: &StoragePaths,
    targets: &SynthesisTargets,
    config: &PipelineConfig,
    progress: &ProgressCallback,
) -> SynthesisSummary {
    let records = list_record_files(&storage.doc_ocr_dir(doc));
    info!("Synthesizing '{}': {} record(s)", doc, records.len());

    let mut summary = SynthesisSummary {
        records_total: records.len(),
        ..SynthesisSummary::default()
    };

    let mut pending = Vec::new();
    for record_path in records {
        let record_stem = file_stem(&record_path);
        let output = storage.question_file_path(doc, &record_stem);
        if output.exists() {
            debug!("questions exist for {}, skipping", record_stem);
            summary.files_existing += 1;
            continue;
        }
        pending.push((record_path, output));
    }

    let outcomes: Vec<Result<usize, PageFailure>> = stream::iter(pending)
        .map(|(record_path, output)| {
            let targets = targets.clone();
            let config = config.clone();
            let progress = progress.clone();
            async move {
                let page = file_name(&record_path);
                let result = synthesize_page(&record_path, &output, &targets, &config, &page).await;
                match &result {
                    Ok(count) => progress.on_questions_generated(&page, *count),
                    Err(failure) => progress.on_page_failed(failure.page(), &failure.to_string()),
                }
                result
            }
        })
        .buffer_unordered(config.llm_concurrency.max(1))
        .collect()
        .await;

    for outcome in outcomes {
        match outcome {
            Ok(count) => {
                summary.files_written += 1;
                summary.questions_generated += count;
            }
            Err(failure) => {
                warn!("{}", failure);
                summary.failures.push(failure);
            }
        }
    }

    info!(
        "Synthesized '{}': {} file(s) written, {} resumed, {} question(s), {} failed",
        doc,
        summary.files_written,
        summary.files_existing,
        summary.questions_generated,
        summary.failures.len()
    );
    summary
}

/// One record's full synthesis pass. Returns the number of questions
/// written.
async fn synthesize_page(
    record_path: &Path,
    output_path: &Path,
    targets: &SynthesisTargets,
    config: &PipelineConfig,
    page: &str,
) -> Result<usize, PageFailure> {
    let record = load_record(record_path)
        .await
        .map_err(|detail| PageFailure::Synthesis {
            page: page.to_string(),
            attempts: 0,
            detail,
        })?;

    let record_dir = record_path.parent().unwrap_or(Path::new("."));
    let images = verify_images(&record, record_dir);
    let content = build_content(&record);

    if content.trim().is_empty() && images.is_empty() {
        debug!("{}: nothing to generate questions from", page);
        return Err(PageFailure::NoContent {
            page: page.to_string(),
        });
    }

    let prompt = build_question_prompt(&content, &images);
    let model = targets.for_page(!images.is_empty());

    let (raw, attempts) = call_with_retry(model.as_ref(), &prompt, config, page)
        .await
        .map_err(|(attempts, detail)| PageFailure::Synthesis {
            page: page.to_string(),
            attempts,
            detail,
        })?;

    let questions = questions_from_response(&raw).map_err(|detail| PageFailure::Synthesis {
        page: page.to_string(),
        attempts,
        detail: detail.to_string(),
    })?;

    write_question_file(&questions, page, model.model_name(), output_path)
        .await
        .map_err(|detail| PageFailure::Synthesis {
            page: page.to_string(),
            attempts,
            detail,
        })?;

    Ok(questions.len())
}

/// Parse a raw model response into validated questions.
fn questions_from_response(raw: &str) -> Result<Vec<Question>, &'static str> {
    let candidates =
        parse::parse_question_payload(raw).ok_or("response did not contain a question payload")?;
    let questions = normalize::normalize_batch(&candidates);
    if questions.is_empty() {
        return Err("no valid questions in response");
    }
    Ok(questions)
}

/// How a provider error should be retried, keyed off its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    RateLimit,
    Transient,
    Fatal,
}

fn classify_failure(detail: &str) -> FailureKind {
    let lower = detail.to_lowercase();
    if lower.contains("rate limit") || lower.contains("429") {
        FailureKind::RateLimit
    } else if lower.contains("timeout") || lower.contains("timed out") || lower.contains("connection")
    {
        FailureKind::Transient
    } else {
        FailureKind::Fatal
    }
}

/// Call the model up to `max_attempts` times. Returns the response and
/// the attempt it arrived on, or the attempts spent and the last error.
async fn call_with_retry(
    model: &dyn ChatModel,
    prompt: &str,
    config: &PipelineConfig,
    page: &str,
) -> Result<(String, u32), (u32, String)> {
    let base = Duration::from_millis(config.retry_base_delay_ms);
    let mut delay = base;
    let mut last_err = String::new();

    for attempt in 1..=config.max_attempts {
        match model
            .complete(
                SYNTHESIS_SYSTEM_PROMPT,
                prompt,
                config.temperature,
                config.max_tokens,
            )
            .await
        {
            Ok(content) => return Ok((content, attempt)),
            Err(e) => {
                let detail = e.to_string();
                match classify_failure(&detail) {
                    FailureKind::RateLimit => {
                        warn!(
                            "{}: rate limited (attempt {}/{}), backing off {:?}",
                            page, attempt, config.max_attempts, delay
                        );
                        if attempt < config.max_attempts {
                            sleep(delay).await;
                            delay *= 2;
                        }
                    }
                    FailureKind::Transient => {
                        warn!(
                            "{}: transient failure (attempt {}/{}): {}",
                            page, attempt, config.max_attempts, detail
                        );
                        if attempt < config.max_attempts {
                            sleep(base).await;
                        }
                    }
                    FailureKind::Fatal => {
                        warn!("{}: non-retryable failure: {}", page, detail);
                        return Err((attempt, detail));
                    }
                }
                last_err = detail;
            }
        }
    }
    Err((config.max_attempts, last_err))
}

/// Join a record into the prompt's content block.
fn build_content(record: &ExtractionRecord) -> String {
    let mut content = record.text.join("\n\n");
    if !record.formulae.is_empty() {
        content.push_str("\n\nFormulae:\n");
        content.push_str(&record.formulae.join("\n"));
    }
    content
}

/// Keep only image paths that resolve on disk.
///
/// Records written on another machine carry stale absolute paths, so a
/// missing path is looked up by file name next to the record file, then
/// in an `images/` directory beside it, then in the parent's `images/`,
/// before being dropped.
fn verify_images(record: &ExtractionRecord, record_dir: &Path) -> Vec<String> {
    let mut found = Vec::new();
    for img in &record.imgs {
        let path = Path::new(img);
        if path.exists() {
            found.push(img.clone());
            continue;
        }
        let Some(name) = path.file_name() else {
            warn!("question image missing, dropping: {}", img);
            continue;
        };
        let mut candidates = vec![record_dir.join(name), record_dir.join("images").join(name)];
        if let Some(parent) = record_dir.parent() {
            candidates.push(parent.join("images").join(name));
        }
        match candidates.into_iter().find(|c| c.exists()) {
            Some(hit) => found.push(hit.display().to_string()),
            None => warn!("question image missing, dropping: {}", img),
        }
    }
    found
}

async fn load_record(path: &Path) -> Result<ExtractionRecord, String> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    serde_json::from_str(&raw).map_err(|e| format!("record {} is not valid JSON: {}", path.display(), e))
}

//// Atomic question-file write: temp file, then rename.
async fn write_question_file(
    questions: &[Question],
    source_file: &str,
    model_used: &str,
    path: &Path,
) -> Result<(), String> {
    let file = QuestionFile {
        questions: questions.to_vec(),
        metadata: QuestionFileMetadata {
            source_file: source_file.to_string(),
            created_at: utc_timestamp(),
            model_used: model_used.to_string(),
            question_count: questions.len(),
        },
    };
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| format!("question serialization failed: {}", e))?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| format!("cannot write {}: {}", tmp.display(), e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| format!("cannot rename into {}: {}", path.display(), e))?;
    debug!("Wrote {} question(s) to {}", questions.len(), path.display());
    Ok(())
}

/// Extraction records under `dir`, lexicographically sorted.
fn list_record_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        warn!("no extraction records at {}", dir.display());
        return Vec::new();
    };
    let mut records: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with("_processed.json"))
                .unwrap_or(false)
        })
        .collect();
    records.sort();
    records
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgress;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Replays a scripted sequence of responses.
    struct ScriptedModel {
        name: &'static str,
        script: Mutex<VecDeque<Result<String, EngineError>>>,
        calls: AtomicU32,
    }

    impl ScriptedModel {
        fn new(name: &'static str, script: Vec<Result<String, EngineError>>) -> Self {
            Self {
                name,
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn always(name: &'static str, response: &str) -> Self {
            Self::new(name, vec![Ok(response.to_string())])
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ChatModel for ScriptedModel {
        fn model_name(&self) -> &str {
            self.name
        }

        fn complete<'a>(
            &'a self,
            _system: &'a str,
            _user: &'a str,
            _temperature: f32,
            _max_tokens: usize,
        ) -> BoxFuture<'a, Result<String, EngineError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let mut script = self.script.lock().unwrap();
                match script.pop_front() {
                    Some(step) => step,
                    // Repeat the last configured behavior forever.
                    None => Ok(EIGHT_QUESTIONS.to_string()),
                }
            })
        }
    }

    const EIGHT_QUESTIONS: &str = r#"{"questions": [
        {"question_type": "flashcard", "question": "Q1?", "answer": "A1", "tags": ["t"]},
        {"question_type": "cloze", "question": "___ 2", "answer": "A2"},
        {"question_type": "true_false", "question": "Q3", "answer": "yes"},
        {"question_type": "multi_choice", "question": "Q4", "answer": "B",
         "options": ["A", "B", "C"]},
        {"question_type": "flashcard", "question": "Q5?", "answer": "A5"},
        {"question_type": "flashcard", "question": "Q6?", "answer": "A6"},
        {"question_type": "flashcard", "question": "Q7?", "answer": "A7"},
        {"question_type": "flashcard", "question": "Q8?", "answer": "A8"}
    ]}"#;

    fn fast_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.retry_base_delay_ms = 1;
        config
    }

    fn storage(root: &Path) -> StoragePaths {
        StoragePaths::new(root.join("batch"), root.join("decks"), root.join("imgs"))
    }

    fn write_record_at(path: &Path, record: &ExtractionRecord) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_string(record).unwrap()).unwrap();
    }

    fn text_record(lines: &[&str]) -> ExtractionRecord {
        ExtractionRecord {
            text: lines.iter().map(|s| s.to_string()).collect(),
            ..ExtractionRecord::default()
        }
    }

    #[test]
    fn failure_classification_follows_the_message() {
        assert_eq!(classify_failure("Rate limit exceeded"), FailureKind::RateLimit);
        assert_eq!(classify_failure("HTTP 429 too many requests"), FailureKind::RateLimit);
        assert_eq!(classify_failure("request timed out"), FailureKind::Transient);
        assert_eq!(classify_failure("Connection reset by peer"), FailureKind::Transient);
        assert_eq!(classify_failure("read timeout"), FailureKind::Transient);
        assert_eq!(classify_failure("invalid api key"), FailureKind::Fatal);
        assert_eq!(classify_failure("model not found"), FailureKind::Fatal);
    }

    #[test]
    fn content_joins_text_and_appends_formulae() {
        let record = ExtractionRecord {
            text: vec!["First paragraph.".into(), "Second.".into()],
            formulae: vec!["x^2".into(), "y^2".into()],
            imgs: vec![],
        };
        assert_eq!(
            build_content(&record),
            "First paragraph.\n\nSecond.\n\nFormulae:\nx^2\ny^2"
        );
        assert_eq!(build_content(&text_record(&["only"])), "only");
        assert_eq!(build_content(&ExtractionRecord::default()), "");
    }

    #[test]
    fn images_resolve_in_place_or_next_to_the_record() {
        let tmp = tempfile::tempdir().unwrap();
        let record_dir = tmp.path().join("ocr_results");
        std::fs::create_dir_all(&record_dir).unwrap();

        let in_place = tmp.path().join("kept.png");
        std::fs::write(&in_place, b"x").unwrap();
        std::fs::write(record_dir.join("moved.png"), b"x").unwrap();

        let record = ExtractionRecord {
            imgs: vec![
                in_place.display().to_string(),
                "/stale/path/moved.png".to_string(),
                "/stale/path/gone.png".to_string(),
            ],
            ..ExtractionRecord::default()
        };

        let found = verify_images(&record, &record_dir);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], in_place.display().to_string());
        assert!(found[1].ends_with("ocr_results/moved.png"));
    }

    #[test]
    fn stale_image_paths_fall_back_to_nearby_images_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let record_dir = tmp.path().join("doc").join("ocr_results");
        std::fs::create_dir_all(record_dir.join("images")).unwrap();
        std::fs::create_dir_all(tmp.path().join("doc").join("images")).unwrap();
        std::fs::write(record_dir.join("images").join("crop.png"), b"x").unwrap();
        std::fs::write(tmp.path().join("doc").join("images").join("page.png"), b"x").unwrap();

        let record = ExtractionRecord {
            imgs: vec![
                "/stale/crop.png".to_string(),
                "/stale/page.png".to_string(),
            ],
            ..ExtractionRecord::default()
        };

        let found = verify_images(&record, &record_dir);
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("ocr_results/images/crop.png"));
        assert!(found[1].ends_with("doc/images/page.png"));
    }

    #[test]
    fn responses_must_yield_at_least_one_valid_question() {
        assert!(questions_from_response(EIGHT_QUESTIONS).unwrap().len() == 8);
        assert!(questions_from_response("no json here at all").is_err());
        assert!(questions_from_response(r#"{"questions": ["just", "topics"]}"#).is_err());
    }

    #[tokio::test]
    async fn rate_limits_are_retried_until_success() {
        let model = ScriptedModel::new(
            "m",
            vec![
                Err(EngineError::new("rate limit exceeded")),
                Err(EngineError::new("HTTP 429")),
                Ok("done".to_string()),
            ],
        );
        let (content, attempts) = call_with_retry(&model, "p", &fast_config(), "page")
            .await
            .unwrap();
        assert_eq!(content, "done");
        assert_eq!(attempts, 3);
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let model = ScriptedModel::new("m", vec![Err(EngineError::new("invalid api key"))]);
        let (attempts, detail) = call_with_retry(&model, "p", &fast_config(), "page")
            .await
            .unwrap_err();
        assert_eq!(attempts, 1);
        assert_eq!(model.calls(), 1);
        assert!(detail.contains("invalid api key"));
    }

    #[tokio::test]
    async fn transient_errors_exhaust_all_attempts() {
        let model = ScriptedModel::new(
            "m",
            vec![
                Err(EngineError::new("timeout")),
                Err(EngineError::new("connection refused")),
                Err(EngineError::new("timeout")),
            ],
        );
        let (attempts, _) = call_with_retry(&model, "p", &fast_config(), "page")
            .await
            .unwrap_err();
        assert_eq!(attempts, 3);
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn synthesize_page_writes_a_question_file() {
        let tmp = tempfile::tempdir().unwrap();
        let record_path = tmp.path().join("ocr_results/page_1_processed.json");
        write_record_at(&record_path, &text_record(&["Photosynthesis happens."]));
        let output = tmp.path().join("questions/page_1_processed_questions.json");

        let targets =
            SynthesisTargets::text_only(Arc::new(ScriptedModel::always("text-model", EIGHT_QUESTIONS)));
        let count = synthesize_page(
            &record_path,
            &output,
            &targets,
            &fast_config(),
            "page_1_processed.json",
        )
        .await
        .unwrap();

        assert_eq!(count, 8);
        let file: QuestionFile =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(file.questions.len(), 8);
        assert_eq!(file.metadata.question_count, 8);
        assert_eq!(file.metadata.source_file, "page_1_processed.json");
        assert_eq!(file.metadata.model_used, "text-model");
    }

    #[tokio::test]
    async fn empty_record_is_skipped_without_a_model_call() {
        let tmp = tempfile::tempdir().unwrap();
        let record_path = tmp.path().join("ocr_results/page_2_processed.json");
        write_record_at(&record_path, &ExtractionRecord::default());
        let output = tmp.path().join("questions/page_2_processed_questions.json");

        let model = Arc::new(ScriptedModel::always("m", EIGHT_QUESTIONS));
        let targets = SynthesisTargets::text_only(model.clone());
        let err = synthesize_page(
            &record_path,
            &output,
            &targets,
            &fast_config(),
            "page_2_processed.json",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PageFailure::NoContent { .. }));
        assert_eq!(model.calls(), 0);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn pages_with_images_prefer_the_vision_model() {
        let tmp = tempfile::tempdir().unwrap();
        let record_path = tmp.path().join("ocr_results/page_3_processed.json");
        let crop = tmp.path().join("ocr_results/page_3_figure_1.png");
        std::fs::create_dir_all(crop.parent().unwrap()).unwrap();
        std::fs::write(&crop, b"png").unwrap();
        write_record_at(
            &record_path,
            &ExtractionRecord {
                imgs: vec![crop.display().to_string()],
                ..ExtractionRecord::default()
            },
        );
        let output = tmp.path().join("questions/page_3_processed_questions.json");

        let text_model = Arc::new(ScriptedModel::always("text-model", EIGHT_QUESTIONS));
        let vision_model = Arc::new(ScriptedModel::always("vision-model", EIGHT_QUESTIONS));
        let targets = SynthesisTargets {
            text: text_model.clone(),
            vision: Some(vision_model.clone()),
        };

        synthesize_page(
            &record_path,
            &output,
            &targets,
            &fast_config(),
            "page_3_processed.json",
        )
        .await
        .unwrap();

        assert_eq!(text_model.calls(), 0);
        assert_eq!(vision_model.calls(), 1);
        let file: QuestionFile =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(file.metadata.model_used, "vision-model");
    }

    #[tokio::test]
    async fn document_pass_skips_existing_question_files() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = storage(tmp.path());

        write_record_at(
            &storage.record_path("doc", "page_1"),
            &text_record(&["alpha"]),
        );
        write_record_at(
            &storage.record_path("doc", "page_2"),
            &text_record(&["beta"]),
        );

        // Question file for page 1 survives from an earlier run.
        let existing = storage.question_file_path("doc", "page_1_processed");
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, "{}").unwrap();

        let model = Arc::new(ScriptedModel::always("m", EIGHT_QUESTIONS));
        let targets = SynthesisTargets::text_only(model.clone());
        let progress: ProgressCallback = Arc::new(NoopProgress);

        let summary =
            synthesize_document("doc", &storage, &targets, &fast_config(), &progress).await;

        assert_eq!(summary.records_total, 2);
        assert_eq!(summary.files_existing, 1);
        assert_eq!(summary.files_written, 1);
        assert_eq!(summary.questions_generated, 8);
        assert_eq!(summary.files_available(), 2);
        assert_eq!(model.calls(), 1);
        assert!(storage
            .question_file_path("doc", "page_2_processed")
            .exists());
    }

    #[tokio::test]
    async fn batch_pass_covers_every_document() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = storage(tmp.path());
        write_record_at(
            &storage.record_path("doc_a", "page_1"),
            &text_record(&["alpha"]),
        );
        write_record_at(
            &storage.record_path("doc_b", "page_1"),
            &text_record(&["beta"]),
        );

        let model = Arc::new(ScriptedModel::always("m", EIGHT_QUESTIONS));
        let targets = SynthesisTargets::text_only(model.clone());
        let progress: ProgressCallback = Arc::new(NoopProgress);

        let summary = synthesize_batch(&storage, &targets, &fast_config(), &progress).await;

        assert_eq!(summary.records_total, 2);
        assert_eq!(summary.files_written, 2);
        assert_eq!(summary.questions_generated, 16);
        assert_eq!(model.calls(), 2);
        assert!(storage.question_file_path("doc_a", "page_1_processed").exists());
        assert!(storage.question_file_path("doc_b", "page_1_processed").exists());
    }

    #[tokio::test]
    async fn unparseable_response_is_a_synthesis_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = storage(tmp.path());
        write_record_at(
            &storage.record_path("doc", "page_1"),
            &text_record(&["gamma"]),
        );

        let model = Arc::new(ScriptedModel::new(
            "m",
            vec![Ok("I cannot produce questions for this.".to_string())],
        ));
        let targets = SynthesisTargets::text_only(model);
        let progress: ProgressCallback = Arc::new(NoopProgress);

        let summary =
            synthesize_document("doc", &storage, &targets, &fast_config(), &progress).await;

        assert_eq!(summary.files_written, 0);
        assert_eq!(summary.failures.len(), 1);
        match &summary.failures[0] {
            PageFailure::Synthesis { page, attempts, .. } => {
                assert_eq!(page, "page_1_processed.json");
                assert_eq!(*attempts, 1);
            }
            other => panic!("expected synthesis failure, got {other:?}"),
        }
    }
}
