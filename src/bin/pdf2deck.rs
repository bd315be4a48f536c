//! CLI binary for pdf2deck.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, wires tesseract-backed engines and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use image::RgbImage;
use indicatif::{ProgressBar, ProgressStyle};
use pdf2deck::{
    deck_status, run_pipeline, AppContext, DeckId, DeckProgressCallback, EngineError, Engines,
    FormulaRecognizer, JobState, LayoutDetector, PipelineConfig, Region, RegionLabel, Source,
    StatusBoard, StoragePaths, TextRecognizer,
};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

/// Truncate very long messages to keep the log tidy.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max - 1).collect();
        format!("{head}\u{2026}")
    } else {
        s.to_string()
    }
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one spinner line tracking the current stage plus
/// per-page log lines. The page total is not known up front (pages only
/// exist after rasterization), so the spinner never becomes a counted bar.
struct CliProgress {
    bar: ProgressBar,
    files: AtomicUsize,
    failures: AtomicUsize,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Building");
        bar.set_message("Starting…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            files: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        })
    }
}

impl DeckProgressCallback for CliProgress {
    fn on_stage(&self, _deck_id: &str, message: &str) {
        self.bar.set_message(message.to_string());
        self.bar.println(format!("{} {}", cyan("◆"), bold(message)));
    }

    fn on_page_extracted(&self, doc: &str, page: &str) {
        self.bar
            .println(format!("  {} extracted {}", green("✓"), dim(&format!("{doc}/{page}"))));
    }

    fn on_questions_generated(&self, page: &str, count: usize) {
        self.files.fetch_add(1, Ordering::SeqCst);
        self.bar
            .println(format!("  {} {:>2} questions  {}", green("✓"), count, dim(page)));
    }

    fn on_page_failed(&self, page: &str, detail: &str) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        self.bar
            .println(format!("  {} {}  {}", red("✗"), page, red(&truncate(detail, 80))));
    }

    fn on_deck_complete(&self, _deck_id: &str, question_count: usize) {
        self.bar.finish_and_clear();
        let failed = self.failures.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!(
                "{} deck ready with {} questions",
                green("✔"),
                bold(&question_count.to_string())
            );
        } else {
            eprintln!(
                "{} deck ready with {} questions  ({} page(s) dropped)",
                cyan("⚠"),
                bold(&question_count.to_string()),
                red(&failed.to_string()),
            );
        }
    }

    fn on_job_failed(&self, _deck_id: &str, error: &str) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", red("✘"), red(error));
    }
}

// ── Tesseract-backed engines ─────────────────────────────────────────────────

fn tesseract_spawn_error(binary: &str, e: io::Error) -> EngineError {
    EngineError::new(format!(
        "Failed to run tesseract (is it installed? path='{binary}'): {e}"
    ))
}

fn tesseract_output_error(output: &std::process::Output) -> EngineError {
    EngineError::new(format!(
        "tesseract exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr).trim()
    ))
}

/// Check that the tesseract binary answers `--version`.
fn tesseract_available(binary: &str) -> bool {
    Command::new(binary)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Layout analysis via `tesseract … tsv`: level-2 rows are text blocks.
///
/// Tesseract does not classify figures or formulae, so every region comes
/// back as `text`; a page with no detectable blocks falls back to one
/// full-page region so the recognizer still sees it.
struct TesseractLayout {
    binary: String,
    language: String,
}

impl LayoutDetector for TesseractLayout {
    fn detect(&self, image_path: &Path) -> Result<Vec<Region>, EngineError> {
        let output = Command::new(&self.binary)
            .arg(image_path.as_os_str())
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .arg("tsv")
            .output()
            .map_err(|e| tesseract_spawn_error(&self.binary, e))?;
        if !output.status.success() {
            return Err(tesseract_output_error(&output));
        }

        let mut regions = parse_block_rows(&String::from_utf8_lossy(&output.stdout));
        if regions.is_empty() {
            let (w, h) = image::image_dimensions(image_path).map_err(|e| {
                EngineError::new(format!("cannot read {}: {}", image_path.display(), e))
            })?;
            regions.push(Region::new(
                RegionLabel::Text,
                [0.0, 0.0, w as f32, h as f32],
            ));
        }
        Ok(regions)
    }
}

/// Pull `[left, top, left+width, top+height]` out of tesseract TSV block
/// rows (`level == 2`). The first line is the column header.
fn parse_block_rows(tsv: &str) -> Vec<Region> {
    let mut regions = Vec::new();
    for line in tsv.lines().skip(1) {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 10 || cols[0] != "2" {
            continue;
        }
        let nums: Option<Vec<f32>> = cols[6..10].iter().map(|c| c.parse::<f32>().ok()).collect();
        if let Some(n) = nums {
            regions.push(Region::new(
                RegionLabel::Text,
                [n[0], n[1], n[0] + n[2], n[1] + n[3]],
            ));
        }
    }
    regions
}

/// Plain-text OCR for one crop, written to a temp PNG and handed to the
/// tesseract CLI.
struct TesseractOcr {
    binary: String,
    language: String,
}

impl TextRecognizer for TesseractOcr {
    fn recognize(&self, crop: &RgbImage) -> Result<Vec<String>, EngineError> {
        let tmp = tempfile::Builder::new()
            .prefix("pdf2deck-crop-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| EngineError::new(format!("cannot create temp file: {e}")))?;
        crop.save(tmp.path())
            .map_err(|e| EngineError::new(format!("cannot encode crop: {e}")))?;

        let output = Command::new(&self.binary)
            .arg(tmp.path().as_os_str())
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .output()
            .map_err(|e| tesseract_spawn_error(&self.binary, e))?;
        if !output.status.success() {
            return Err(tesseract_output_error(&output));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// The tesseract CLI has no LaTeX mode; formula crops contribute nothing
/// in CLI runs. (The layout above never emits formula regions anyway.)
struct NoFormulaOcr;

impl FormulaRecognizer for NoFormulaOcr {
    fn recognize(&self, _crop: &RgbImage) -> Result<Vec<String>, EngineError> {
        Ok(Vec::new())
    }
}

// ── CLI surface ──────────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Build a deck from one PDF
  pdf2deck create "Biology 101" lectures/chapter1.pdf

  # Mix PDFs and page scans
  pdf2deck create "Organic Chemistry" notes.pdf scan_p1.png scan_p2.jpg

  # Download the source material
  pdf2deck create "Attention" https://arxiv.org/pdf/1706.03762

  # Use a specific model
  pdf2deck create "Physics" slides.pdf --model gpt-4.1 --provider openai

  # Vision-capable model for pages that carry figures
  pdf2deck create "Anatomy" atlas.pdf --vision-model gpt-4o

  # Check on a deck later (scripts: --json)
  pdf2deck status 6e1f1dd8-6a0a-4f39-b1f5-7fa31f151dde --json

SUPPORTED PROVIDERS & MODELS:
  Provider     Model                     Input $/1M  Output $/1M
  ─────────    ────────────────────────  ──────────  ───────────
  openai       gpt-4.1-nano (default)    $0.10       $0.40
  openai       gpt-4.1-mini              $0.40       $1.60
  openai       gpt-4.1                   $2.00       $8.00
  anthropic    claude-sonnet-4-20250514  $3.00       $15.00
  gemini       gemini-2.0-flash          $0.10       $0.40
  ollama       llama3.2, qwen2.5         free        free

COST ESTIMATE (50-page document):
  ~900 input tokens/page x 50 pages = 45K input tokens
  ~1,200 output tokens/page x 50 pages = 60K output tokens

  gpt-4.1-nano:  ~$0.03 total
  gpt-4.1-mini:  ~$0.11 total

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY            OpenAI API key
  ANTHROPIC_API_KEY         Anthropic API key
  GEMINI_API_KEY            Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER    Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL           Override model ID
  PDF2DECK_LLM_CONCURRENCY  Concurrent LLM calls during question synthesis
  PDF2DECK_TESSERACT        Tesseract binary used for layout analysis and OCR
  PDFIUM_LIB_PATH           Path to an existing libpdfium (skips auto-download)
  PDFIUM_FETCH_CACHE_DIR    Override the default pdfium cache directory

SETUP:
  1. Install tesseract:  apt install tesseract-ocr   (or: brew install tesseract)
  2. Set an API key:     export OPENAI_API_KEY=sk-...
  3. Build a deck:       pdf2deck create "Biology 101" chapter1.pdf

  PDFium (~30 MB) is downloaded automatically the first time a PDF source
  is used and cached in ~/.cache/pdf2deck/pdfium-7690/. To use an existing
  copy: PDFIUM_LIB_PATH=/path/to/libpdfium pdf2deck ...
"#;

/// Turn scanned study material into flashcard decks.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2deck",
    version,
    about = "Turn scanned PDFs and page images into flashcard decks",
    long_about = "Build flashcard decks from scanned course material. Pages are rasterized \
with PDFium, segmented and OCRed with tesseract, and turned into questions by an LLM \
(OpenAI, Anthropic, Google Gemini, Azure OpenAI, or any OpenAI-compatible endpoint).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2DECK_VERBOSE", global = true)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2DECK_QUIET", global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a deck from PDF files, page images or URLs.
    Create(CreateArgs),
    /// Look up a deck build by id.
    Status(StatusArgs),
}

/// Directory layout shared by the subcommands.
#[derive(Args, Debug)]
struct StorageArgs {
    /// Working directory for in-flight batches.
    #[arg(long, env = "PDF2DECK_WORK_DIR", default_value = "pdf2deck-work")]
    work_dir: PathBuf,

    /// Directory finished decks are written to.
    #[arg(long, env = "PDF2DECK_DECKS_DIR", default_value = "decks")]
    decks_dir: PathBuf,

    /// Directory relocated question images are written to.
    #[arg(long, env = "PDF2DECK_IMAGES_DIR", default_value = "decks/images")]
    images_dir: PathBuf,
}

#[derive(Args, Debug)]
struct CreateArgs {
    /// Deck name.
    name: String,

    /// PDF files, page images (png/jpg) or HTTP/HTTPS URLs.
    #[arg(required = true)]
    sources: Vec<String>,

    #[command(flatten)]
    storage: StorageArgs,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(
        long,
        env = "EDGEQUAKE_MODEL",
        long_help = "LLM model for question synthesis. Default: gpt-4.1-nano ($0.10/$0.40 per 1M tokens).\n\
          Popular choices: gpt-4.1-mini ($0.40/$1.60), gpt-4.1 ($2/$8), claude-sonnet-4-20250514 ($3/$15)."
    )]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_LLM_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Vision-capable model used for pages that carry figures.
    #[arg(long, env = "PDF2DECK_VISION_MODEL")]
    vision_model: Option<String>,

    /// Rasterization DPI (72-600).
    #[arg(long, env = "PDF2DECK_DPI", default_value_t = 350,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Number of concurrent LLM calls.
    #[arg(short, long, env = "PDF2DECK_LLM_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Blocking OCR workers per document (default: min(4, cores)).
    #[arg(long, env = "PDF2DECK_OCR_WORKERS")]
    ocr_workers: Option<usize>,

    /// LLM temperature (0.0-2.0).
    #[arg(long, env = "PDF2DECK_TEMPERATURE", default_value_t = 0.3)]
    temperature: f32,

    /// Max LLM output tokens per page.
    #[arg(long, env = "PDF2DECK_MAX_TOKENS", default_value_t = 4000)]
    max_tokens: usize,

    /// Total LLM attempts per page, first try included.
    #[arg(long, env = "PDF2DECK_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2DECK_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Tesseract binary used for layout analysis and OCR.
    #[arg(long, env = "PDF2DECK_TESSERACT", default_value = "tesseract")]
    tesseract: String,

    /// Tesseract language code.
    #[arg(long, env = "PDF2DECK_OCR_LANG", default_value = "eng")]
    ocr_lang: String,

    /// Output the run summary as JSON.
    #[arg(long, env = "PDF2DECK_JSON")]
    json: bool,

    /// Disable progress output.
    #[arg(long, env = "PDF2DECK_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct StatusArgs {
    /// Deck id returned by `create`.
    deck_id: String,

    #[command(flatten)]
    storage: StorageArgs,

    /// Output the status as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress display is
    // active; the spinner provides the feedback that matters.
    let show_progress = match &cli.command {
        Commands::Create(args) => !cli.quiet && !args.no_progress && !args.json,
        Commands::Status(_) => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Create(args) => create(args, cli.quiet, show_progress).await,
        Commands::Status(args) => status(args),
    }
}

async fn create(args: CreateArgs, quiet: bool, show_progress: bool) -> Result<()> {
    let started = Instant::now();
    let sources: Vec<Source> = args.sources.iter().map(|s| Source::from_arg(s)).collect();

    // ── Ensure PDFium is available ───────────────────────────────────────
    // Only batches that can contain a PDF need the engine; pure image
    // batches skip the download entirely. On the very first PDF run the
    // library (~30 MB) comes from bblanchon/pdfium-binaries and lands in
    // ~/.cache/pdf2deck/pdfium-{VERSION}/; later startups are an instant
    // path check.
    let may_need_pdfium = args.sources.iter().any(|s| {
        let lower = s.to_ascii_lowercase();
        lower.ends_with(".pdf") || lower.starts_with("http://") || lower.starts_with("https://")
    });
    if may_need_pdfium && !pdfium_fetch::is_pdfium_cached() {
        fetch_pdfium(quiet).await?;
    }

    if !tesseract_available(&args.tesseract) {
        anyhow::bail!(
            "tesseract not found at '{}'. Install it (e.g. apt install tesseract-ocr) \
             or point --tesseract at the binary.",
            args.tesseract
        );
    }

    // ── Build config, engines and context ────────────────────────────────
    let mut builder = PipelineConfig::builder()
        .dpi(args.dpi)
        .llm_concurrency(args.concurrency)
        .temperature(args.temperature)
        .max_tokens(args.max_tokens)
        .max_attempts(args.max_attempts)
        .download_timeout_secs(args.download_timeout);
    if let Some(n) = args.ocr_workers {
        builder = builder.ocr_workers(n);
    }
    if let Some(ref model) = args.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref vision) = args.vision_model {
        builder = builder.vision_model(vision);
    }
    let config = builder.build().context("Invalid configuration")?;

    let engines = Engines::new(
        Arc::new(TesseractLayout {
            binary: args.tesseract.clone(),
            language: args.ocr_lang.clone(),
        }),
        Arc::new(TesseractOcr {
            binary: args.tesseract.clone(),
            language: args.ocr_lang.clone(),
        }),
        Arc::new(NoFormulaOcr),
    );

    // Batch roots are scoped per job so concurrent runs never share
    // working state.
    let deck_id = DeckId::new();
    let storage = StoragePaths::new(
        args.storage.work_dir.join(format!("batch-{deck_id}")),
        args.storage.decks_dir.clone(),
        args.storage.images_dir.clone(),
    );

    let mut ctx = AppContext::new(config, storage, engines);
    if show_progress {
        ctx = ctx.with_progress(CliProgress::new());
    }

    // ── Run the pipeline to completion ───────────────────────────────────
    let summary = run_pipeline(&ctx, deck_id, &args.name, sources)
        .await
        .context("Deck build failed")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
        );
        return Ok(());
    }

    // The progress callback already printed the green tick; add the
    // pointers a human or a script wants next.
    if !quiet {
        if !show_progress {
            eprintln!(
                "deck '{}' created with {} questions",
                summary.deck_name, summary.question_count
            );
        }
        eprintln!("   deck id    {}", bold(&summary.deck_id.to_string()));
        eprintln!(
            "   deck file  {}",
            bold(&summary.deck_path.display().to_string())
        );
        eprintln!(
            "   {} document(s), {} page(s) extracted, {} question file(s)  {}",
            summary.documents,
            summary.pages_extracted,
            summary.question_files,
            dim(&format!("{:.1}s", started.elapsed().as_secs_f64())),
        );
        for failure in &summary.failures {
            eprintln!("   {} {}", red("✗"), truncate(&failure.to_string(), 100));
        }
    }
    println!("{}", summary.deck_id);
    Ok(())
}

fn status(args: StatusArgs) -> Result<()> {
    let storage = StoragePaths::new(
        args.storage.work_dir.clone(),
        args.storage.decks_dir.clone(),
        args.storage.images_dir.clone(),
    );
    // A fresh process has no board entries; the deck file alone answers.
    let status = deck_status(&storage, &StatusBoard::new(), &args.deck_id);

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).context("Failed to serialize status")?
        );
        return Ok(());
    }

    let mark = match status.status {
        JobState::Complete => green("✔"),
        JobState::Processing => cyan("◆"),
        JobState::Failed => red("✘"),
        JobState::Unknown => dim("?"),
    };
    println!("{} {}  {}", mark, bold(&status.status.to_string()), status.message);
    Ok(())
}

/// First-run download of the PDFium shared library, with a byte-level
/// progress bar unless quiet.
async fn fetch_pdfium(quiet: bool) -> Result<()> {
    if quiet {
        tokio::task::block_in_place(|| pdfium_fetch::ensure_pdfium_library(None))
            .context("Failed to download PDFium engine")?;
        return Ok(());
    }

    let dl_bar = ProgressBar::new(0);
    dl_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
    );
    dl_bar.set_prefix("PDF engine");
    dl_bar.set_message("Connecting…");
    dl_bar.enable_steady_tick(Duration::from_millis(80));

    let bar = dl_bar.clone();
    // block_in_place keeps the closure's borrow valid (no 'static bound)
    // while the download runs off the async hot path.
    tokio::task::block_in_place(|| {
        pdfium_fetch::ensure_pdfium_library(Some(&|downloaded, total| {
            if let Some(t) = total {
                if bar.length().unwrap_or(0) != t {
                    bar.set_length(t);
                }
            }
            bar.set_position(downloaded);
        }))
    })
    .context("Failed to download PDFium engine")?;

    dl_bar.finish_with_message("ready ✓");
    Ok(())
}
