//! Data model shared across the pipeline.
//!
//! Every type here round-trips through serde with the exact key names used
//! by the on-disk artifacts: layout JSON (`{input_path, boxes}`), per-page
//! extraction records (`{text, formulae, imgs}`), per-page question files
//! and the final deck.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PageFailure;
use crate::geometry::BBox;

/// UTC timestamp in the `2026-08-23T14:03:05Z` shape used by all artifacts.
pub(crate) fn utc_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

// ── Layout detection ──────────────────────────────────────────────────────

/// Region classes emitted by the layout detector.
///
/// Anything the detector invents beyond the known set lands in [`Other`]
/// and is ignored downstream.
///
/// [`Other`]: RegionLabel::Other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionLabel {
    Text,
    Header,
    Number,
    FigureTitle,
    Formula,
    Image,
    Figure,
    Table,
    #[serde(other)]
    Other,
}

impl RegionLabel {
    /// Lowercase name as used in crop file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionLabel::Text => "text",
            RegionLabel::Header => "header",
            RegionLabel::Number => "number",
            RegionLabel::FigureTitle => "figure_title",
            RegionLabel::Formula => "formula",
            RegionLabel::Image => "image",
            RegionLabel::Figure => "figure",
            RegionLabel::Table => "table",
            RegionLabel::Other => "other",
        }
    }
}

/// One labeled rectangle on a page, in page-pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub label: RegionLabel,
    /// `[x1, y1, x2, y2]`
    pub coordinate: [f32; 4],
    /// Page image this region was detected on. Layout files written before
    /// the field existed omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_page: Option<String>,
}

impl Region {
    pub fn new(label: RegionLabel, coordinate: [f32; 4]) -> Self {
        Self {
            label,
            coordinate,
            source_page: None,
        }
    }

    pub fn bbox(&self) -> BBox {
        BBox::from(self.coordinate)
    }
}

/// On-disk shape of one layout detection result (`json/<image>.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageLayout {
    /// Path of the page image the detector ran on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    #[serde(default)]
    pub boxes: Vec<Region>,
}

// ── Extraction ────────────────────────────────────────────────────────────

/// Per-page extraction output (`ocr_results/<stem>_processed.json`).
///
/// All three lists are always present, possibly empty, and keep the order
/// the regions were encountered in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRecord {
    #[serde(default)]
    pub text: Vec<String>,
    #[serde(default)]
    pub formulae: Vec<String>,
    #[serde(default)]
    pub imgs: Vec<String>,
}

impl ExtractionRecord {
    /// True when the page yielded neither text, formulae nor images.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.formulae.is_empty() && self.imgs.is_empty()
    }
}

// ── Questions ─────────────────────────────────────────────────────────────

/// One answer option of a multi-choice question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub choice: String,
    pub is_correct: bool,
}

/// A single study question, tagged by `question_type` in its JSON form.
///
/// `flashcard`, `cloze` and `true_false` carry a free-text `answer`
/// (`true_false` always the literal `"true"` or `"false"`); `multi_choice`
/// carries 3 to 4 options with exactly one marked correct plus a
/// `correct_choice` duplicate of that option's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "question_type", rename_all = "snake_case")]
pub enum Question {
    Flashcard {
        question: String,
        answer: String,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        img_path: Option<String>,
    },
    Cloze {
        question: String,
        answer: String,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        img_path: Option<String>,
    },
    TrueFalse {
        question: String,
        answer: String,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        img_path: Option<String>,
    },
    MultiChoice {
        question: String,
        options: Vec<ChoiceOption>,
        correct_choice: String,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        img_path: Option<String>,
    },
}

impl Question {
    /// The `question_type` tag this variant serializes under.
    pub fn type_name(&self) -> &'static str {
        match self {
            Question::Flashcard { .. } => "flashcard",
            Question::Cloze { .. } => "cloze",
            Question::TrueFalse { .. } => "true_false",
            Question::MultiChoice { .. } => "multi_choice",
        }
    }

    pub fn question(&self) -> &str {
        match self {
            Question::Flashcard { question, .. }
            | Question::Cloze { question, .. }
            | Question::TrueFalse { question, .. }
            | Question::MultiChoice { question, .. } => question,
        }
    }

    pub fn tags(&self) -> &[String] {
        match self {
            Question::Flashcard { tags, .. }
            | Question::Cloze { tags, .. }
            | Question::TrueFalse { tags, .. }
            | Question::MultiChoice { tags, .. } => tags,
        }
    }

    pub fn img_path(&self) -> Option<&str> {
        match self {
            Question::Flashcard { img_path, .. }
            | Question::Cloze { img_path, .. }
            | Question::TrueFalse { img_path, .. }
            | Question::MultiChoice { img_path, .. } => img_path.as_deref(),
        }
    }

    pub fn img_path_mut(&mut self) -> &mut Option<String> {
        match self {
            Question::Flashcard { img_path, .. }
            | Question::Cloze { img_path, .. }
            | Question::TrueFalse { img_path, .. }
            | Question::MultiChoice { img_path, .. } => img_path,
        }
    }

    /// The stand-in card a deck receives when every page came back empty.
    pub fn placeholder() -> Self {
        Question::Flashcard {
            question: "This is a placeholder question. Please regenerate questions.".to_string(),
            answer: "Placeholder answer".to_string(),
            tags: vec!["placeholder".to_string()],
            img_path: None,
        }
    }
}

/// Per-page question file (`questions/<doc>/<stem>_questions.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionFile {
    pub questions: Vec<Question>,
    pub metadata: QuestionFileMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionFileMetadata {
    /// The extraction record the questions were generated from.
    pub source_file: String,
    pub created_at: String,
    pub model_used: String,
    pub question_count: usize,
}

// ── Decks ─────────────────────────────────────────────────────────────────

/// Unique deck identifier, a v4 UUID. Doubles as the job id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeckId(Uuid);

impl DeckId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        DeckId(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(DeckId)
    }
}

impl fmt::Display for DeckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeckMetadata {
    pub deck_id: DeckId,
    pub deck_name: String,
    pub created_at: String,
    pub updated_at: String,
    pub question_count: usize,
}

/// The final artifact: all questions of a batch under one id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deck {
    pub metadata: DeckMetadata,
    pub questions: Vec<Question>,
}

impl Deck {
    /// Assemble a deck. `created_at` and `updated_at` start out equal.
    pub fn assemble(deck_id: DeckId, deck_name: &str, questions: Vec<Question>) -> Self {
        let created_at = utc_timestamp();
        Deck {
            metadata: DeckMetadata {
                deck_id,
                deck_name: deck_name.to_string(),
                created_at: created_at.clone(),
                updated_at: created_at,
                question_count: questions.len(),
            },
            questions,
        }
    }
}

// ── Job tracking ──────────────────────────────────────────────────────────

/// Lifecycle of a deck-building job. `processing` is the only non-terminal
/// state; `unknown` is synthesized by status queries for ids nobody is
/// tracking and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Processing,
    Complete,
    Failed,
    Unknown,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Complete | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobState::Processing => "processing",
            JobState::Complete => "complete",
            JobState::Failed => "failed",
            JobState::Unknown => "unknown",
        })
    }
}

/// Status snapshot returned by queries and kept on the status board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub status: JobState,
    pub message: String,
}

impl JobStatus {
    pub fn processing(message: impl Into<String>) -> Self {
        JobStatus {
            status: JobState::Processing,
            message: message.into(),
        }
    }

    pub fn complete(message: impl Into<String>) -> Self {
        JobStatus {
            status: JobState::Complete,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        JobStatus {
            status: JobState::Failed,
            message: message.into(),
        }
    }

    pub fn unknown() -> Self {
        JobStatus {
            status: JobState::Unknown,
            message: "Unknown deck ID".to_string(),
        }
    }
}

/// What a finished pipeline run hands back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct DeckSummary {
    pub deck_id: DeckId,
    pub deck_name: String,
    pub deck_path: PathBuf,
    pub question_count: usize,
    /// Document directories that went through extraction.
    pub documents: usize,
    /// Pages that produced an extraction record.
    pub pages_extracted: usize,
    /// Per-page question files written.
    pub question_files: usize,
    /// Pages that dropped out, with reasons.
    pub failures: Vec<PageFailure>,
}
