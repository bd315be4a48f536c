//! Prompt text for question synthesis.
//!
//! One fixed instruction block demands exactly 8 questions in a strict
//! JSON shape; [`build_question_prompt`] appends the page content and, when
//! the page carries figure crops, their paths as plain text. Image bytes
//! are never attached: providers that cannot mix modalities would reject
//! them, and the paths alone let the model wire `img_path` correctly.

/// System message for every synthesis call.
pub const SYNTHESIS_SYSTEM_PROMPT: &str = "You are a specialized educational content creator that generates high-quality flashcards and questions.";

/// Vision-capable model id commonly used with Groq deployments. Passed to
/// [`crate::config::PipelineConfigBuilder::vision_model`] by callers that
/// want the image-aware swap the hosted setup used.
pub const GROQ_VISION_MODEL: &str = "meta-llama/llama-4-scout-17b-16e-instruct";

/// Instruction block sent ahead of the page content.
pub const QUESTION_PROMPT_HEADER: &str = r#"You are a specialized flashcard generator. Your task is to create EXACTLY 8 high-quality educational questions based on the provided content.

CRITICAL: You MUST output valid JSON with no markdown formatting or explanatory text. Output only the JSON object.

REQUIRED OUTPUT FORMAT:
{
  "questions": [
    {
      "question_type": "string",  // Must be one of these exact types: "flashcard", "cloze", "true_false", "multi_choice"
      "question": "string",       // The actual question text
      "answer": "string",         // For flashcard, cloze, true_false types
      "tags": ["string"],         // Array of relevant topic tags (2-5 tags)
      "img_path": "string|null",  // Path to related image if question refers to an image, otherwise null

      // FOR MULTI_CHOICE QUESTIONS ONLY - include these additional fields:
      "options": [
        {
          "choice": "string",     // Text of this option
          "is_correct": boolean   // Must be true for the correct answer, false for others
        },
        // Include 3-4 options total, with exactly ONE having is_correct: true
      ],
      "correct_choice": "string"  // Duplicate of the correct option text for easy reference
    },
    // ALWAYS generate exactly 8 questions total
  ]
}

VALID QUESTION TYPES AND FORMATS:

1. Flashcard (question -> answer):
{
  "question_type": "flashcard",
  "question": "What is the capital of France?",
  "answer": "Paris",
  "tags": ["geography", "capitals", "europe"],
  "img_path": null
}

2. Cloze (fill-in-the-blank):
{
  "question_type": "cloze",
  "question": "_____ is the largest planet in our solar system.",
  "answer": "Jupiter",
  "tags": ["astronomy", "planets", "solar system"],
  "img_path": null
}

3. True/False:
{
  "question_type": "true_false",
  "question": "The Pacific Ocean is the largest ocean on Earth.",
  "answer": "true",
  "tags": ["geography", "oceans"],
  "img_path": null
}

4. Multi-choice:
{
  "question_type": "multi_choice",
  "question": "Which of the following is a prime number?",
  "options": [
    {"choice": "4", "is_correct": false},
    {"choice": "7", "is_correct": true},
    {"choice": "9", "is_correct": false},
    {"choice": "15", "is_correct": false}
  ],
  "correct_choice": "7",
  "tags": ["mathematics", "numbers", "prime numbers"],
  "img_path": null
}

IMPORTANT: Your output MUST be a single, valid JSON object that can be parsed directly."#;

/// Guidance appended after the page content.
const PROMPT_FOOTER: &str = r#"You may use the provided image(s) to frame questions. If a question relates to an image,
set the "img_path" field to the path of the image used as reference. Otherwise, set it to null.

Return ONLY valid JSON without any explanation or markdown formatting."#;

/// Assemble the user prompt for one page.
pub fn build_question_prompt(content: &str, image_paths: &[String]) -> String {
    let mut prompt = format!("{QUESTION_PROMPT_HEADER}\n\nContent:\n{content}\n\n{PROMPT_FOOTER}");

    if !image_paths.is_empty() {
        prompt.push_str("\n\nAvailable images:\n");
        for (i, path) in image_paths.iter().enumerate() {
            prompt.push_str(&format!("Image {}: {}\n", i + 1, path));
        }
    }

    prompt
}
