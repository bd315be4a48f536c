//! Validation and coercion of recovered question candidates.
//!
//! Candidates arrive as loose JSON values. Normalization turns each into
//! a typed [`Question`] or drops it, applying the repair rules the rest of
//! the system relies on: every surviving question has a known type,
//! non-empty tags, a total true/false answer, and a multi-choice option
//! set with exactly one correct entry.

use serde_json::Value;
use tracing::warn;

use crate::model::{ChoiceOption, Question};

/// Question type tags accepted as-is; anything else becomes a flashcard.
const VALID_TYPES: &[&str] = &["flashcard", "cloze", "true_false", "multi_choice"];

/// Normalize a recovered candidate list into typed questions.
///
/// A list made up entirely of strings is the classic degenerate payload
/// (the model returned topics, not questions) and yields nothing.
pub fn normalize_batch(candidates: &[Value]) -> Vec<Question> {
    if !candidates.is_empty() && candidates.iter().all(Value::is_string) {
        warn!("payload is a list of strings, not question objects");
        return Vec::new();
    }

    candidates.iter().filter_map(normalize_question).collect()
}

/// Normalize one candidate, or drop it.
///
/// Candidates must be objects carrying both `question_type` and
/// `question`; everything else about them is repairable.
pub fn normalize_question(raw: &Value) -> Option<Question> {
    let obj = raw.as_object()?;
    if !obj.contains_key("question_type") || !obj.contains_key("question") {
        warn!("dropping candidate without question_type/question");
        return None;
    }

    let question = value_to_string(&obj["question"]);
    let mut question_type = obj["question_type"].as_str().unwrap_or("flashcard");
    if !VALID_TYPES.contains(&question_type) {
        warn!(question_type, "unknown question type, defaulting to flashcard");
        question_type = "flashcard";
    }

    let tags = normalize_tags(obj.get("tags"));
    let img_path = obj
        .get("img_path")
        .and_then(Value::as_str)
        .map(str::to_string);

    let q = match question_type {
        "multi_choice" => {
            let (options, correct_choice) = repair_options(obj);
            Question::MultiChoice {
                question,
                options,
                correct_choice,
                tags,
                img_path,
            }
        }
        "true_false" => Question::TrueFalse {
            question,
            answer: normalize_true_false(&answer_string(obj)).to_string(),
            tags,
            img_path,
        },
        "cloze" => Question::Cloze {
            question,
            answer: answer_string(obj),
            tags,
            img_path,
        },
        _ => Question::Flashcard {
            question,
            answer: answer_string(obj),
            tags,
            img_path,
        },
    };
    Some(q)
}

/// Flatten any of the shapes a question set shows up in, recursively:
/// an object with a `questions` key, a list of question objects, or lists
/// of lists of either. Lists of bare strings are degenerate payloads and
/// contribute nothing.
pub fn flatten_question_payload(data: &Value) -> Vec<Value> {
    match data {
        Value::Array(items) => {
            if !items.is_empty() && items.iter().all(Value::is_string) {
                warn!("question set is a list of strings, discarding");
                return Vec::new();
            }
            if !items.is_empty() && items.iter().all(Value::is_array) {
                return items.iter().flat_map(flatten_question_payload).collect();
            }
            items
                .iter()
                .filter(|item| item.is_object() && item.get("question").is_some())
                .cloned()
                .collect()
        }
        Value::Object(map) => match map.get("questions") {
            Some(questions) => flatten_question_payload(questions),
            None => Vec::new(),
        },
        _ => Vec::new(),
    }
}

// ── Field repair ──────────────────────────────────────────────────────────

fn normalize_tags(tags: Option<&Value>) -> Vec<String> {
    let fallback = || vec!["general".to_string()];
    match tags {
        Some(Value::Array(items)) => {
            let collected: Vec<String> = items
                .iter()
                .filter(|v| !v.is_null())
                .map(value_to_string)
                .filter(|s| !s.is_empty())
                .collect();
            if collected.is_empty() {
                fallback()
            } else {
                collected
            }
        }
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => fallback(),
    }
}

/// Total mapping of free-text truth values onto the two literals.
pub fn normalize_true_false(answer: &str) -> &'static str {
    match answer.trim().to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => "true",
        _ => "false",
    }
}

fn answer_string(obj: &serde_json::Map<String, Value>) -> String {
    obj.get("answer").map(value_to_string).unwrap_or_default()
}

/// Rebuild a usable option set for a multi-choice candidate. Four cases,
/// tried in order; the result always has exactly one correct option and a
/// matching `correct_choice`.
fn repair_options(obj: &serde_json::Map<String, Value>) -> (Vec<ChoiceOption>, String) {
    let mut options: Vec<ChoiceOption> = Vec::new();
    let mut correct: Option<String> = None;

    // Case 1: options already in object form.
    if let Some(Value::Array(raw_options)) = obj.get("options") {
        for opt in raw_options {
            let Some(map) = opt.as_object() else { continue };
            let (Some(choice), Some(flag)) = (map.get("choice"), map.get("is_correct")) else {
                continue;
            };
            let choice = value_to_string(choice);
            let is_marked = json_truthy(flag);
            // First marked option wins; later marks are demoted so the
            // exactly-one-correct invariant holds.
            let is_correct = is_marked && correct.is_none();
            if is_correct {
                correct = Some(choice.clone());
            }
            options.push(ChoiceOption { choice, is_correct });
        }
    }

    // Case 2: options as bare strings, matched against the answer.
    if options.is_empty() {
        if let Some(Value::Array(raw_options)) = obj.get("options") {
            let answer = answer_string(obj);
            for opt in raw_options {
                let Some(text) = opt.as_str() else { continue };
                let is_correct = correct.is_none() && text == answer;
                if is_correct {
                    correct = Some(text.to_string());
                }
                options.push(ChoiceOption {
                    choice: text.to_string(),
                    is_correct,
                });
            }
        }
    }

    // Case 3: no options, but an answer to build around.
    if options.is_empty() {
        if let Some(answer) = obj.get("answer").map(value_to_string).filter(|a| !a.is_empty()) {
            options = vec![
                ChoiceOption {
                    choice: answer.clone(),
                    is_correct: true,
                },
                ChoiceOption {
                    choice: format!("Not {answer}"),
                    is_correct: false,
                },
                ChoiceOption {
                    choice: format!("Alternative to {answer}"),
                    is_correct: false,
                },
            ];
            correct = Some(answer);
        }
    }

    // Case 4: nothing to work with at all.
    if options.is_empty() {
        options = vec![
            ChoiceOption {
                choice: "Option A".to_string(),
                is_correct: true,
            },
            ChoiceOption {
                choice: "Option B".to_string(),
                is_correct: false,
            },
            ChoiceOption {
                choice: "Option C".to_string(),
                is_correct: false,
            },
        ];
        correct = Some("Option A".to_string());
    }

    // String options may have matched nothing; force a correct entry.
    if !options.iter().any(|o| o.is_correct) {
        options[0].is_correct = true;
        correct = Some(options[0].choice.clone());
    }

    let correct_choice = correct.unwrap_or_else(|| options[0].choice.clone());
    (options, correct_choice)
}

// ── Value coercion ────────────────────────────────────────────────────────

/// Stringify a scalar the way the artifacts expect; `null` becomes the
/// empty string, containers their JSON text.
fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Loose truthiness for model-emitted flags (`"true"`, `1`, `true`, …).
fn json_truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn multi(v: Value) -> (Vec<ChoiceOption>, String) {
        match normalize_question(&v).unwrap() {
            Question::MultiChoice {
                options,
                correct_choice,
                ..
            } => (options, correct_choice),
            other => panic!("expected multi_choice, got {}", other.type_name()),
        }
    }

    fn assert_exactly_one_correct(options: &[ChoiceOption], correct_choice: &str) {
        let marked: Vec<_> = options.iter().filter(|o| o.is_correct).collect();
        assert_eq!(marked.len(), 1, "want exactly one correct option");
        assert_eq!(marked[0].choice, correct_choice);
    }

    #[test]
    fn candidates_missing_required_fields_are_dropped() {
        assert!(normalize_question(&json!({"question": "Q?"})).is_none());
        assert!(normalize_question(&json!({"question_type": "flashcard"})).is_none());
        assert!(normalize_question(&json!("just a string")).is_none());
        assert!(normalize_question(&json!(["nested"])).is_none());
    }

    #[test]
    fn unknown_type_becomes_flashcard() {
        let q = normalize_question(&json!({
            "question_type": "jeopardy",
            "question": "Q?",
            "answer": "A"
        }))
        .unwrap();
        assert_eq!(q.type_name(), "flashcard");
    }

    #[test]
    fn tags_are_repaired_to_a_nonempty_list() {
        let q = |tags: Value| {
            normalize_question(&json!({
                "question_type": "flashcard",
                "question": "Q?",
                "tags": tags
            }))
            .unwrap()
            .tags()
            .to_vec()
        };
        assert_eq!(q(json!(["a", "b"])), vec!["a", "b"]);
        assert_eq!(q(json!("solo")), vec!["solo"]);
        assert_eq!(q(json!(42)), vec!["general"]);
        assert_eq!(q(json!([])), vec!["general"]);
        assert_eq!(q(json!([null, ""])), vec!["general"]);

        let missing = normalize_question(&json!({
            "question_type": "flashcard",
            "question": "Q?"
        }))
        .unwrap();
        assert_eq!(missing.tags(), ["general"]);
    }

    #[test]
    fn true_false_normalization_is_total() {
        for yes in ["true", "True", "T", "yes", "YES", "y", "1", " true "] {
            assert_eq!(normalize_true_false(yes), "true", "input {yes:?}");
        }
        for no in ["false", "no", "n", "0", "", "maybe", "2", "correct"] {
            assert_eq!(normalize_true_false(no), "false", "input {no:?}");
        }
    }

    #[test]
    fn true_false_answer_is_rewritten() {
        let q = normalize_question(&json!({
            "question_type": "true_false",
            "question": "Water boils at 100C at sea level.",
            "answer": "Yes"
        }))
        .unwrap();
        match q {
            Question::TrueFalse { answer, .. } => assert_eq!(answer, "true"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn missing_answer_coerces_to_empty_string() {
        let q = normalize_question(&json!({
            "question_type": "flashcard",
            "question": "Q?"
        }))
        .unwrap();
        match q {
            Question::Flashcard { answer, .. } => assert_eq!(answer, ""),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn multi_choice_keeps_well_formed_options() {
        let (options, correct) = multi(json!({
            "question_type": "multi_choice",
            "question": "Pick one",
            "options": [
                {"choice": "4", "is_correct": false},
                {"choice": "7", "is_correct": true},
                {"choice": "9", "is_correct": false}
            ]
        }));
        assert_eq!(options.len(), 3);
        assert_eq!(correct, "7");
        assert_exactly_one_correct(&options, &correct);
    }

    #[test]
    fn multi_choice_demotes_duplicate_correct_marks() {
        let (options, correct) = multi(json!({
            "question_type": "multi_choice",
            "question": "Pick one",
            "options": [
                {"choice": "a", "is_correct": true},
                {"choice": "b", "is_correct": true}
            ]
        }));
        assert_eq!(correct, "a");
        assert_exactly_one_correct(&options, &correct);
    }

    #[test]
    fn multi_choice_matches_string_options_against_answer() {
        let (options, correct) = multi(json!({
            "question_type": "multi_choice",
            "question": "Pick one",
            "options": ["red", "green", "blue"],
            "answer": "green"
        }));
        assert_eq!(options.len(), 3);
        assert_eq!(correct, "green");
        assert_exactly_one_correct(&options, &correct);
    }

    #[test]
    fn multi_choice_synthesizes_options_from_answer() {
        let (options, correct) = multi(json!({
            "question_type": "multi_choice",
            "question": "Capital of France?",
            "answer": "Paris"
        }));
        let choices: Vec<_> = options.iter().map(|o| o.choice.as_str()).collect();
        assert_eq!(choices, vec!["Paris", "Not Paris", "Alternative to Paris"]);
        assert_eq!(correct, "Paris");
        assert_exactly_one_correct(&options, &correct);
    }

    #[test]
    fn multi_choice_falls_back_to_placeholder_options() {
        let (options, correct) = multi(json!({
            "question_type": "multi_choice",
            "question": "Pick one"
        }));
        let choices: Vec<_> = options.iter().map(|o| o.choice.as_str()).collect();
        assert_eq!(choices, vec!["Option A", "Option B", "Option C"]);
        assert_eq!(correct, "Option A");
        assert_exactly_one_correct(&options, &correct);
    }

    #[test]
    fn multi_choice_forces_a_correct_option_when_none_matched() {
        let (options, correct) = multi(json!({
            "question_type": "multi_choice",
            "question": "Pick one",
            "options": ["red", "green"],
            "answer": "purple"
        }));
        assert_eq!(correct, "red");
        assert_exactly_one_correct(&options, &correct);
    }

    #[test]
    fn batch_of_strings_is_garbage() {
        let candidates = vec![json!("topic one"), json!("topic two")];
        assert!(normalize_batch(&candidates).is_empty());
    }

    #[test]
    fn batch_keeps_valid_and_drops_invalid() {
        let candidates = vec![
            json!({"question_type": "flashcard", "question": "Q1?", "answer": "A1"}),
            json!({"no_fields": true}),
            json!({"question_type": "cloze", "question": "___", "answer": "x"}),
        ];
        let questions = normalize_batch(&candidates);
        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].question(), "Q1?");
        assert_eq!(questions[1].type_name(), "cloze");
    }

    #[test]
    fn flatten_recurses_through_wrappers() {
        let q = json!({"question": "Q?", "answer": "A"});
        assert_eq!(flatten_question_payload(&json!({"questions": [q]})).len(), 1);
        assert_eq!(
            flatten_question_payload(&json!({"questions": {"questions": [q]}})).len(),
            1
        );
        assert_eq!(flatten_question_payload(&json!([[q, q], [q]])).len(), 3);
    }

    #[test]
    fn flatten_discards_garbage_shapes() {
        assert!(flatten_question_payload(&json!(["a", "b"])).is_empty());
        assert!(flatten_question_payload(&json!({"metadata": {}})).is_empty());
        assert!(flatten_question_payload(&json!(null)).is_empty());
        assert!(flatten_question_payload(&json!([{"no_question": 1}])).is_empty());
    }
}
