//! Output-language fidelity.
//!
//! A cheap Unicode-script heuristic decides the target script of the
//! trigger text; after the first parse, user-visible fields are validated
//! against it and one corrective retry is issued on mismatch.

use serde::Serialize;
use tracing::info;

/// Minimum share of alphabetic characters the dominant script must hold
/// before we consider the detection reliable.
const CONFIDENCE_FLOOR: f64 = 0.6;
/// Minimum alphabetic characters before detection is attempted at all.
const MIN_ALPHA_CHARS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Script {
    Latin,
    Hebrew,
    Arabic,
    Cyrillic,
    Greek,
    Han,
    Kana,
    Hangul,
    Thai,
    Devanagari,
}

impl Script {
    pub fn display_name(&self) -> &'static str {
        match self {
            Script::Latin => "Latin",
            Script::Hebrew => "Hebrew",
            Script::Arabic => "Arabic",
            Script::Cyrillic => "Cyrillic",
            Script::Greek => "Greek",
            Script::Han => "Chinese (Han)",
            Script::Kana => "Japanese (Kana)",
            Script::Hangul => "Korean (Hangul)",
            Script::Thai => "Thai",
            Script::Devanagari => "Devanagari",
        }
    }
}

fn script_of(c: char) -> Option<Script> {
    let cp = c as u32;
    match cp {
        0x0041..=0x024F => Some(Script::Latin),
        0x0370..=0x03FF => Some(Script::Greek),
        0x0400..=0x04FF => Some(Script::Cyrillic),
        0x0590..=0x05FF => Some(Script::Hebrew),
        0x0600..=0x06FF | 0x0750..=0x077F => Some(Script::Arabic),
        0x0900..=0x097F => Some(Script::Devanagari),
        0x0E00..=0x0E7F => Some(Script::Thai),
        0x3040..=0x30FF => Some(Script::Kana),
        0x4E00..=0x9FFF | 0x3400..=0x4DBF => Some(Script::Han),
        0xAC00..=0xD7AF => Some(Script::Hangul),
        _ => None,
    }
}

/// A reliably detected target language/script for the run's output.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LanguageTarget {
    pub script: Script,
    pub confidence: f64,
}

/// Detect the dominant script of `text`. `None` when the input is too
/// short or too mixed to be language-reliable.
pub fn detect(text: &str) -> Option<LanguageTarget> {
    let mut counts: Vec<(Script, usize)> = Vec::new();
    let mut total = 0usize;

    for c in text.chars() {
        if let Some(script) = script_of(c) {
            total += 1;
            match counts.iter_mut().find(|(s, _)| *s == script) {
                Some((_, n)) => *n += 1,
                None => counts.push((script, 1)),
            }
        }
    }

    if total < MIN_ALPHA_CHARS {
        return None;
    }

    let (script, count) = counts.into_iter().max_by_key(|(_, n)| *n)?;
    let confidence = count as f64 / total as f64;
    if confidence < CONFIDENCE_FLOOR {
        return None;
    }
    Some(LanguageTarget { script, confidence })
}

/// The explicit output-language instruction appended to the prompt.
pub fn instruction(target: &LanguageTarget) -> String {
    format!(
        "Write every user-visible field (title, description, location) in the \
         same language as the trigger message, using the {} script.",
        target.script.display_name()
    )
}

/// Outcome of validating one parse against the target.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub pass: bool,
    pub checked_fields: usize,
    pub mismatched_fields: Vec<String>,
}

/// Validate that each non-empty field is dominated by the target script.
/// Fields without alphabetic content (times, numbers) always pass.
pub fn validate(target: &LanguageTarget, fields: &[(&str, &str)]) -> ValidationOutcome {
    let mut mismatched = Vec::new();
    let mut checked = 0usize;

    for (name, value) in fields {
        if value.trim().is_empty() {
            continue;
        }
        checked += 1;
        if let Some(dominant) = detect(value) {
            if dominant.script != target.script {
                mismatched.push((*name).to_string());
            }
        }
        // undetectable field content (too short / symbols only) passes
    }

    ValidationOutcome {
        pass: mismatched.is_empty(),
        checked_fields: checked,
        mismatched_fields: mismatched,
    }
}

/// Every validation outcome is logged, pass or fail.
pub fn log_outcome(agent: &str, outcome: &ValidationOutcome) {
    info!(
        checked = outcome.checked_fields,
        mismatches = ?outcome.mismatched_fields,
        "LanguagePolicy[{}]: validation={}",
        agent,
        if outcome.pass { "pass" } else { "fail" }
    );
}

/// The corrective clause for the single retry.
pub fn retry_instruction(target: &LanguageTarget, outcome: &ValidationOutcome) -> String {
    format!(
        "Correction: your previous answer put these fields in the wrong language: {}. \
         Redo the action with ALL user-visible fields written in the {} script.",
        outcome.mismatched_fields.join(", "),
        target.script.display_name()
    )
}
