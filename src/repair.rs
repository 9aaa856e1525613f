//! Lenient JSON recovery for model replies.
//!
//! Models are told to emit single-line JSON fields but do not always comply.
//! [`parse_lenient`] walks an escalating ladder of repairs and returns the
//! first successful parse:
//!
//! 1. strip code fences and parse strictly
//! 2. replace raw newlines that sit inside string literals
//! 3. aggressive cleanup of every newline, tab and `\n` escape
//! 4. cut at the last `}` and parse what remains
//!
//! Stage 3 is lossy: it also flattens `\n` escapes the model wrote on purpose.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, trace};

static FENCE_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*```[a-zA-Z0-9_-]*[ \t]*\r?\n?").expect("valid regex"));

static FENCE_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\r?\n?```\s*$").expect("valid regex"));

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Which rung of the ladder produced the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStage {
    Strict,
    SmartNewlines,
    AggressiveCleanup,
    TruncationRecovery,
}

/// Every stage failed. Carries the strict parse error.
#[derive(Debug, thiserror::Error)]
#[error("unrecoverable JSON reply: {source}")]
pub struct RepairError {
    #[source]
    pub source: serde_json::Error,
}

/// Remove surrounding ``` fences (with or without a language tag).
pub fn strip_code_fences(raw: &str) -> String {
    let opened = FENCE_OPEN.replace(raw, "");
    let closed = FENCE_CLOSE.replace(&opened, "");
    closed.trim().to_string()
}

/// Replace raw `\n`/`\r` with a space, but only inside string literals.
///
/// Quote boundaries are tracked character by character, honouring `\"`
/// escapes; structural whitespace is left alone.
pub fn fix_newlines_in_strings(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => {
                out.push(c);
                escaped = true;
            }
            '"' => {
                in_string = !in_string;
                out.push(c);
            }
            '\n' | '\r' if in_string => out.push(' '),
            _ => out.push(c),
        }
    }
    out
}

/// Collapse every run of whitespace into one space.
fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RUN.replace_all(text, " ").trim().to_string()
}

/// Flatten literal `\n` escapes, real newlines and tabs, then collapse runs.
pub fn aggressive_cleanup(text: &str) -> String {
    let flattened = text
        .replace("\\n", " ")
        .replace("\\r", " ")
        .replace(['\n', '\r', '\t'], " ");
    collapse_whitespace(&flattened)
}

/// Cut after the last `}` to drop a trailing, half-written tail.
pub fn truncate_to_last_brace(text: &str) -> Option<String> {
    let end = text.rfind('}')?;
    Some(collapse_whitespace(&text[..=end]))
}

/// Parse a model reply, escalating through the repair ladder.
pub fn parse_lenient(raw: &str) -> Result<(Value, RepairStage), RepairError> {
    let stripped = strip_code_fences(raw);

    let strict_err = match serde_json::from_str::<Value>(&stripped) {
        Ok(v) => return Ok((v, RepairStage::Strict)),
        Err(e) => e,
    };
    trace!(error = %strict_err, "strict JSON parse failed");

    let smart = fix_newlines_in_strings(&stripped);
    if let Ok(v) = serde_json::from_str::<Value>(&smart) {
        debug!("JSON recovered by in-string newline fix");
        return Ok((v, RepairStage::SmartNewlines));
    }

    let aggressive = aggressive_cleanup(&stripped);
    if let Ok(v) = serde_json::from_str::<Value>(&aggressive) {
        debug!("JSON recovered by aggressive cleanup");
        return Ok((v, RepairStage::AggressiveCleanup));
    }

    if let Some(cut) = truncate_to_last_brace(&stripped) {
        if let Ok(v) = serde_json::from_str::<Value>(&cut) {
            debug!("JSON recovered by truncation");
            return Ok((v, RepairStage::TruncationRecovery));
        }
    }

    Err(RepairError { source: strict_err })
}
