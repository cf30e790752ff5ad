//! Event normalization: pure extraction over arbitrary tool-result shapes.
//!
//! Tool results arrive as plain strings, arrays of typed content blocks, or
//! raw objects. All adapters funnel terminal output through this module so
//! downstream consumers never special-case a provider.

use serde_json::Value as JsonValue;

/// Field under which a tool result may advertise a spoken summary.
const VOICE_SUMMARY_FIELD: &str = "voice_summary";

/// Upper bound on derived voice hints, in characters.
const VOICE_HINT_MAX_CHARS: usize = 240;

/// Extracts one display string from a tool result.
#[must_use]
pub fn display_text(result: &JsonValue) -> String {
    match result {
        JsonValue::String(text) => text.clone(),
        JsonValue::Array(blocks) => join_text_blocks(blocks).unwrap_or_else(|| result.to_string()),
        JsonValue::Object(fields) => {
            if let Some(JsonValue::Array(blocks)) = fields.get("content") {
                if let Some(joined) = join_text_blocks(blocks) {
                    return joined;
                }
            }
            if let Some(JsonValue::String(text)) = fields.get("content") {
                return text.clone();
            }
            if let Some(JsonValue::String(text)) = fields.get("message") {
                return text.clone();
            }
            if let Some(JsonValue::String(text)) = fields.get("text") {
                return text.clone();
            }
            result.to_string()
        }
        other => other.to_string(),
    }
}

/// Joins the text carried by an array of typed content blocks. Returns
/// `None` when the array carries no text at all.
fn join_text_blocks(blocks: &[JsonValue]) -> Option<String> {
    let texts: Vec<&str> = blocks
        .iter()
        .filter_map(|block| match block {
            JsonValue::String(text) => Some(text.as_str()),
            JsonValue::Object(fields) => match (fields.get("type"), fields.get("text")) {
                (Some(JsonValue::String(kind)), Some(JsonValue::String(text)))
                    if kind == "text" =>
                {
                    Some(text.as_str())
                }
                _ => None,
            },
            _ => None,
        })
        .collect();

    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n"))
    }
}

/// Pulls a short voice hint from a tool result, when the result carries a
/// dedicated voice-summary field.
#[must_use]
pub fn voice_hint(result: &JsonValue) -> Option<String> {
    let summary = result.get(VOICE_SUMMARY_FIELD)?.as_str()?.trim();
    if summary.is_empty() {
        return None;
    }

    let hint: String = summary.chars().take(VOICE_HINT_MAX_CHARS).collect();
    Some(hint)
}
