//! Token estimation and text compaction for agent memory.
//!
//! Uses character-based heuristics calibrated for LLM tokenizers:
//! - English prose: ~3.2 chars/token (conservative — overestimate is safer)
//! - JSON/structured content: ~2.8 chars/token (denser due to punctuation, short keys)

use crate::inference::types::{ChatMessage, Role};

// ─── Constants ──────────────────────────────────────────────────────────────

/// Average characters per token for English prose.
const CHARS_PER_TOKEN: f64 = 3.2;

/// Average characters per token for JSON/structured content.
const JSON_CHARS_PER_TOKEN: f64 = 2.8;

/// Per-message overhead (role label, formatting tokens).
const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

/// Overhead for tool call JSON structure (per call).
const TOOL_CALL_OVERHEAD_TOKENS: u32 = 10;

// ─── UTF-8 Safe Truncation ──────────────────────────────────────────────────

/// Truncate a string to at most `max_bytes` bytes on a valid UTF-8 char boundary.
pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    // Walk backward to find a valid char boundary
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ─── Estimation ─────────────────────────────────────────────────────────────

/// Estimate the token count for a string of natural language text.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.len() as f64;
    (chars / CHARS_PER_TOKEN).ceil() as u32
}

/// Estimate the token count for JSON/structured content.
pub fn estimate_json_tokens(json_text: &str) -> u32 {
    let chars = json_text.len() as f64;
    (chars / JSON_CHARS_PER_TOKEN).ceil() as u32
}

/// Estimate the token count for a `ChatMessage`.
///
/// Tool results and tool-call arguments use the JSON estimator; everything
/// else uses the prose estimator.
pub fn estimate_message_tokens(message: &ChatMessage) -> u32 {
    let mut total = MESSAGE_OVERHEAD_TOKENS;

    if let Some(ref content) = message.content {
        total += match message.role {
            Role::Tool => estimate_json_tokens(content),
            _ => estimate_tokens(content),
        };
    }

    if let Some(ref calls) = message.tool_calls {
        for call in calls {
            total += TOOL_CALL_OVERHEAD_TOKENS;
            total += estimate_tokens(&call.function.name);
            total += estimate_json_tokens(&call.function.arguments);
        }
    }

    total
}

// ─── Compaction ─────────────────────────────────────────────────────────────

/// Summarize a tool result into a one-line string.
///
/// Used when old tool results are compressed in agent memory.
pub fn summarize_tool_result(tool_name: &str, result: &str) -> String {
    let token_count = estimate_json_tokens(result);

    if token_count <= 50 {
        format!("[{tool_name} returned: {result}]")
    } else {
        let preview = truncate_utf8(result, 100);
        format!("[{tool_name} returned ~{token_count} tokens: {preview}...]")
    }
}

/// Cap a tool result at `max_chars`, appending a truncation notice.
///
/// Preserves the beginning of the result, which usually carries the most
/// useful information.
pub fn truncate_tool_result(result: &str, tool_name: &str, max_chars: usize) -> String {
    if result.len() <= max_chars {
        return result.to_string();
    }

    let truncated = truncate_utf8(result, max_chars);
    tracing::warn!(
        tool = %tool_name,
        original_len = result.len(),
        truncated_to = truncated.len(),
        "tool result truncated"
    );
    format!(
        "{truncated}\n\n[... truncated: showing first {} of {} chars]",
        truncated.len(),
        result.len()
    )
}

/// One-line preview of a piece of text, for summaries and logs.
pub fn preview(text: &str, max_bytes: usize) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.len() <= max_bytes {
        single_line
    } else {
        format!("{}…", truncate_utf8(&single_line, max_bytes))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::types::ToolCall;

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_estimate_tokens_short() {
        // "hello" = 5 chars → ceil(5/3.2) = 2
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn test_estimate_json_tokens() {
        // 16 chars → ceil(16/2.8) = 6
        assert_eq!(estimate_json_tokens(r#"{"path": "/tmp"}"#), 6);
    }

    #[test]
    fn test_estimate_message_tokens_content_only() {
        // 4 overhead + ceil(13/3.2) = 9
        assert_eq!(estimate_message_tokens(&ChatMessage::user("Hello, world!")), 9);
    }

    #[test]
    fn test_estimate_message_tokens_with_tool_calls() {
        let msg = ChatMessage::assistant_tool_calls(&[ToolCall {
            id: "call_1".into(),
            name: "filesystem.list_dir".into(),
            arguments: serde_json::json!({"path": "/tmp"}),
        }]);
        assert!(
            estimate_message_tokens(&msg) > MESSAGE_OVERHEAD_TOKENS + TOOL_CALL_OVERHEAD_TOKENS
        );
    }

    #[test]
    fn test_summarize_tool_result_short() {
        let summary = summarize_tool_result("filesystem.list_dir", r#"{"files":["a.txt"]}"#);
        assert!(summary.starts_with("[filesystem.list_dir returned:"));
    }

    #[test]
    fn test_summarize_tool_result_long() {
        let long: Vec<String> = (0..200).map(|i| format!("file_{i}.txt")).collect();
        let result = serde_json::to_string(&long).unwrap();
        let summary = summarize_tool_result("filesystem.list_dir", &result);
        assert!(summary.contains("tokens:"));
        assert!(summary.ends_with("...]"));
    }

    #[test]
    fn test_summarize_tool_result_unicode_no_panic() {
        let report = format!("{}{}", "═".repeat(50), "REPORT");
        let summary = summarize_tool_result("audit.report", &report);
        assert!(summary.contains("audit.report"));
    }

    #[test]
    fn test_truncate_tool_result_short() {
        assert_eq!(truncate_tool_result("ok", "t", 10), "ok");
    }

    #[test]
    fn test_truncate_tool_result_long() {
        let out = truncate_tool_result(&"x".repeat(50), "t", 10);
        assert!(out.starts_with(&"x".repeat(10)));
        assert!(out.contains("showing first 10 of 50 chars"));
    }

    #[test]
    fn test_truncate_utf8_within_multibyte() {
        // '═' is 3 bytes; cutting at byte 4 lands inside the second one
        assert_eq!(truncate_utf8("═══", 4), "═");
        assert_eq!(truncate_utf8("═══", 6), "══");
    }

    #[test]
    fn test_preview_collapses_whitespace() {
        assert_eq!(preview("a\n  b\tc", 20), "a b c");
        assert_eq!(preview("abcdefgh", 3), "abc…");
    }
}
