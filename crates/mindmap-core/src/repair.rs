//! Layered parsing for structured model replies.
//!
//! Model output that was asked to be "a single JSON object" is not guaranteed
//! to be one. Each layer is tried in order and the first one that yields an
//! object wins:
//!
//! 1. parse the reply as-is (strict, then lenient)
//! 2. extract the first balanced top-level `{...}` substring
//! 3. repair: escape raw control characters inside open strings, drop
//!    trailing commas, close unterminated strings and brackets
//!
//! If all three fail the reply is rejected with [`MindmapError::MalformedReply`].

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{MindmapError, MindmapResult};

/// Parse a structured reply into a JSON object, repairing it if needed.
pub fn parse_structured_reply(raw: &str) -> MindmapResult<Map<String, Value>> {
    let text = strip_code_fence(raw);

    if let Some(obj) = parse_object(text) {
        return Ok(obj);
    }

    if let Some(slice) = extract_balanced_object(text) {
        if let Some(obj) = parse_object(slice) {
            debug!("structured reply recovered by object extraction");
            return Ok(obj);
        }
    }

    if let Some(repaired) = repair_json(text) {
        if let Some(obj) = parse_object(&repaired) {
            debug!("structured reply recovered by repair pass");
            return Ok(obj);
        }
    }

    Err(MindmapError::MalformedReply(preview(raw)))
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    let value = serde_json::from_str::<Value>(text)
        .ok()
        .or_else(|| serde_json_lenient::from_str::<Value>(text).ok())?;
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// Drop a surrounding markdown code fence (```json ... ```), if any.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Return the first balanced `{...}` substring, honoring string literals and
/// escapes so braces inside strings do not count.
pub fn extract_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Best-effort repair of a truncated or sloppy JSON object.
///
/// Returns `None` when there is no opening brace to start from.
pub fn repair_json(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut out = String::with_capacity(text.len() + 8);
    let mut closers: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in text[start..].chars() {
        if in_string {
            if escaped {
                out.push(ch);
                escaped = false;
                continue;
            }
            match ch {
                '\\' => {
                    out.push(ch);
                    escaped = true;
                }
                '"' => {
                    out.push(ch);
                    in_string = false;
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if c.is_control() => {}
                c => out.push(c),
            }
            continue;
        }

        match ch {
            '"' => {
                out.push(ch);
                in_string = true;
            }
            '{' => {
                out.push(ch);
                closers.push('}');
            }
            '[' => {
                out.push(ch);
                closers.push(']');
            }
            '}' | ']' => {
                if closers.last() != Some(&ch) {
                    // Stray closer; skip it rather than unbalance the output.
                    continue;
                }
                trim_trailing_comma(&mut out);
                out.push(ch);
                closers.pop();
                if closers.is_empty() {
                    return Some(out);
                }
            }
            c => out.push(c),
        }
    }

    if escaped {
        out.pop();
    }
    if in_string {
        out.push('"');
    }
    trim_trailing_comma(&mut out);
    if out.ends_with(':') {
        out.push_str("null");
    }
    while let Some(closer) = closers.pop() {
        out.push(closer);
    }
    Some(out)
}

fn trim_trailing_comma(out: &mut String) {
    let kept = out.trim_end().len();
    out.truncate(kept);
    if out.ends_with(',') {
        out.pop();
    }
}

fn preview(raw: &str) -> String {
    const MAX: usize = 120;
    let trimmed = raw.trim();
    if trimmed.chars().count() <= MAX {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(MAX).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clean_object() {
        let obj = parse_structured_reply(r#"{"classification": "CONTINUE"}"#).unwrap();
        assert_eq!(obj["classification"], "CONTINUE");
    }

    #[test]
    fn test_parse_code_fenced_object() {
        let raw = "```json\n{\"summary\": \"ok\"}\n```";
        let obj = parse_structured_reply(raw).unwrap();
        assert_eq!(obj["summary"], "ok");
    }

    #[test]
    fn test_extracts_object_from_prose() {
        let raw = r#"Sure! Here is the result: {"title": "TCP {basics}", "intent": "learn"} Hope it helps."#;
        let obj = parse_structured_reply(raw).unwrap();
        assert_eq!(obj["title"], "TCP {basics}");
        assert_eq!(obj["intent"], "learn");
    }

    #[test]
    fn test_extract_balanced_ignores_braces_in_strings() {
        let text = r#"x {"a": "}\"{", "b": {"c": 1}} y"#;
        assert_eq!(
            extract_balanced_object(text),
            Some(r#"{"a": "}\"{", "b": {"c": 1}}"#)
        );
    }

    #[test]
    fn test_repairs_missing_brace_and_raw_newline() {
        let raw = "{\"classification\": \"NEW_CHILD\", \"confidence\": 0.7, \
                   \"reasoning\": \"first line\nsecond line\", \
                   \"new_blocks\": [{\"title\": \"Slow start\", \"intent\": \"Explain slow start\"}]";
        let obj = parse_structured_reply(raw).unwrap();
        assert_eq!(obj["classification"], "NEW_CHILD");
        assert_eq!(obj["reasoning"], "first line\nsecond line");
        assert_eq!(obj["new_blocks"][0]["title"], "Slow start");
    }

    #[test]
    fn test_repairs_unterminated_string() {
        let raw = r#"{"summary": "cut off mid sent"#;
        let obj = parse_structured_reply(raw).unwrap();
        assert_eq!(obj["summary"], "cut off mid sent");
    }

    #[test]
    fn test_repairs_trailing_commas() {
        let repaired = repair_json(r#"{"key_points": ["a", "b",], "x": 1,"#).unwrap();
        assert_eq!(repaired, r#"{"key_points": ["a", "b"], "x": 1}"#);
    }

    #[test]
    fn test_rejects_garbage() {
        let err = parse_structured_reply("no json here at all").unwrap_err();
        assert!(matches!(err, MindmapError::MalformedReply(_)));
    }

    #[test]
    fn test_rejects_non_object_json() {
        assert!(parse_structured_reply("[1, 2, 3]").is_err());
    }
}
