//! Structured-output extraction from free-text host replies.
//!
//! Hosts rarely return bare JSON; the recovery sequence is:
//! 1. parse the whole reply as JSON;
//! 2. parse the contents of a ```json fenced block;
//! 3. parse the first balanced `{…}` substring.
//!
//! The raw text is always retained by the caller; extraction failure only
//! matters when a later `for_each` step consumes the output.

use serde_json::Value;

/// Try to extract a JSON object (or array) from `reply`.
pub fn extract_json(reply: &str) -> Option<Value> {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        if v.is_object() || v.is_array() {
            return Some(v);
        }
    }

    if let Some(block) = fenced_json_block(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(block.trim()) {
            if v.is_object() || v.is_array() {
                return Some(v);
            }
        }
    }

    if let Some(candidate) = first_balanced_object(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(candidate) {
            return Some(v);
        }
    }

    None
}

/// Contents of the first ```json fenced code block, if any.
fn fenced_json_block(text: &str) -> Option<&str> {
    let open = text.find("```json")?;
    let body_start = open + "```json".len();
    let rest = &text[body_start..];
    let close = rest.find("```")?;
    Some(&rest[..close])
}

/// First balanced `{…}` substring, tracking string literals so braces inside
/// quoted values do not unbalance the scan.
fn first_balanced_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
