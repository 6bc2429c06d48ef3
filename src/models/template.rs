use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Output contract a template declares for the host LLM's reply.
///
/// `Json` replies go through structured extraction (see `flow::output`);
/// `Text` replies are kept verbatim only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    #[default]
    Text,
    Json,
}

/// Where a template body came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    /// Compiled into the binary.
    Builtin,
    /// Inline `body:` in the config file.
    Inline,
    /// Loaded from a file referenced by the config.
    File(PathBuf),
}

/// A prompt template: an opaque body with `{ident}` placeholders plus the
/// metadata needed to validate and render it.
///
/// Bodies are never executed or recursively expanded; substitution is the
/// only transformation applied.
#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    pub description: String,
    /// Parameters that must be supplied on every render.
    pub required_params: Vec<String>,
    /// Parameters that may be supplied; absent ones render as empty string.
    pub optional_params: Vec<String>,
    pub expected_output: OutputKind,
    pub body: String,
    pub source: TemplateSource,
}

/// Scan `body` for `{ident}` placeholders, deduplicated in order of first
/// appearance. Only identifier-shaped markers count, so JSON braces inside
/// bodies are inert.
pub fn placeholders_in(body: &str) -> Vec<String> {
    let bytes = body.as_bytes();
    let mut found: Vec<String> = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len()
                && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
            {
                end += 1;
            }
            if end > start
                && end < bytes.len()
                && bytes[end] == b'}'
                && !bytes[start].is_ascii_digit()
            {
                let name = &body[start..end];
                if !found.iter().any(|f| f == name) {
                    found.push(name.to_string());
                }
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }
    found
}
