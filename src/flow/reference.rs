//! `"<step_name>.<property>"` references used by `for_each`.
//!
//! References are parsed once at config load so malformed strings are
//! rejected there instead of mid-flow.

use serde::{Deserialize, Serialize};

/// A parsed `for_each` reference: the producer step and the property of its
/// structured output holding the array to fan out over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForEachRef {
    pub step: String,
    pub property: String,
}

impl ForEachRef {
    /// Parse `"step.property"`. Both parts must be non-empty identifiers;
    /// exactly one dot.
    pub fn parse(src: &str) -> Result<Self, String> {
        let mut parts = src.splitn(2, '.');
        let step = parts.next().unwrap_or("");
        let property = parts.next().unwrap_or("");
        if step.is_empty() || property.is_empty() {
            return Err(format!(
                "for_each reference '{}' must have the form '<step_name>.<property>'",
                src
            ));
        }
        if property.contains('.') {
            return Err(format!(
                "for_each reference '{}' has a nested property; only one level is supported",
                src
            ));
        }
        let ident_ok = |s: &str| {
            s.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        };
        if !ident_ok(step) || !ident_ok(property) {
            return Err(format!("for_each reference '{}' contains invalid characters", src));
        }
        Ok(Self {
            step: step.to_string(),
            property: property.to_string(),
        })
    }
}

impl std::fmt::Display for ForEachRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.step, self.property)
    }
}
