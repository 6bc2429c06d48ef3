//! Structured error envelope for MCP tool calls.
//!
//! Every failure crosses the tool boundary as this envelope; no untyped
//! error ever reaches the host. Each error code carries actionable
//! recovery suggestions so the host LLM can self-correct.

use schemars::JsonSchema;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::MullError;

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ErrorEnvelope {
    /// Always `true`; lets hosts distinguish the envelope from a
    /// `ToolResult` without schema introspection.
    pub error: bool,
    pub error_code: String,
    pub error_message: String,
    pub details: Map<String, Value>,
    pub recovery_suggestions: Vec<String>,
}

impl From<&MullError> for ErrorEnvelope {
    fn from(err: &MullError) -> Self {
        let code = err.code();
        let mut details = Map::new();
        match err {
            MullError::SessionNotFound { session_id }
            | MullError::SessionExpired { session_id } => {
                details.insert("session_id".into(), Value::String(session_id.clone()));
            }
            MullError::SessionTerminal { session_id, status } => {
                details.insert("session_id".into(), Value::String(session_id.clone()));
                details.insert("status".into(), Value::String(status.clone()));
            }
            MullError::TemplateNotFound { name } => {
                details.insert("template".into(), Value::String(name.clone()));
            }
            MullError::FlowNotFound { flow_type } => {
                details.insert("flow_type".into(), Value::String(flow_type.clone()));
            }
            MullError::StepNotFound { flow_type, step } => {
                details.insert("flow_type".into(), Value::String(flow_type.clone()));
                details.insert("step".into(), Value::String(step.clone()));
            }
            MullError::ForEachResolution {
                step, reference, ..
            } => {
                details.insert("step".into(), Value::String(step.clone()));
                details.insert("reference".into(), Value::String(reference.clone()));
            }
            _ => {}
        }

        Self {
            error: true,
            error_code: code.to_string(),
            error_message: err.to_string(),
            details,
            recovery_suggestions: suggestions_for(code),
        }
    }
}

impl From<MullError> for ErrorEnvelope {
    fn from(err: MullError) -> Self {
        Self::from(&err)
    }
}

/// Recovery suggestion catalogue, keyed by error code. Every code gets at
/// least one suggestion.
fn suggestions_for(code: &str) -> Vec<String> {
    let suggestions: &[&str] = match code {
        "ValidationError" => &[
            "Check the input fields against the tool schema",
            "Topic must be 1..=1000 characters; quality_score must be in [0,1]",
        ],
        "SessionNotFound" => &[
            "Verify the session id",
            "Call start_thinking to begin a new session",
        ],
        "SessionExpired" => &[
            "The session passed its inactivity timeout",
            "Call start_thinking to begin a new session on the same topic",
        ],
        "SessionTerminal" => &[
            "This session is finished and cannot be modified",
            "Call start_thinking to begin a new session",
        ],
        "TemplateNotFound" => &[
            "The referenced template is not in the current snapshot",
            "Check the template name, or reload the configuration",
        ],
        "FlowNotFound" => &[
            "Pass one of the loaded flow types to start_thinking",
            "Omit flow_type to use the configured default flow",
        ],
        "StepNotFound" => &[
            "The step name does not exist in this session's flow",
            "Use a step name previously returned in the `step` field",
        ],
        "ForEachResolutionError" => &[
            "The producer step did not return parseable structured output",
            "Re-run the producer step via next_step with a valid JSON reply, \
             then continue",
        ],
        "StorageError" => &[
            "A persistent store operation failed after a retry",
            "Retry the call; if it persists, inspect the database file",
        ],
        _ => &[
            "Unexpected server error; retry the call",
            "If it persists, report the error message to the operator",
        ],
    };
    suggestions.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_code_and_suggestions() {
        let err = MullError::SessionNotFound {
            session_id: "abc".into(),
        };
        let envelope = ErrorEnvelope::from(&err);
        assert!(envelope.error);
        assert_eq!(envelope.error_code, "SessionNotFound");
        assert_eq!(envelope.details["session_id"], Value::String("abc".into()));
        assert!(!envelope.recovery_suggestions.is_empty());
    }

    #[test]
    fn every_code_has_suggestions() {
        for code in [
            "ValidationError",
            "SessionNotFound",
            "SessionExpired",
            "SessionTerminal",
            "TemplateNotFound",
            "FlowNotFound",
            "StepNotFound",
            "ForEachResolutionError",
            "StorageError",
            "InternalError",
        ] {
            assert!(!suggestions_for(code).is_empty(), "no suggestions for {code}");
        }
    }

    #[test]
    fn envelope_serializes_with_error_flag() {
        let envelope = ErrorEnvelope::from(MullError::Validation("bad topic".into()));
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["error"], Value::Bool(true));
        assert_eq!(json["error_code"], "ValidationError");
        assert!(json["recovery_suggestions"].as_array().unwrap().len() >= 1);
    }
}
