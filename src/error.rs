use thiserror::Error;

/// Custom error type for Mull operations.
///
/// Variants map one-to-one onto the error codes of the MCP tool error
/// envelope (see `mcp::error`), so classification happens at construction
/// time rather than by string matching later.
#[derive(Debug, Error)]
pub enum MullError {
    /// Input validation failed. Caller's fault; no state change.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No session with the given id exists.
    #[error("Session '{session_id}' not found")]
    SessionNotFound { session_id: String },

    /// The session exists but has passed its inactivity timeout.
    #[error("Session '{session_id}' has expired")]
    SessionExpired { session_id: String },

    /// The session is in a terminal status and cannot be mutated.
    #[error("Session '{session_id}' is {status} and cannot be modified")]
    SessionTerminal { session_id: String, status: String },

    /// Requested template does not exist in the current snapshot.
    #[error("Template '{name}' not found")]
    TemplateNotFound { name: String },

    /// Requested flow type is not in the flow registry.
    #[error("Flow type '{flow_type}' not found")]
    FlowNotFound { flow_type: String },

    /// A step name does not exist in the named flow.
    #[error("Step '{step}' not found in flow '{flow_type}'")]
    StepNotFound { flow_type: String, step: String },

    /// A `for_each` reference could not be resolved against step outputs.
    #[error("Cannot resolve '{reference}' for step '{step}': {reason}")]
    ForEachResolution {
        step: String,
        reference: String,
        reason: String,
    },

    /// Persistent store operation failed (after the internal retry).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration is ill-formed or internally inconsistent.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Unexpected programming failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MullError {
    /// Stable error code used in the MCP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            MullError::Validation(_) => "ValidationError",
            MullError::SessionNotFound { .. } => "SessionNotFound",
            MullError::SessionExpired { .. } => "SessionExpired",
            MullError::SessionTerminal { .. } => "SessionTerminal",
            MullError::TemplateNotFound { .. } => "TemplateNotFound",
            MullError::FlowNotFound { .. } => "FlowNotFound",
            MullError::StepNotFound { .. } => "StepNotFound",
            MullError::ForEachResolution { .. } => "ForEachResolutionError",
            MullError::Storage(_) => "StorageError",
            // Config errors abort startup; if one ever reaches a tool call
            // it is a programming failure.
            MullError::Config(_) | MullError::Internal(_) => "InternalError",
        }
    }
}

impl From<surrealdb::Error> for MullError {
    fn from(err: surrealdb::Error) -> Self {
        MullError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for MullError {
    fn from(err: serde_json::Error) -> Self {
        MullError::Internal(format!("JSON serialization error: {}", err))
    }
}

impl From<serde_yaml::Error> for MullError {
    fn from(err: serde_yaml::Error) -> Self {
        MullError::Config(format!("YAML parse error: {}", err))
    }
}

impl From<std::io::Error> for MullError {
    fn from(err: std::io::Error) -> Self {
        MullError::Storage(format!("I/O error: {}", err))
    }
}
