//! MCP surface: the four thinking tools and their external contract.

pub mod error;
pub mod server;
pub mod tools;
pub mod types;

pub use error::ErrorEnvelope;
pub use server::{run_mcp_server, MullServer};
pub use types::{
    AnalysisType, AnalyzeStepInput, CompleteThinkingInput, Complexity, NextStepInput,
    QualityFeedback, StartThinkingInput, ToolReply, ToolResult,
};
