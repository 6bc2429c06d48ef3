use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::mcp::error::ErrorEnvelope;

/// Maximum accepted topic length, in characters.
pub const MAX_TOPIC_CHARS: usize = 1000;

/// Complexity knob supplied by the host; drives conditionals and template
/// parameters, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    #[default]
    Moderate,
    Complex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Moderate => "moderate",
            Complexity::Complex => "complex",
        }
    }
}

/// Analysis dimension for `analyze_step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    #[default]
    Quality,
    Format,
    Completeness,
    Bias,
    Logic,
}

impl AnalysisType {
    /// Name of the template rendered for this analysis.
    pub fn template_name(&self) -> &'static str {
        match self {
            AnalysisType::Quality => "analysis_quality",
            AnalysisType::Format => "analysis_format",
            AnalysisType::Completeness => "analysis_completeness",
            AnalysisType::Bias => "analysis_bias",
            AnalysisType::Logic => "analysis_logic",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Quality => "quality",
            AnalysisType::Format => "format",
            AnalysisType::Completeness => "completeness",
            AnalysisType::Bias => "bias",
            AnalysisType::Logic => "logic",
        }
    }
}

/// Input for `start_thinking`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct StartThinkingInput {
    /// Main topic or question to analyze (1..=1000 characters).
    pub topic: String,
    /// Complexity level: simple, moderate (default) or complex.
    #[serde(default)]
    pub complexity: Option<Complexity>,
    /// Optional focus or angle for the analysis.
    #[serde(default)]
    pub focus: Option<String>,
    /// Thinking flow to run; defaults to the configured default flow.
    #[serde(default)]
    pub flow_type: Option<String>,
}

/// Quality feedback the host derived (typically from an `analyze_step`
/// round-trip).
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct QualityFeedback {
    /// Score in [0,1] for the step result being submitted.
    pub quality_score: f64,
    /// Free-text feedback.
    #[serde(default)]
    pub feedback: Option<String>,
    /// Specific areas to improve on a retry.
    #[serde(default)]
    pub improvement_areas: Option<Vec<String>>,
}

/// Input for `next_step`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct NextStepInput {
    /// Session identifier from `start_thinking`.
    pub session_id: String,
    /// The host LLM's output for the current step, verbatim.
    pub step_result: String,
    /// Optional quality feedback; a low score can trigger a retry of the
    /// same step.
    #[serde(default)]
    pub quality_feedback: Option<QualityFeedback>,
}

/// Input for `analyze_step`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AnalyzeStepInput {
    /// Session identifier.
    pub session_id: String,
    /// Name of the flow step whose output is being analyzed.
    pub step_name: String,
    /// The step output to analyze.
    pub step_result: String,
    /// Analysis dimension (default: quality).
    #[serde(default)]
    pub analysis_type: AnalysisType,
}

/// Input for `complete_thinking`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CompleteThinkingInput {
    /// Session identifier.
    pub session_id: String,
    /// Final insights to fold into the summary report.
    #[serde(default)]
    pub final_insights: Option<String>,
}

/// Success payload common to all four tools.
///
/// The shape is part of the external contract and must not grow or lose
/// fields without versioning.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ToolResult {
    pub tool_name: String,
    pub session_id: String,
    /// Step the host is now expected to perform, or `"__complete__"`.
    pub step: String,
    /// Rendered prompt for the host to execute.
    pub prompt_template: String,
    pub instructions: String,
    pub context: Map<String, Value>,
    /// Human-readable hint for what to do next.
    pub next_action: String,
    pub metadata: Map<String, Value>,
}

/// What a tool call actually returns: either the success payload or the
/// structured error envelope. Serialized untagged so the wire shapes are
/// exactly the two contract objects.
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum ToolReply {
    Ok(ToolResult),
    Err(ErrorEnvelope),
}
