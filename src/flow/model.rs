use serde_json::{Map, Value};

use crate::flow::condition::Condition;
use crate::flow::reference::ForEachRef;

/// One loaded thinking flow: an ordered list of steps. Immutable after
/// config load; reload produces a whole new snapshot.
#[derive(Debug, Clone)]
pub struct Flow {
    /// Registry key (`flow_type` in the MCP contract).
    pub flow_type: String,
    /// Human-readable name from the flow file.
    pub name: String,
    pub description: String,
    pub steps: Vec<FlowStep>,
}

impl Flow {
    pub fn step(&self, name: &str) -> Option<&FlowStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }

    /// Flows are validated non-empty at load; `None` only for a hand-built
    /// empty flow in tests.
    pub fn first_step(&self) -> Option<&FlowStep> {
        self.steps.first()
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }
}

/// One step of a flow. Immutable after load.
#[derive(Debug, Clone)]
pub struct FlowStep {
    /// Unique within the flow.
    pub name: String,
    /// Template rendered when the cursor lands here.
    pub template: String,
    pub required: bool,
    /// Quality-gate threshold; a reported score strictly below it triggers
    /// a retry when `retry_on_failure` is set.
    pub quality_threshold: f64,
    /// Parsed conditional; `None` means the step always runs.
    pub conditional: Option<Condition>,
    /// Steps that must be settled (completed or skipped) before this one.
    pub depends_on: Vec<String>,
    /// Fan-out reference; the step runs once per element of the referenced
    /// array.
    pub for_each: Option<ForEachRef>,
    /// Batching hint preserved from the flow file. Iterations are always
    /// presented to the host sequentially under the MCP tool protocol; the
    /// hint has no runtime effect.
    pub parallel: bool,
    pub retry_on_failure: bool,
    /// Reaching this step ends the flow after it completes.
    pub is_final: bool,
    /// Guidance returned alongside the rendered template.
    pub instructions: String,
    /// Free-form step metadata carried through to tool responses.
    pub metadata: Map<String, Value>,
}
