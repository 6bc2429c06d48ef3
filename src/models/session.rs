use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Cursor value marking a finished flow. Not a real step name.
pub const COMPLETE_SENTINEL: &str = "__complete__";

/// Lifecycle status of a thinking session.
///
/// `Completed`, `Failed` and `Expired` are terminal: no tool call may
/// mutate a session once it reaches one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
    Expired,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one step execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution unit of a flow step.
///
/// A plain step produces exactly one row; a `for_each` step produces one row
/// per iteration, distinguished by `iteration_index`. Rows are created in
/// `pending` state when the cursor lands on the unit and transition to
/// `completed` / `failed` / `skipped` as the flow advances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration_index: Option<usize>,
    pub status: StepStatus,
    /// The host LLM's reply, verbatim. Retained even when structured
    /// extraction fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepResult {
    /// New pending row for a step (or one of its iterations).
    pub fn pending(step_name: &str, iteration_index: Option<usize>, now: DateTime<Utc>) -> Self {
        Self {
            step_name: step_name.to_string(),
            iteration_index,
            status: StepStatus::Pending,
            raw_text: None,
            quality_score: None,
            retry_count: 0,
            started_at: now,
            finished_at: None,
        }
    }

    /// Row recorded for a step that was skipped without executing.
    pub fn skipped(step_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            step_name: step_name.to_string(),
            iteration_index: None,
            status: StepStatus::Skipped,
            raw_text: None,
            quality_score: None,
            retry_count: 0,
            started_at: now,
            finished_at: Some(now),
        }
    }
}

/// The authoritative record of one thinking workflow, from `start_thinking`
/// to completion or expiry.
///
/// Owned exclusively by the session manager; the flow engine and MCP tools
/// read it through snapshots and mutate it through the manager's API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub topic: String,
    pub flow_type: String,
    pub status: SessionStatus,
    /// Name of the next step to execute, or [`COMPLETE_SENTINEL`].
    pub current_step: String,
    /// Count of completed step rows (`for_each` iterations count
    /// individually).
    pub step_number: u32,
    /// Iteration the cursor is on when `current_step` has `for_each`.
    pub iteration_index: Option<usize>,
    /// Quality-gate retries consumed on the current step.
    pub retry_count: u32,
    /// Open map of user knobs and derived values: `topic`, `complexity`,
    /// `focus`, plus anything the host passes along.
    pub context: Map<String, Value>,
    /// Step rows in append order.
    pub steps: Vec<StepResult>,
    /// Structured output per step, extracted from the host's reply. For
    /// `for_each` producers this is consumed by reference resolution; for
    /// `for_each` steps themselves it is an array of per-iteration outputs.
    pub step_outputs: HashMap<String, Value>,
    /// Last reported quality score per step.
    pub quality_scores: HashMap<String, f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create a fresh session positioned on `first_step`.
    ///
    /// A pending row for `first_step` is recorded immediately so the step
    /// history always reflects the cursor.
    pub fn new(
        topic: &str,
        flow_type: &str,
        first_step: &str,
        context: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            flow_type: flow_type.to_string(),
            status: SessionStatus::Active,
            current_step: first_step.to_string(),
            step_number: 0,
            iteration_index: None,
            retry_count: 0,
            context,
            steps: vec![StepResult::pending(first_step, None, now)],
            step_outputs: HashMap::new(),
            quality_scores: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Number of completed step rows. The session invariant is
    /// `step_number == completed_steps()` after every successful tool call.
    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|r| r.status == StepStatus::Completed)
            .count()
    }

    /// Whether `step` has at least one completed row and no row still
    /// pending or running. Skipped rows satisfy dependencies so that a
    /// conditional or empty-fan-out step does not deadlock its dependents.
    pub fn step_satisfied(&self, step: &str) -> bool {
        let rows: Vec<_> = self.steps.iter().filter(|r| r.step_name == step).collect();
        if rows.is_empty() {
            return false;
        }
        rows.iter().all(|r| {
            matches!(r.status, StepStatus::Completed | StepStatus::Skipped)
        })
    }

    /// All rows recorded for `step`, in append order.
    pub fn rows_for<'a>(&'a self, step: &'a str) -> impl Iterator<Item = &'a StepResult> + 'a {
        self.steps.iter().filter(move |r| r.step_name == step)
    }

    /// Index of the row the cursor currently points at: the pending or
    /// running row for `current_step` at the cursor's iteration index.
    pub fn cursor_row_index(&self) -> Option<usize> {
        let step = &self.current_step;
        let iter = self.iteration_index;
        self.steps.iter().rposition(|r| {
            &r.step_name == step
                && r.iteration_index == iter
                && matches!(r.status, StepStatus::Pending | StepStatus::Running)
        })
    }

    /// Raw text of the most recently completed row, if any.
    pub fn last_completed_text(&self) -> Option<&str> {
        self.steps
            .iter()
            .rev()
            .find(|r| r.status == StepStatus::Completed)
            .and_then(|r| r.raw_text.as_deref())
    }

    pub fn is_complete(&self) -> bool {
        self.current_step == COMPLETE_SENTINEL
    }

    /// Context value as a plain string, if present and string-valued.
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(|v| v.as_str())
    }
}
