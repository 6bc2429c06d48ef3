//! The flow engine: a pure decision function over a session snapshot.
//!
//! Execution is externally driven. The host LLM supplies each step's output
//! through `next_step`; the engine only decides where the cursor goes next,
//! from the flow definition, the session's recorded rows and outputs, and
//! the step's reported quality score. All session mutation happens in the
//! session manager after the decision is made, which keeps every transition
//! unit-testable without I/O.

use serde_json::Value;
use tracing::warn;

use crate::flow::condition::{Env, Ident, Value as CondValue};
use crate::flow::model::{Flow, FlowStep};
use crate::models::session::{Session, StepStatus};
use crate::MullError;

/// Maximum quality-gate retries per step (3 attempts total).
pub const RETRY_MAX: u32 = 2;

/// Decision produced by [`advance`].
#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    /// Quality gate failed: re-run the current step.
    Retry { step_name: String, retry_count: u32 },
    /// Move to the next iteration of the current `for_each` step.
    NextIteration {
        step_name: String,
        iteration_index: usize,
        total: usize,
        item: Value,
    },
    /// Enter a plain step. `skipped` lists steps passed over on the way
    /// (false conditionals, empty fan-outs) that must be recorded.
    EnterStep {
        step_name: String,
        skipped: Vec<String>,
    },
    /// Enter a `for_each` step at iteration 0.
    EnterForEach {
        step_name: String,
        total: usize,
        item: Value,
        skipped: Vec<String>,
    },
    /// No further step; the cursor becomes the completion sentinel.
    Complete { skipped: Vec<String> },
}

/// Resolve a step's `for_each` reference against the session's structured
/// outputs. Returns the full array to fan out over (possibly empty).
pub fn resolve_fan_out(step: &FlowStep, session: &Session) -> Result<Vec<Value>, MullError> {
    let reference = step.for_each.as_ref().ok_or_else(|| {
        MullError::Internal(format!("step '{}' has no for_each reference", step.name))
    })?;
    let err = |reason: &str| MullError::ForEachResolution {
        step: step.name.clone(),
        reference: reference.to_string(),
        reason: reason.to_string(),
    };
    let output = session
        .step_outputs
        .get(&reference.step)
        .ok_or_else(|| err("producer step has no structured output"))?;
    let property = output
        .get(&reference.property)
        .ok_or_else(|| err("property not present in producer output"))?;
    let items = property
        .as_array()
        .ok_or_else(|| err("property is not an array"))?;
    Ok(items.clone())
}

/// Decide the next cursor position after the current step (or iteration)
/// has been completed with `reported_score`.
///
/// The caller must already have recorded the completed row and updated
/// `step_outputs`; this function only reads.
pub fn advance(
    flow: &Flow,
    session: &Session,
    reported_score: Option<f64>,
) -> Result<Advance, MullError> {
    let current = flow
        .step(&session.current_step)
        .ok_or_else(|| MullError::StepNotFound {
            flow_type: flow.flow_type.clone(),
            step: session.current_step.clone(),
        })?;
    let index = flow
        .index_of(&current.name)
        .unwrap_or(flow.total_steps());

    // Quality gate: strict `<`, so a score exactly at threshold passes.
    if let Some(score) = reported_score {
        if score < current.quality_threshold
            && current.retry_on_failure
            && session.retry_count < RETRY_MAX
        {
            return Ok(Advance::Retry {
                step_name: current.name.clone(),
                retry_count: session.retry_count + 1,
            });
        }
    }

    // Remaining iterations of the current fan-out step come before any
    // forward movement.
    if current.for_each.is_some() {
        let items = resolve_fan_out(current, session)?;
        let done = session.iteration_index.unwrap_or(0);
        if done + 1 < items.len() {
            return Ok(Advance::NextIteration {
                step_name: current.name.clone(),
                iteration_index: done + 1,
                total: items.len(),
                item: items[done + 1].clone(),
            });
        }
    }

    if current.is_final {
        return Ok(Advance::Complete { skipped: vec![] });
    }

    walk_forward(flow, session, index + 1, reported_score)
}

/// Find the first step to enter, walking from `start`. Used both by
/// [`advance`] and by the session manager when retrying entry after a
/// fan-out resolution failure.
pub fn walk_forward(
    flow: &Flow,
    session: &Session,
    start: usize,
    reported_score: Option<f64>,
) -> Result<Advance, MullError> {
    let mut skipped: Vec<String> = Vec::new();

    for step in flow.steps.iter().skip(start) {
        // Unsatisfied dependencies exclude the step from selection without
        // recording anything; it may become eligible on a later walk.
        // Steps skipped earlier in THIS walk count as satisfied: their rows
        // are only recorded after the walk returns.
        if !step
            .depends_on
            .iter()
            .all(|d| session.step_satisfied(d) || skipped.contains(d))
        {
            continue;
        }

        if let Some(cond) = &step.conditional {
            let env = SessionEnv {
                session,
                reported_score,
            };
            let holds = match cond.eval(&env) {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        step = %step.name,
                        condition = %cond.source(),
                        "condition evaluation failed ({}), treating as false",
                        e
                    );
                    false
                }
            };
            if !holds {
                skipped.push(step.name.clone());
                continue;
            }
        }

        if step.for_each.is_some() {
            let items = resolve_fan_out(step, session)?;
            if items.is_empty() {
                skipped.push(step.name.clone());
                continue;
            }
            return Ok(Advance::EnterForEach {
                step_name: step.name.clone(),
                total: items.len(),
                item: items[0].clone(),
                skipped,
            });
        }

        return Ok(Advance::EnterStep {
            step_name: step.name.clone(),
            skipped,
        });
    }

    Ok(Advance::Complete { skipped })
}

/// Condition environment over a session snapshot.
struct SessionEnv<'a> {
    session: &'a Session,
    reported_score: Option<f64>,
}

impl Env for SessionEnv<'_> {
    fn lookup(&self, ident: &Ident) -> Option<CondValue> {
        match ident {
            Ident::Complexity => self
                .session
                .context_str("complexity")
                .map(|s| CondValue::Str(s.to_string())),
            Ident::QualityScore => self
                .reported_score
                .or_else(|| last_recorded_score(self.session))
                .map(CondValue::Num),
            Ident::StepCount => Some(CondValue::Num(self.session.completed_steps() as f64)),
            Ident::StepQuality(step) => self
                .session
                .quality_scores
                .get(step)
                .copied()
                .map(CondValue::Num),
            Ident::StepStatus(step) => {
                // The status of the step's most recent row.
                self.session
                    .steps
                    .iter()
                    .rev()
                    .find(|r| &r.step_name == step)
                    .map(|r| CondValue::Str(r.status.to_string()))
            }
        }
    }
}

fn last_recorded_score(session: &Session) -> Option<f64> {
    session
        .steps
        .iter()
        .rev()
        .filter(|r| r.status == StepStatus::Completed)
        .find_map(|r| r.quality_score)
}
