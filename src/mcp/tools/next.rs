//! `next_step`: record the host's output, apply the quality gate, advance
//! the cursor, and return the next prompt.
//!
//! The handler runs in two phases: state mutation under the session lock,
//! then template rendering on the resulting snapshot with the lock
//! released (renders are pure and never need it).

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::flow::engine::{self, Advance, RETRY_MAX};
use crate::flow::model::{Flow, FlowStep};
use crate::flow::output::extract_json;
use crate::mcp::server::MullServer;
use crate::mcp::tools::{base_params, render_step, value_param};
use crate::mcp::types::{NextStepInput, ToolResult};
use crate::models::session::{Session, COMPLETE_SENTINEL};
use crate::models::template::OutputKind;
use crate::MullError;
use std::sync::Arc;

/// Where the cursor ended up after the locked phase.
enum NextOutcome {
    /// Cursor is (or already was) the completion sentinel.
    Complete,
    /// Same step again under the quality gate.
    Retry { retry_count: u32 },
    /// A fan-out iteration (first or subsequent).
    Iteration {
        step_name: String,
        iteration_index: usize,
        total: usize,
        item: Value,
    },
    /// A plain step was entered.
    Entered {
        step_name: String,
        skipped: Vec<String>,
    },
}

impl MullServer {
    pub async fn handle_next_step(&self, input: NextStepInput) -> Result<ToolResult, MullError> {
        if input.session_id.trim().is_empty() {
            return Err(MullError::Validation("session_id must not be empty".into()));
        }
        let score = input.quality_feedback.as_ref().map(|f| f.quality_score);
        if let Some(s) = score {
            if !(0.0..=1.0).contains(&s) {
                return Err(MullError::Validation(format!(
                    "quality_score {} is outside [0,1]",
                    s
                )));
            }
        }

        let config = self.ctx.config();

        // Phase 1: mutate session state under the per-session lock.
        let (session, flow, previous_step, outcome) = {
            let _guard = self.ctx.sessions.lock(&input.session_id).await;
            self.advance_session(&input, score, config.as_ref()).await?
        };

        // Phase 2: pure rendering, lock released.
        self.render_outcome(&input, score, session, flow, previous_step, outcome)
    }

    /// Locked phase: append the step result, apply the quality gate, and
    /// move the cursor per the engine's decision.
    async fn advance_session(
        &self,
        input: &NextStepInput,
        score: Option<f64>,
        config: &crate::config::ConfigSnapshot,
    ) -> Result<(Session, Arc<Flow>, String, NextOutcome), MullError> {
        let now = Utc::now();
        let mut session = self
            .ctx
            .sessions
            .get_active(&input.session_id, true, now)
            .await?;
        let flow = config.flow(&session.flow_type)?;

        // Flow already finished: idempotently report completion again.
        if session.is_complete() {
            let previous = session.current_step.clone();
            return Ok((session, flow, previous, NextOutcome::Complete));
        }

        match self.apply_next_step(&mut session, &flow, input, score).await {
            Ok((previous_step, outcome)) => Ok((session, flow, previous_step, outcome)),
            Err(err) => {
                // A storage failure during a step-result write leaves the
                // history unreliable: surface the error and best-effort
                // mark the session failed.
                if matches!(err, MullError::Storage(_)) {
                    if let Err(mark_err) = self
                        .ctx
                        .sessions
                        .mark_status(&mut session, crate::models::session::SessionStatus::Failed, now)
                        .await
                    {
                        tracing::warn!(
                            session_id = %session.session_id,
                            "could not mark session failed: {}",
                            mark_err
                        );
                    }
                }
                Err(err)
            }
        }
    }

    /// The fallible middle of the locked phase: complete the cursor row and
    /// apply the engine's decision.
    async fn apply_next_step(
        &self,
        session: &mut Session,
        flow: &Flow,
        input: &NextStepInput,
        score: Option<f64>,
    ) -> Result<(String, NextOutcome), MullError> {
        let now = Utc::now();
        let current = flow
            .step(&session.current_step)
            .ok_or_else(|| MullError::StepNotFound {
                flow_type: flow.flow_type.clone(),
                step: session.current_step.clone(),
            })?;
        let previous_step = current.name.clone();

        // Structured extraction only when the step's template declares a
        // JSON output contract. Raw text is retained regardless.
        let structured = match self.ctx.templates.template(&current.template) {
            Some(t) if t.expected_output == OutputKind::Json => extract_json(&input.step_result),
            _ => None,
        };

        self.ctx
            .sessions
            .complete_cursor_row(session, &input.step_result, structured, score, now)
            .await?;

        let decision = match engine::advance(flow, session, score) {
            Ok(decision) => decision,
            Err(err) => {
                if let MullError::ForEachResolution { step, .. } = &err {
                    // The consumer step failed to resolve its fan-out; it
                    // gets a failed row and the cursor stays put so the
                    // host can re-supply a parseable producer result.
                    self.ctx.sessions.fail_step(session, step, now).await?;
                }
                return Err(err);
            }
        };

        let outcome = match decision {
            Advance::Retry {
                retry_count,
                ..
            } => {
                self.ctx
                    .sessions
                    .reset_for_retry(session, retry_count, now)
                    .await?;
                NextOutcome::Retry { retry_count }
            }
            Advance::NextIteration {
                step_name,
                iteration_index,
                total,
                item,
            } => {
                self.ctx
                    .sessions
                    .enter_step(session, &step_name, Some(iteration_index), now)
                    .await?;
                NextOutcome::Iteration {
                    step_name,
                    iteration_index,
                    total,
                    item,
                }
            }
            Advance::EnterForEach {
                step_name,
                total,
                item,
                skipped,
            } => {
                self.ctx
                    .sessions
                    .record_skipped(session, &skipped, now)
                    .await?;
                self.ctx
                    .sessions
                    .enter_step(session, &step_name, Some(0), now)
                    .await?;
                NextOutcome::Iteration {
                    step_name,
                    iteration_index: 0,
                    total,
                    item,
                }
            }
            Advance::EnterStep { step_name, skipped } => {
                self.ctx
                    .sessions
                    .record_skipped(session, &skipped, now)
                    .await?;
                self.ctx
                    .sessions
                    .enter_step(session, &step_name, None, now)
                    .await?;
                NextOutcome::Entered { step_name, skipped }
            }
            Advance::Complete { skipped } => {
                self.ctx
                    .sessions
                    .record_skipped(session, &skipped, now)
                    .await?;
                self.ctx.sessions.complete_flow(session, now).await?;
                NextOutcome::Complete
            }
        };

        Ok((previous_step, outcome))
    }

    /// Unlocked phase: render the prompt for the new cursor position and
    /// assemble the response.
    fn render_outcome(
        &self,
        input: &NextStepInput,
        score: Option<f64>,
        session: Session,
        flow: Arc<Flow>,
        previous_step: String,
        outcome: NextOutcome,
    ) -> Result<ToolResult, MullError> {
        let previous_def = flow.step(&previous_step);
        let gate_passed = match (score, previous_def) {
            (Some(s), Some(step)) => s >= step.quality_threshold,
            _ => true,
        };

        match outcome {
            NextOutcome::Complete => Ok(self.completion_result("next_step", &session, &flow)),

            NextOutcome::Retry { retry_count } => {
                let step = flow
                    .step(&session.current_step)
                    .ok_or_else(|| MullError::StepNotFound {
                        flow_type: flow.flow_type.clone(),
                        step: session.current_step.clone(),
                    })?;

                let mut params = base_params(&session);
                params.insert("previous_result".into(), input.step_result.clone());
                params.insert(
                    "quality_threshold".into(),
                    format!("{}", step.quality_threshold),
                );
                if let Some(feedback) = input
                    .quality_feedback
                    .as_ref()
                    .and_then(|f| f.feedback.as_deref())
                {
                    params.insert("feedback".into(), feedback.to_string());
                }
                let (prompt, used_fallback) = render_step(&self.ctx.templates, step, &params);

                let mut metadata = self.step_metadata(&session, &flow, step, &previous_step);
                metadata.insert("quality_gate_passed".into(), json!(false));
                metadata.insert("retry_count".into(), json!(retry_count));
                metadata.insert(
                    "attempts_remaining".into(),
                    json!(RETRY_MAX.saturating_sub(retry_count)),
                );
                if used_fallback {
                    metadata.insert("template_fallback".into(), json!(true));
                }

                let mut instructions = format!(
                    "Quality score {} is below this step's threshold {}; redo the step \
                     and improve on the previous attempt",
                    score.unwrap_or(0.0),
                    step.quality_threshold
                );
                if let Some(areas) = input
                    .quality_feedback
                    .as_ref()
                    .and_then(|f| f.improvement_areas.as_ref())
                {
                    if !areas.is_empty() {
                        instructions.push_str(&format!("; focus on: {}", areas.join(", ")));
                    }
                }

                Ok(ToolResult {
                    tool_name: "next_step".to_string(),
                    session_id: session.session_id.clone(),
                    step: step.name.clone(),
                    prompt_template: prompt,
                    instructions,
                    context: self.step_context(&session),
                    next_action: "Call next_step with the improved result".to_string(),
                    metadata,
                })
            }

            NextOutcome::Iteration {
                step_name,
                iteration_index,
                total,
                item,
            } => {
                let step = flow.step(&step_name).ok_or_else(|| MullError::StepNotFound {
                    flow_type: flow.flow_type.clone(),
                    step: step_name.clone(),
                })?;

                let mut params = base_params(&session);
                params.insert("item".into(), value_param(&item));
                params.insert("item_index".into(), (iteration_index + 1).to_string());
                params.insert("total_items".into(), total.to_string());
                let (prompt, used_fallback) = render_step(&self.ctx.templates, step, &params);

                let mut context = self.step_context(&session);
                context.insert("item".into(), item);
                context.insert("item_index".into(), json!(iteration_index));
                context.insert("total_items".into(), json!(total));

                let mut metadata = self.step_metadata(&session, &flow, step, &previous_step);
                metadata.insert("for_each_continuation".into(), json!(iteration_index > 0));
                metadata.insert(
                    "iteration_status".into(),
                    json!({
                        "current": iteration_index,
                        "total": total,
                        "is_for_each": true,
                    }),
                );
                metadata.insert("quality_gate_passed".into(), json!(gate_passed));
                if used_fallback {
                    metadata.insert("template_fallback".into(), json!(true));
                }

                Ok(ToolResult {
                    tool_name: "next_step".to_string(),
                    session_id: session.session_id.clone(),
                    step: step.name.clone(),
                    prompt_template: prompt,
                    instructions: format!(
                        "{} (item {} of {})",
                        step_instructions(step),
                        iteration_index + 1,
                        total
                    ),
                    context,
                    next_action: if iteration_index + 1 < total {
                        format!(
                            "Call next_step with this item's result; {} item(s) remain",
                            total - iteration_index - 1
                        )
                    } else {
                        "Call next_step with this item's result to finish the fan-out"
                            .to_string()
                    },
                    metadata,
                })
            }

            NextOutcome::Entered { step_name, skipped } => {
                let step = flow.step(&step_name).ok_or_else(|| MullError::StepNotFound {
                    flow_type: flow.flow_type.clone(),
                    step: step_name.clone(),
                })?;

                let mut params = base_params(&session);
                if let Some(previous) = session.last_completed_text() {
                    params.insert("previous_result".into(), previous.to_string());
                }
                let (prompt, used_fallback) = render_step(&self.ctx.templates, step, &params);

                let mut metadata = self.step_metadata(&session, &flow, step, &previous_step);
                metadata.insert("quality_gate_passed".into(), json!(gate_passed));
                if !skipped.is_empty() {
                    metadata.insert("skipped_steps".into(), json!(skipped));
                }
                if used_fallback {
                    metadata.insert("template_fallback".into(), json!(true));
                }

                Ok(ToolResult {
                    tool_name: "next_step".to_string(),
                    session_id: session.session_id.clone(),
                    step: step.name.clone(),
                    prompt_template: prompt,
                    instructions: step_instructions(step),
                    context: self.step_context(&session),
                    next_action: "Call next_step with this step's result to continue the flow"
                        .to_string(),
                    metadata,
                })
            }
        }
    }

    /// Response when the cursor reaches (or already sits on) the completion
    /// sentinel.
    pub(crate) fn completion_result(
        &self,
        tool_name: &str,
        session: &Session,
        flow: &Flow,
    ) -> ToolResult {
        let mut params = BTreeMap::new();
        params.insert("topic".to_string(), session.topic.clone());
        params.insert("step_count".to_string(), session.step_number.to_string());
        let prompt = self
            .ctx
            .templates
            .get("flow_completion", &params)
            .unwrap_or_else(|_| {
                crate::template::TemplateManager::fallback("flow_completion", COMPLETE_SENTINEL)
            });

        let mut metadata = Map::new();
        metadata.insert("flow_type".into(), json!(session.flow_type));
        metadata.insert("step_number".into(), json!(session.step_number));
        metadata.insert(
            "flow_progress".into(),
            json!(format!("{}/{}", flow.total_steps(), flow.total_steps())),
        );

        ToolResult {
            tool_name: tool_name.to_string(),
            session_id: session.session_id.clone(),
            step: COMPLETE_SENTINEL.to_string(),
            prompt_template: prompt,
            instructions: "All flow steps are done; produce the final answer".to_string(),
            context: self.step_context(session),
            next_action: "Call complete_thinking to close the session and get the summary \
                          report prompt"
                .to_string(),
            metadata,
        }
    }

    fn step_context(&self, session: &Session) -> Map<String, Value> {
        let mut context = Map::new();
        context.insert("session_id".into(), json!(session.session_id));
        context.insert("topic".into(), json!(session.topic));
        if let Some(complexity) = session.context_str("complexity") {
            context.insert("complexity".into(), json!(complexity));
        }
        if let Some(focus) = session.context_str("focus") {
            context.insert("focus".into(), json!(focus));
        }
        context
    }

    fn step_metadata(
        &self,
        session: &Session,
        flow: &Flow,
        step: &FlowStep,
        previous_step: &str,
    ) -> Map<String, Value> {
        let mut metadata = Map::new();
        metadata.insert("flow_type".into(), json!(session.flow_type));
        metadata.insert("step_number".into(), json!(session.step_number));
        metadata.insert(
            "flow_progress".into(),
            json!(format!(
                "{}/{}",
                flow.index_of(&step.name).map(|i| i + 1).unwrap_or(0),
                flow.total_steps()
            )),
        );
        metadata.insert("previous_step".into(), json!(previous_step));
        metadata.insert("template".into(), json!(step.template));
        if let Some(template) = self.ctx.templates.template(&step.template) {
            metadata.insert(
                "expected_output".into(),
                json!(match template.expected_output {
                    OutputKind::Json => "json",
                    OutputKind::Text => "text",
                }),
            );
        }
        metadata
    }
}

fn step_instructions(step: &FlowStep) -> String {
    if step.instructions.is_empty() {
        "Execute the prompt and pass your full output to next_step".to_string()
    } else {
        step.instructions.clone()
    }
}
