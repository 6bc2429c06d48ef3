//! `analyze_step`: render an analysis prompt for a completed step.
//!
//! Idempotent with respect to the flow cursor: nothing here advances the
//! session. The host feeds the resulting evaluation back through
//! `next_step.quality_feedback`.

use chrono::Utc;
use serde_json::{json, Map};

use crate::mcp::server::MullServer;
use crate::mcp::tools::base_params;
use crate::mcp::types::{AnalyzeStepInput, ToolResult};
use crate::models::template::OutputKind;
use crate::MullError;

impl MullServer {
    pub async fn handle_analyze_step(
        &self,
        input: AnalyzeStepInput,
    ) -> Result<ToolResult, MullError> {
        if input.session_id.trim().is_empty() {
            return Err(MullError::Validation("session_id must not be empty".into()));
        }
        if input.step_result.trim().is_empty() {
            return Err(MullError::Validation(
                "step_result must not be empty".into(),
            ));
        }

        let now = Utc::now();
        let session = self
            .ctx
            .sessions
            .get_active(&input.session_id, true, now)
            .await?;
        let config = self.ctx.config();
        let flow = config.flow(&session.flow_type)?;
        let step = flow
            .step(&input.step_name)
            .ok_or_else(|| MullError::StepNotFound {
                flow_type: flow.flow_type.clone(),
                step: input.step_name.clone(),
            })?;

        let mut params = base_params(&session);
        params.insert("step_name".into(), step.name.clone());
        params.insert("step_result".into(), input.step_result.clone());
        params.insert(
            "quality_threshold".into(),
            format!("{}", step.quality_threshold),
        );
        if let Some(template) = self.ctx.templates.template(&step.template) {
            params.insert(
                "expected_format".into(),
                match template.expected_output {
                    OutputKind::Json => "a single JSON object".to_string(),
                    OutputKind::Text => "free text".to_string(),
                },
            );
        }

        let prompt = self
            .ctx
            .templates
            .get(input.analysis_type.template_name(), &params)?;

        let mut context = Map::new();
        context.insert("session_id".into(), json!(session.session_id));
        context.insert("topic".into(), json!(session.topic));
        context.insert("analyzed_step".into(), json!(step.name));

        let mut metadata = Map::new();
        metadata.insert("analysis_type".into(), json!(input.analysis_type.as_str()));
        metadata.insert("quality_threshold".into(), json!(step.quality_threshold));
        metadata.insert("flow_type".into(), json!(session.flow_type));
        metadata.insert("current_step".into(), json!(session.current_step));

        Ok(ToolResult {
            tool_name: "analyze_step".to_string(),
            session_id: session.session_id.clone(),
            step: step.name.clone(),
            prompt_template: prompt,
            instructions: format!(
                "Perform the {} analysis of the step output; reply with the requested \
                 assessment",
                input.analysis_type.as_str()
            ),
            context,
            next_action: "Feed the resulting score back via next_step.quality_feedback"
                .to_string(),
            metadata,
        })
    }
}
