//! `start_thinking`: create a session and hand back the first prompt.

use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::mcp::server::MullServer;
use crate::mcp::tools::{base_params, render_step};
use crate::mcp::types::{StartThinkingInput, ToolResult, MAX_TOPIC_CHARS};
use crate::MullError;

impl MullServer {
    pub async fn handle_start_thinking(
        &self,
        input: StartThinkingInput,
    ) -> Result<ToolResult, MullError> {
        let topic = input.topic.trim();
        if topic.is_empty() {
            return Err(MullError::Validation("topic must not be empty".into()));
        }
        if topic.chars().count() > MAX_TOPIC_CHARS {
            return Err(MullError::Validation(format!(
                "topic exceeds {} characters",
                MAX_TOPIC_CHARS
            )));
        }

        let config = self.ctx.config();
        let complexity = input.complexity.unwrap_or_default();
        let flow_type = input
            .flow_type
            .as_deref()
            .unwrap_or(&config.server.default_flow);
        let flow = config.flow(flow_type)?;
        let first = flow.first_step().ok_or_else(|| {
            MullError::Internal(format!("flow '{}' has no steps", flow_type))
        })?;

        let now = Utc::now();
        let mut context = Map::new();
        context.insert("topic".into(), Value::String(topic.to_string()));
        context.insert(
            "complexity".into(),
            Value::String(complexity.as_str().to_string()),
        );
        if let Some(focus) = input.focus.as_deref().filter(|f| !f.trim().is_empty()) {
            context.insert("focus".into(), Value::String(focus.to_string()));
        }
        context.insert("created_at".into(), Value::String(now.to_rfc3339()));

        let session = self
            .ctx
            .sessions
            .create(topic, flow_type, &first.name, context, now)
            .await?;

        let params = base_params(&session);
        let (prompt, used_fallback) = render_step(&self.ctx.templates, first, &params);

        let mut response_context = Map::new();
        response_context.insert("session_id".into(), json!(session.session_id));
        response_context.insert("topic".into(), json!(topic));
        response_context.insert("complexity".into(), json!(complexity.as_str()));

        let mut metadata = Map::new();
        metadata.insert("flow_type".into(), json!(flow_type));
        metadata.insert("step_number".into(), json!(0));
        metadata.insert(
            "flow_progress".into(),
            json!(format!("0/{}", flow.total_steps())),
        );
        if let Some(template) = self.ctx.templates.template(&first.template) {
            metadata.insert(
                "expected_output".into(),
                json!(match template.expected_output {
                    crate::models::template::OutputKind::Json => "json",
                    crate::models::template::OutputKind::Text => "text",
                }),
            );
        }
        if used_fallback {
            metadata.insert("template_fallback".into(), json!(true));
        }

        let instructions = if first.instructions.is_empty() {
            "Execute the prompt and pass your full output to next_step".to_string()
        } else {
            first.instructions.clone()
        };

        Ok(ToolResult {
            tool_name: "start_thinking".to_string(),
            session_id: session.session_id.clone(),
            step: first.name.clone(),
            prompt_template: prompt,
            instructions,
            context: response_context,
            next_action: "Call next_step with this step's result to continue the flow"
                .to_string(),
            metadata,
        })
    }
}
