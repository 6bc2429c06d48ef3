use std::sync::Arc;

use rmcp::{
    handler::server::tool::ToolRouter,
    handler::server::wrapper::{Json, Parameters},
    model::*,
    tool, tool_handler, tool_router, ServerHandler, ServiceExt,
};
use tracing::instrument;

use crate::init::AppContext;
use crate::mcp::error::ErrorEnvelope;
use crate::mcp::types::{
    AnalyzeStepInput, CompleteThinkingInput, NextStepInput, StartThinkingInput, ToolReply,
    ToolResult,
};
use crate::MullError;

/// MCP server for the deep-thinking orchestrator.
///
/// Holds the application container; all four tools are thin shims over the
/// handlers in `mcp::tools`, converting any failure into the structured
/// error envelope so nothing untyped crosses the MCP boundary.
#[derive(Clone)]
pub struct MullServer {
    pub(crate) ctx: Arc<AppContext>,
    tool_router: ToolRouter<Self>,
}

fn reply(result: Result<ToolResult, MullError>) -> Result<Json<ToolReply>, String> {
    match result {
        Ok(out) => Ok(Json(ToolReply::Ok(out))),
        Err(err) => {
            // Failures stay inside the envelope; the outer Result only
            // exists for the transport layer and never carries errors.
            tracing::debug!("tool call failed: {}", err);
            Ok(Json(ToolReply::Err(ErrorEnvelope::from(&err))))
        }
    }
}

#[tool_router]
impl MullServer {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Start a deep-thinking session on a topic. Returns the first step's \
                       prompt template for you to execute; feed your output back through \
                       next_step."
    )]
    #[instrument(name = "mcp.start_thinking", skip_all)]
    pub async fn start_thinking(
        &self,
        Parameters(input): Parameters<StartThinkingInput>,
    ) -> Result<Json<ToolReply>, String> {
        reply(self.handle_start_thinking(input).await)
    }

    #[tool(
        description = "Submit the current step's result and receive the next step's prompt. \
                       Handles quality-gated retries, conditional skips and per-item \
                       fan-out automatically."
    )]
    #[instrument(name = "mcp.next_step", skip_all)]
    pub async fn next_step(
        &self,
        Parameters(input): Parameters<NextStepInput>,
    ) -> Result<Json<ToolReply>, String> {
        reply(self.handle_next_step(input).await)
    }

    #[tool(
        description = "Get an analysis prompt (quality, format, completeness, bias or logic) \
                       for a step result. Does not advance the flow; feed the resulting \
                       score back via next_step.quality_feedback."
    )]
    #[instrument(name = "mcp.analyze_step", skip_all)]
    pub async fn analyze_step(
        &self,
        Parameters(input): Parameters<AnalyzeStepInput>,
    ) -> Result<Json<ToolReply>, String> {
        reply(self.handle_analyze_step(input).await)
    }

    #[tool(
        description = "Close a session and receive the summary report prompt built from the \
                       full step history."
    )]
    #[instrument(name = "mcp.complete_thinking", skip_all)]
    pub async fn complete_thinking(
        &self,
        Parameters(input): Parameters<CompleteThinkingInput>,
    ) -> Result<Json<ToolReply>, String> {
        reply(self.handle_complete_thinking(input).await)
    }
}

#[tool_handler]
impl ServerHandler for MullServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "mull".to_string(),
                title: Some("Mull Deep Thinking Orchestrator".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                r#"# Mull — deep-thinking orchestrator

Mull drives a multi-step reasoning workflow. It never calls an LLM itself:
each tool returns a prompt template for YOU to execute, plus control
metadata. You do the reasoning and web search; Mull tracks the flow state.

## Workflow

1. `start_thinking(topic, complexity?, focus?, flow_type?)` — creates a
   session and returns the first prompt. Execute it.
2. `next_step(session_id, step_result, quality_feedback?)` — submit your
   output, receive the next prompt. Repeat until `step` is `__complete__`.
   Steps may repeat (quality-gated retry), be skipped (conditionals), or
   fan out once per item produced by an earlier step.
3. `analyze_step(session_id, step_name, step_result, analysis_type)` —
   optional: get an evaluation prompt (quality/format/completeness/bias/
   logic), run it, and pass the score into `next_step.quality_feedback`.
4. `complete_thinking(session_id, final_insights?)` — closes the session
   and returns the summary report prompt.

## Notes

- When a prompt asks for JSON, reply with a single JSON object; Mull parses
  it to drive fan-out over arrays like `sub_questions`.
- Errors come back as `{error: true, error_code, recovery_suggestions}`;
  follow the suggestions.
- Sessions expire after inactivity; a fresh `start_thinking` always works.
"#
                .to_string(),
            ),
        }
    }
}

/// Run the MCP server on stdio transport until the host disconnects.
pub async fn run_mcp_server(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let server = MullServer::new(ctx.clone());

    tracing::info!("Starting Mull MCP server v{}", env!("CARGO_PKG_VERSION"));

    // The expiry sweep is the only background work in the process.
    let sweeper = ctx.sessions.spawn_sweeper();

    let transport = (tokio::io::stdin(), tokio::io::stdout());
    let service = server.serve(transport).await?;
    tracing::info!("MCP server listening on stdio (4 tools)");

    tokio::select! {
        result = service.waiting() => {
            result?;
            tracing::info!("host disconnected");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    sweeper.abort();
    tracing::info!("MCP server shutting down");
    Ok(())
}
