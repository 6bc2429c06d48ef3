//! Tool handler implementations, one file per tool. The `#[tool]` shims
//! live in `mcp::server`; everything here returns
//! `Result<ToolResult, MullError>` and never panics.

mod analyze;
mod complete;
mod next;
mod start;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::flow::model::FlowStep;
use crate::models::session::Session;
use crate::template::TemplateManager;

/// String form of a template parameter: strings verbatim, everything else
/// as compact JSON.
pub(crate) fn value_param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parameters every step render starts from: the session's well-known
/// context keys plus any other string-able context values.
pub(crate) fn base_params(session: &Session) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    for (key, value) in &session.context {
        params.insert(key.clone(), value_param(value));
    }
    params.insert("topic".to_string(), session.topic.clone());
    if !params.contains_key("domain_context") {
        let focus = session.context_str("focus").unwrap_or("");
        let domain = if focus.is_empty() {
            "general analysis".to_string()
        } else {
            focus.to_string()
        };
        params.insert("domain_context".to_string(), domain);
    }
    params
}

/// Render a step's template, degrading to the generic fallback body when
/// the template vanished from the snapshot (e.g. a reload removed it).
/// Returns the text and whether the fallback was used.
pub(crate) fn render_step(
    templates: &TemplateManager,
    step: &FlowStep,
    params: &BTreeMap<String, String>,
) -> (String, bool) {
    match templates.get(&step.template, params) {
        Ok(text) => (text, false),
        Err(err) => {
            tracing::warn!(
                template = %step.template,
                step = %step.name,
                "template render failed ({}), using fallback",
                err
            );
            (TemplateManager::fallback(&step.template, &step.name), true)
        }
    }
}
