//! Builtin prompt templates, compiled into the binary.
//!
//! Bodies are opaque text with `{ident}` placeholders; the literal JSON
//! examples inside them are inert (see `models::template::placeholders_in`).
//! Config-file templates with the same name override these.

use crate::models::template::{OutputKind, Template, TemplateSource};

const DECOMPOSITION: &str = r#"# Deep thinking: problem decomposition

Topic: {topic}
Complexity: {complexity}
Focus: {focus}
Domain context: {domain_context}

Break the topic into 3-7 focused sub-questions that together cover it.
For each sub-question provide search keywords and the perspectives worth
examining. Prioritise the questions whose answers unlock the others.

Reply with a single JSON object, no surrounding prose:

{"sub_questions": [
  {"id": "1",
   "question": "...",
   "priority": "high",
   "search_keywords": ["..."],
   "expected_perspectives": ["..."]}
]}
"#;

const EVIDENCE_COLLECTION: &str = r#"# Deep thinking: evidence collection

Overall topic: {topic}
Sub-question ({item_index} of {total_items}): {item}

Search for evidence bearing on this sub-question. Prefer primary sources,
note publication dates, and deliberately look for sources that disagree
with each other. Grade each source's credibility.

Reply with a single JSON object, no surrounding prose:

{"sub_question_id": "...",
 "evidence": [
   {"claim": "...",
    "source": "...",
    "credibility": 0.0,
    "supports": true}
 ],
 "summary": "..."}
"#;

const CRITICAL_EVALUATION: &str = r#"# Deep thinking: critical evaluation

Topic: {topic}

Material to evaluate:
{previous_result}

Evaluate the reasoning above against these standards: accuracy, relevance,
depth, breadth, logical coherence, and fairness. Identify the weakest link
in the argument chain and say what evidence would change the conclusion.

Reply with a single JSON object, no surrounding prose:

{"scores": {"accuracy": 0.0, "relevance": 0.0, "depth": 0.0,
            "breadth": 0.0, "logic": 0.0, "fairness": 0.0},
 "overall_score": 0.0,
 "weakest_link": "...",
 "improvement_suggestions": ["..."]}
"#;

const REFLECTION: &str = r#"# Deep thinking: metacognitive reflection

Topic: {topic}

Work so far:
{previous_result}

Step back from the analysis. What assumptions went unexamined? Where is
the confidence highest and lowest, and why? Which question, if answered
differently, would most change the conclusion? State what you would do
differently on a second pass.

Write the reflection as prose; finish with a one-paragraph synthesis of
the whole analysis.
"#;

const FLOW_COMPLETION: &str = r#"# Deep thinking: flow complete

All {step_count} steps for the topic below have been executed.

Topic: {topic}

Produce the final answer to the original topic, drawing only on the step
results already produced in this conversation. Call complete_thinking to
close the session and receive the summary report prompt.
"#;

const SESSION_SUMMARY: &str = r#"# Deep thinking: session report

Topic: {topic}

Step history:
{step_history}

Quality: {quality_summary}

Additional insights from the caller: {final_insights}

Write the final report: the conclusion first, then the key evidence for
and against it, the confidence level with its justification, and the open
questions a future analysis should start from.
"#;

const ANALYSIS_QUALITY: &str = r#"# Step analysis: quality

Step: {step_name}
Quality threshold: {quality_threshold}

Output to assess:
{step_result}

Score the output on accuracy, completeness and usefulness, each in [0,1],
and combine them into a single quality_score. Be strict: reserve scores
above 0.9 for work with no identifiable weakness.

Reply with a single JSON object, no surrounding prose:

{"quality_score": 0.0,
 "feedback": "...",
 "improvement_areas": ["..."]}
"#;

const ANALYSIS_FORMAT: &str = r#"# Step analysis: format

Step: {step_name}
Expected format: {expected_format}

Output to check:
{step_result}

Check whether the output matches the expected format exactly: required
fields present, types correct, no extra prose around the payload. List
every deviation and show the minimal corrected version.
"#;

const ANALYSIS_COMPLETENESS: &str = r#"# Step analysis: completeness

Step: {step_name}
Topic: {topic}

Output to assess:
{step_result}

Identify what is missing: aspects of the topic not covered, perspectives
not considered, obvious counter-arguments not addressed. Rank the gaps by
how much filling them would change the conclusion.
"#;

const ANALYSIS_BIAS: &str = r#"# Step analysis: bias detection

Step: {step_name}

Output to assess:
{step_result}

Inspect the reasoning for cognitive biases: confirmation bias, anchoring,
availability, survivorship, authority. For each suspected bias, quote the
affected passage and propose a debiased rewrite.
"#;

const ANALYSIS_LOGIC: &str = r#"# Step analysis: logical coherence

Step: {step_name}

Output to assess:
{step_result}

Reconstruct the argument as premises and conclusions. Flag invalid
inferences, unsupported premises and circular reasoning. State whether the
main conclusion survives with the flawed links removed.
"#;

fn template(
    name: &str,
    description: &str,
    required: &[&str],
    optional: &[&str],
    expected_output: OutputKind,
    body: &str,
) -> Template {
    Template {
        name: name.to_string(),
        description: description.to_string(),
        required_params: required.iter().map(|s| s.to_string()).collect(),
        optional_params: optional.iter().map(|s| s.to_string()).collect(),
        expected_output,
        body: body.to_string(),
        source: TemplateSource::Builtin,
    }
}

/// All builtin templates.
pub fn builtin_templates() -> Vec<Template> {
    vec![
        template(
            "decomposition",
            "Break a topic into prioritised sub-questions",
            &["topic", "complexity"],
            &["focus", "domain_context"],
            OutputKind::Json,
            DECOMPOSITION,
        ),
        template(
            "evidence_collection",
            "Collect and grade evidence for one sub-question",
            &["topic", "item"],
            &["item_index", "total_items"],
            OutputKind::Json,
            EVIDENCE_COLLECTION,
        ),
        template(
            "critical_evaluation",
            "Evaluate reasoning against critical-thinking standards",
            &["topic"],
            &["previous_result"],
            OutputKind::Json,
            CRITICAL_EVALUATION,
        ),
        template(
            "reflection",
            "Metacognitive reflection over the whole analysis",
            &["topic"],
            &["previous_result"],
            OutputKind::Text,
            REFLECTION,
        ),
        template(
            "flow_completion",
            "Returned when the flow cursor reaches the completion sentinel",
            &["topic"],
            &["step_count"],
            OutputKind::Text,
            FLOW_COMPLETION,
        ),
        template(
            "session_summary",
            "Final report prompt rendered by complete_thinking",
            &["topic", "step_history"],
            &["quality_summary", "final_insights"],
            OutputKind::Text,
            SESSION_SUMMARY,
        ),
        template(
            "analysis_quality",
            "Score a step result and suggest improvements",
            &["step_name", "step_result"],
            &["quality_threshold"],
            OutputKind::Json,
            ANALYSIS_QUALITY,
        ),
        template(
            "analysis_format",
            "Check a step result against its expected format",
            &["step_name", "step_result"],
            &["expected_format"],
            OutputKind::Text,
            ANALYSIS_FORMAT,
        ),
        template(
            "analysis_completeness",
            "Find coverage gaps in a step result",
            &["step_name", "step_result"],
            &["topic"],
            OutputKind::Text,
            ANALYSIS_COMPLETENESS,
        ),
        template(
            "analysis_bias",
            "Detect cognitive biases in a step result",
            &["step_name", "step_result"],
            &[],
            OutputKind::Text,
            ANALYSIS_BIAS,
        ),
        template(
            "analysis_logic",
            "Check the logical structure of a step result",
            &["step_name", "step_result"],
            &[],
            OutputKind::Text,
            ANALYSIS_LOGIC,
        ),
    ]
}
