//! Builtin thinking flows, available without any config file.
//!
//! Config-file flows with the same `flow_type` override these entirely.

use serde_json::Map;

use crate::config::model::{FlowFile, StepFile};

fn step(name: &str, template_name: &str) -> StepFile {
    StepFile {
        name: name.to_string(),
        template_name: template_name.to_string(),
        required: true,
        quality_threshold: None,
        conditional: None,
        depends_on: vec![],
        for_each: None,
        parallel: false,
        retry_on_failure: false,
        is_final: false,
        instructions: String::new(),
        metadata: Map::new(),
    }
}

/// The builtin flow registry: `comprehensive_analysis` and
/// `quick_analysis`.
pub fn builtin_flows() -> Vec<(String, FlowFile)> {
    let comprehensive = FlowFile {
        name: Some("Comprehensive Analysis".to_string()),
        description: "Complete deep thinking flow: decomposition, per-question evidence \
                      collection, critical evaluation, reflection"
            .to_string(),
        steps: vec![
            StepFile {
                instructions: "Decompose the topic into focused sub-questions. Reply with \
                               JSON only."
                    .to_string(),
                ..step("decompose", "decomposition")
            },
            StepFile {
                depends_on: vec!["decompose".to_string()],
                for_each: Some("decompose.sub_questions".to_string()),
                parallel: true,
                instructions: "Collect evidence for the given sub-question. Search broadly \
                               and cite sources. Reply with JSON only."
                    .to_string(),
                ..step("collect_evidence", "evidence_collection")
            },
            StepFile {
                depends_on: vec!["collect_evidence".to_string()],
                quality_threshold: Some(0.8),
                retry_on_failure: true,
                instructions: "Evaluate the collected evidence critically; grade every \
                               claim."
                    .to_string(),
                ..step("evaluate", "critical_evaluation")
            },
            StepFile {
                depends_on: vec!["evaluate".to_string()],
                is_final: true,
                instructions: "Reflect on the reasoning so far: blind spots, confidence, \
                               open questions."
                    .to_string(),
                ..step("reflect", "reflection")
            },
        ],
    };

    let quick = FlowFile {
        name: Some("Quick Analysis".to_string()),
        description: "Fast two-step flow for simple problems".to_string(),
        steps: vec![
            StepFile {
                instructions: "Briefly decompose the topic. Reply with JSON only.".to_string(),
                ..step("decompose", "decomposition")
            },
            StepFile {
                depends_on: vec!["decompose".to_string()],
                is_final: true,
                instructions: "Evaluate the decomposition and draw conclusions.".to_string(),
                ..step("evaluate", "critical_evaluation")
            },
        ],
    };

    vec![
        ("comprehensive_analysis".to_string(), comprehensive),
        ("quick_analysis".to_string(), quick),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_flows_have_expected_shape() {
        let flows = builtin_flows();
        assert_eq!(flows.len(), 2);
        let (_, comprehensive) = &flows[0];
        assert_eq!(comprehensive.steps.len(), 4);
        assert_eq!(
            comprehensive.steps[1].for_each.as_deref(),
            Some("decompose.sub_questions")
        );
        assert!(comprehensive.steps[3].is_final);
        let (_, quick) = &flows[1];
        assert!(quick.steps[1].is_final);
    }
}
