//! Input builders shared across handler tests.

use mull::mcp::types::{
    AnalysisType, AnalyzeStepInput, CompleteThinkingInput, Complexity, NextStepInput,
    QualityFeedback, StartThinkingInput,
};

pub fn start_input(topic: &str, flow_type: Option<&str>) -> StartThinkingInput {
    StartThinkingInput {
        topic: topic.to_string(),
        complexity: Some(Complexity::Moderate),
        focus: None,
        flow_type: flow_type.map(|s| s.to_string()),
    }
}

pub fn next_input(session_id: &str, step_result: &str) -> NextStepInput {
    NextStepInput {
        session_id: session_id.to_string(),
        step_result: step_result.to_string(),
        quality_feedback: None,
    }
}

pub fn next_input_scored(session_id: &str, step_result: &str, score: f64) -> NextStepInput {
    NextStepInput {
        session_id: session_id.to_string(),
        step_result: step_result.to_string(),
        quality_feedback: Some(QualityFeedback {
            quality_score: score,
            feedback: None,
            improvement_areas: None,
        }),
    }
}

pub fn analyze_input(
    session_id: &str,
    step_name: &str,
    step_result: &str,
    analysis_type: AnalysisType,
) -> AnalyzeStepInput {
    AnalyzeStepInput {
        session_id: session_id.to_string(),
        step_name: step_name.to_string(),
        step_result: step_result.to_string(),
        analysis_type,
    }
}

pub fn complete_input(session_id: &str, final_insights: Option<&str>) -> CompleteThinkingInput {
    CompleteThinkingInput {
        session_id: session_id.to_string(),
        final_insights: final_insights.map(|s| s.to_string()),
    }
}
