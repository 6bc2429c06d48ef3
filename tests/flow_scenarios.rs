//! End-to-end flow scenarios: fan-out, quality-gated retry, conditional
//! skip, empty and malformed fan-out inputs.

mod common;

use common::harness::{assert_step_invariant, TestHarness};
use common::*;
use mull::models::session::{StepStatus, COMPLETE_SENTINEL};
use mull::MullError;
use pretty_assertions::assert_eq;

const FANOUT_FLOW: &str = r#"
server:
  default_flow: fanout
thinking_flows:
  fanout:
    description: decompose, per-question evidence, final evaluation
    steps:
      - name: decompose
        template: decomposition
      - name: collect_evidence
        template: evidence_collection
        depends_on: [decompose]
        for_each: "decompose.sub_questions"
      - name: evaluate
        template: critical_evaluation
        depends_on: [collect_evidence]
        final: true
"#;

/// Seed scenario 1: decomposition fan-out over three sub-questions.
#[tokio::test]
async fn decomposition_fan_out() {
    let harness = TestHarness::with_config(FANOUT_FLOW).await;

    let started = harness
        .server
        .handle_start_thinking(start_input("How to improve team productivity?", None))
        .await
        .expect("start_thinking");
    assert_eq!(started.step, "decompose");
    let session_id = started.session_id.clone();

    // Feed the decomposition; expect the first fan-out iteration.
    let decomposition = r#"{"sub_questions":[{"id":"1"},{"id":"2"},{"id":"3"}]}"#;
    let first = harness
        .server
        .handle_next_step(next_input(&session_id, decomposition))
        .await
        .expect("first iteration");
    assert_eq!(first.step, "collect_evidence");
    assert_eq!(first.context["item"]["id"], "1");
    assert_eq!(first.context["total_items"], 3);

    // Two more iterations.
    let second = harness
        .server
        .handle_next_step(next_input(&session_id, r#"{"evidence":["a"]}"#))
        .await
        .expect("second iteration");
    assert_eq!(second.step, "collect_evidence");
    assert_eq!(second.context["item"]["id"], "2");

    let third = harness
        .server
        .handle_next_step(next_input(&session_id, r#"{"evidence":["b"]}"#))
        .await
        .expect("third iteration");
    assert_eq!(third.step, "collect_evidence");
    assert_eq!(third.context["item"]["id"], "3");

    // Fourth call leaves the fan-out and enters evaluation.
    let fourth = harness
        .server
        .handle_next_step(next_input(&session_id, r#"{"evidence":["c"]}"#))
        .await
        .expect("enter evaluate");
    assert_eq!(fourth.step, "evaluate");

    // Fifth call finishes the final step; the flow is complete.
    let fifth = harness
        .server
        .handle_next_step(next_input(&session_id, r#"{"overall_score": 0.9}"#))
        .await
        .expect("flow completion");
    assert_eq!(fifth.step, COMPLETE_SENTINEL);

    let completed = harness
        .server
        .handle_complete_thinking(complete_input(&session_id, None))
        .await
        .expect("complete_thinking");
    assert_eq!(completed.step, COMPLETE_SENTINEL);

    let session = harness.session(&session_id).await;
    assert_eq!(session.completed_steps(), 5);
    assert_eq!(session.step_number, 5);
    assert_eq!(session.status.as_str(), "completed");
    assert_step_invariant(&session);

    // The fan-out step recorded one iteration output per sub-question.
    let collected = session.step_outputs["collect_evidence"].as_array().unwrap();
    assert_eq!(collected.len(), 3);
}

const GATED_FLOW: &str = r#"
server:
  default_flow: gated
thinking_flows:
  gated:
    steps:
      - name: step_a
        template: reflection
        quality_threshold: 0.8
        retry_on_failure: true
      - name: step_b
        template: reflection
        final: true
"#;

/// Seed scenario 2: a score below threshold retries twice, then the engine
/// advances regardless.
#[tokio::test]
async fn quality_gated_retry_is_bounded() {
    let harness = TestHarness::with_config(GATED_FLOW).await;
    let started = harness
        .server
        .handle_start_thinking(start_input("retry topic", None))
        .await
        .unwrap();
    let session_id = started.session_id.clone();

    let first = harness
        .server
        .handle_next_step(next_input_scored(&session_id, "weak", 0.5))
        .await
        .unwrap();
    assert_eq!(first.step, "step_a");
    assert_eq!(first.metadata["retry_count"], 1);
    assert_eq!(first.metadata["quality_gate_passed"], false);

    let second = harness
        .server
        .handle_next_step(next_input_scored(&session_id, "still weak", 0.5))
        .await
        .unwrap();
    assert_eq!(second.step, "step_a");
    assert_eq!(second.metadata["retry_count"], 2);

    // Third low score: retries exhausted, advance to step_b regardless.
    let third = harness
        .server
        .handle_next_step(next_input_scored(&session_id, "exhausted", 0.5))
        .await
        .unwrap();
    assert_eq!(third.step, "step_b");

    let session = harness.session(&session_id).await;
    assert_step_invariant(&session);
    let attempts: Vec<_> = session.rows_for("step_a").collect();
    assert_eq!(attempts.len(), 1, "retries reuse the same execution unit");
    assert_eq!(attempts[0].retry_count, 2);
    assert_eq!(attempts[0].status, StepStatus::Completed);
}

/// A score exactly at the threshold passes the gate (strict `<`).
#[tokio::test]
async fn score_at_threshold_passes() {
    let harness = TestHarness::with_config(GATED_FLOW).await;
    let started = harness
        .server
        .handle_start_thinking(start_input("boundary topic", None))
        .await
        .unwrap();

    let next = harness
        .server
        .handle_next_step(next_input_scored(&started.session_id, "adequate", 0.8))
        .await
        .unwrap();
    assert_eq!(next.step, "step_b");
    assert_eq!(next.metadata["quality_gate_passed"], true);
}

const CONDITIONAL_FLOW: &str = r#"
server:
  default_flow: conditional
thinking_flows:
  conditional:
    steps:
      - name: step_a
        template: reflection
      - name: step_b
        template: reflection
        conditional: "complexity == 'complex'"
      - name: step_c
        template: reflection
        final: true
"#;

/// Seed scenario 3: a false conditional records the step as skipped and
/// the walk continues.
#[tokio::test]
async fn conditional_skip_on_simple_complexity() {
    let harness = TestHarness::with_config(CONDITIONAL_FLOW).await;
    let started = harness
        .server
        .handle_start_thinking(mull::mcp::types::StartThinkingInput {
            topic: "conditional topic".into(),
            complexity: Some(mull::mcp::types::Complexity::Simple),
            focus: None,
            flow_type: None,
        })
        .await
        .unwrap();

    let next = harness
        .server
        .handle_next_step(next_input(&started.session_id, "step a output"))
        .await
        .unwrap();
    assert_eq!(next.step, "step_c");
    assert_eq!(next.metadata["skipped_steps"], serde_json::json!(["step_b"]));

    let session = harness.session(&started.session_id).await;
    let skipped: Vec<_> = session.rows_for("step_b").collect();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].status, StepStatus::Skipped);
    assert_step_invariant(&session);
}

/// The same flow with complex complexity enters step_b.
#[tokio::test]
async fn conditional_enters_on_complex_complexity() {
    let harness = TestHarness::with_config(CONDITIONAL_FLOW).await;
    let started = harness
        .server
        .handle_start_thinking(mull::mcp::types::StartThinkingInput {
            topic: "conditional topic".into(),
            complexity: Some(mull::mcp::types::Complexity::Complex),
            focus: None,
            flow_type: None,
        })
        .await
        .unwrap();

    let next = harness
        .server
        .handle_next_step(next_input(&started.session_id, "step a output"))
        .await
        .unwrap();
    assert_eq!(next.step, "step_b");
}

/// Seed scenario 4: fan-out over an empty array is skipped, not failed.
#[tokio::test]
async fn for_each_over_empty_array_is_skipped() {
    let harness = TestHarness::with_config(FANOUT_FLOW).await;
    let started = harness
        .server
        .handle_start_thinking(start_input("empty fan-out", None))
        .await
        .unwrap();

    let next = harness
        .server
        .handle_next_step(next_input(&started.session_id, r#"{"sub_questions":[]}"#))
        .await
        .unwrap();
    assert_eq!(next.step, "evaluate");

    let session = harness.session(&started.session_id).await;
    let rows: Vec<_> = session.rows_for("collect_evidence").collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, StepStatus::Skipped);
    assert_step_invariant(&session);
}

/// Seed scenario 5: a malformed producer reply fails fan-out resolution,
/// holds the cursor, and the session stays usable.
#[tokio::test]
async fn for_each_malformed_output_fails_without_advancing() {
    let harness = TestHarness::with_config(FANOUT_FLOW).await;
    let started = harness
        .server
        .handle_start_thinking(start_input("malformed fan-out", None))
        .await
        .unwrap();
    let session_id = started.session_id.clone();

    let err = harness
        .server
        .handle_next_step(next_input(&session_id, "I forgot to produce JSON, sorry"))
        .await
        .unwrap_err();
    assert!(matches!(err, MullError::ForEachResolution { .. }));

    let session = harness.session(&session_id).await;
    assert_eq!(session.status.as_str(), "active");
    assert_eq!(session.current_step, "decompose", "cursor is held");
    let failed: Vec<_> = session.rows_for("collect_evidence").collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, StepStatus::Failed);
    assert_step_invariant(&session);

    // analyze_step still works on the held session.
    let analysis = harness
        .server
        .handle_analyze_step(analyze_input(
            &session_id,
            "decompose",
            "I forgot to produce JSON, sorry",
            mull::mcp::types::AnalysisType::Format,
        ))
        .await
        .expect("analyze_step on held session");
    assert!(analysis.prompt_template.contains("format"));

    // Re-supplying a parseable decomposition recovers the flow.
    let recovered = harness
        .server
        .handle_next_step(next_input(
            &session_id,
            r#"{"sub_questions":[{"id":"1"}]}"#,
        ))
        .await
        .expect("recovery after fixed producer output");
    assert_eq!(recovered.step, "collect_evidence");
    assert_step_invariant(&harness.session(&session_id).await);
}

/// Builtin comprehensive_analysis runs end to end.
#[tokio::test]
async fn builtin_comprehensive_flow_runs() {
    let harness = TestHarness::new().await;
    let started = harness
        .server
        .handle_start_thinking(start_input("builtin flow", Some("comprehensive_analysis")))
        .await
        .unwrap();
    assert_eq!(started.step, "decompose");
    let session_id = started.session_id.clone();

    let step = harness
        .server
        .handle_next_step(next_input(
            &session_id,
            r#"{"sub_questions":[{"id":"1","question":"q1"}]}"#,
        ))
        .await
        .unwrap();
    assert_eq!(step.step, "collect_evidence");

    let step = harness
        .server
        .handle_next_step(next_input(&session_id, r#"{"evidence":[]}"#))
        .await
        .unwrap();
    assert_eq!(step.step, "evaluate");

    let step = harness
        .server
        .handle_next_step(next_input_scored(
            &session_id,
            r#"{"overall_score":0.85}"#,
            0.85,
        ))
        .await
        .unwrap();
    assert_eq!(step.step, "reflect");

    let step = harness
        .server
        .handle_next_step(next_input(&session_id, "final reflection"))
        .await
        .unwrap();
    assert_eq!(step.step, COMPLETE_SENTINEL);
}
