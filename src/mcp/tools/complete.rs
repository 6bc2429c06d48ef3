//! `complete_thinking`: close the session and render the summary report.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::mcp::server::MullServer;
use crate::mcp::types::{CompleteThinkingInput, ToolResult};
use crate::models::session::{Session, SessionStatus, StepStatus, COMPLETE_SENTINEL};
use crate::MullError;

impl MullServer {
    pub async fn handle_complete_thinking(
        &self,
        input: CompleteThinkingInput,
    ) -> Result<ToolResult, MullError> {
        if input.session_id.trim().is_empty() {
            return Err(MullError::Validation("session_id must not be empty".into()));
        }

        let now = Utc::now();
        // Mutations under the session lock; rendering happens after it is
        // released.
        let session = {
            let _guard = self.ctx.sessions.lock(&input.session_id).await;
            let mut session = self
                .ctx
                .sessions
                .get_active(&input.session_id, true, now)
                .await?;

            if let Some(insights) = input.final_insights.as_deref().filter(|i| !i.is_empty()) {
                let mut context = session.context.clone();
                context.insert("final_insights".into(), Value::String(insights.to_string()));
                self.ctx
                    .sessions
                    .set_context(&mut session, context, now)
                    .await?;
            }

            self.ctx
                .sessions
                .mark_status(&mut session, SessionStatus::Completed, now)
                .await?;
            session
        };

        let metrics = quality_metrics(&session);

        let mut params = BTreeMap::new();
        params.insert("topic".to_string(), session.topic.clone());
        params.insert("step_history".to_string(), step_history(&session));
        params.insert("quality_summary".to_string(), metrics.summary());
        if let Some(insights) = session.context_str("final_insights") {
            params.insert("final_insights".to_string(), insights.to_string());
        }
        let prompt = self.ctx.templates.get("session_summary", &params)?;

        let mut context = Map::new();
        context.insert("session_id".into(), json!(session.session_id));
        context.insert("topic".into(), json!(session.topic));
        context.insert("status".into(), json!(session.status.as_str()));

        let mut metadata = Map::new();
        metadata.insert("flow_type".into(), json!(session.flow_type));
        metadata.insert("step_number".into(), json!(session.step_number));
        metadata.insert("completed_steps".into(), json!(session.completed_steps()));
        metadata.insert(
            "skipped_steps".into(),
            json!(session
                .steps
                .iter()
                .filter(|r| r.status == StepStatus::Skipped)
                .count()),
        );
        if let Some(average) = metrics.average {
            metadata.insert("average_quality".into(), json!(average));
        }
        if let Some(minimum) = metrics.minimum {
            metadata.insert("minimum_quality".into(), json!(minimum));
        }
        metadata.insert("quality_trend".into(), json!(metrics.trend));

        Ok(ToolResult {
            tool_name: "complete_thinking".to_string(),
            session_id: session.session_id.clone(),
            step: COMPLETE_SENTINEL.to_string(),
            prompt_template: prompt,
            instructions: "Write the final report from the step history; this session is now \
                           closed"
                .to_string(),
            context,
            next_action: "Session completed; call start_thinking for a new topic".to_string(),
            metadata,
        })
    }
}

/// One line per step row, in execution order.
fn step_history(session: &Session) -> String {
    let mut lines = Vec::with_capacity(session.steps.len());
    for (index, row) in session.steps.iter().enumerate() {
        let iteration = row
            .iteration_index
            .map(|i| format!("[{}]", i))
            .unwrap_or_default();
        let score = row
            .quality_score
            .map(|s| format!(", score {:.2}", s))
            .unwrap_or_default();
        let text = row
            .raw_text
            .as_deref()
            .map(|t| {
                let snippet: String = t.chars().take(160).collect();
                format!(" — {}", snippet)
            })
            .unwrap_or_default();
        lines.push(format!(
            "{}. {}{} ({}{}){}",
            index + 1,
            row.step_name,
            iteration,
            row.status,
            score,
            text
        ));
    }
    lines.join("\n")
}

struct QualityMetrics {
    average: Option<f64>,
    minimum: Option<f64>,
    trend: &'static str,
}

impl QualityMetrics {
    fn summary(&self) -> String {
        match (self.average, self.minimum) {
            (Some(avg), Some(min)) => format!(
                "average score {:.2}, minimum {:.2}, trend {}",
                avg, min, self.trend
            ),
            _ => "no quality scores recorded".to_string(),
        }
    }
}

/// Aggregate the recorded scores in execution order: average, minimum and a
/// coarse first-half/second-half trend.
fn quality_metrics(session: &Session) -> QualityMetrics {
    let scores: Vec<f64> = session
        .steps
        .iter()
        .filter(|r| r.status == StepStatus::Completed)
        .filter_map(|r| r.quality_score)
        .collect();
    if scores.is_empty() {
        return QualityMetrics {
            average: None,
            minimum: None,
            trend: "none",
        };
    }

    let average = scores.iter().sum::<f64>() / scores.len() as f64;
    let minimum = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let trend = if scores.len() < 2 {
        "stable"
    } else {
        let half = scores.len() / 2;
        let first = scores[..half].iter().sum::<f64>() / half as f64;
        let second = scores[half..].iter().sum::<f64>() / (scores.len() - half) as f64;
        if second - first > 0.05 {
            "improving"
        } else if first - second > 0.05 {
            "declining"
        } else {
            "stable"
        }
    };

    QualityMetrics {
        average: Some(average),
        minimum: Some(minimum),
        trend,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Map;

    fn session_with_scores(scores: &[f64]) -> Session {
        let mut session = Session::new("t", "f", "a", Map::new(), Utc::now());
        session.steps.clear();
        for (i, score) in scores.iter().enumerate() {
            let mut row =
                crate::models::session::StepResult::pending(&format!("s{i}"), None, Utc::now());
            row.status = StepStatus::Completed;
            row.quality_score = Some(*score);
            session.steps.push(row);
        }
        session
    }

    #[test]
    fn metrics_over_empty_history() {
        let metrics = quality_metrics(&session_with_scores(&[]));
        assert!(metrics.average.is_none());
        assert_eq!(metrics.trend, "none");
        assert_eq!(metrics.summary(), "no quality scores recorded");
    }

    #[test]
    fn metrics_detect_improvement() {
        let metrics = quality_metrics(&session_with_scores(&[0.5, 0.6, 0.8, 0.9]));
        assert_eq!(metrics.trend, "improving");
        assert!(metrics.minimum.unwrap() - 0.5 < f64::EPSILON);
    }

    #[test]
    fn metrics_detect_decline_and_stability() {
        assert_eq!(
            quality_metrics(&session_with_scores(&[0.9, 0.8, 0.5])).trend,
            "declining"
        );
        assert_eq!(
            quality_metrics(&session_with_scores(&[0.8, 0.8])).trend,
            "stable"
        );
    }

    #[test]
    fn history_lists_iterations_and_scores() {
        let mut session = Session::new("t", "f", "a", Map::new(), Utc::now());
        session.steps[0].status = StepStatus::Completed;
        session.steps[0].quality_score = Some(0.75);
        session.steps[0].raw_text = Some("the decomposition".into());
        let mut row = crate::models::session::StepResult::pending("b", Some(1), Utc::now());
        row.status = StepStatus::Skipped;
        session.steps.push(row);

        let history = step_history(&session);
        assert!(history.contains("1. a (completed, score 0.75)"));
        assert!(history.contains("2. b[1] (skipped)"));
        assert!(history.contains("the decomposition"));
    }
}
