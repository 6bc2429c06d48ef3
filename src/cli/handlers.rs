//! CLI command handlers. Everything except `mcp`/`validate`, which are
//! handled in `main` (the validate path must not touch the database).

use anyhow::Result;
use chrono::Utc;

use crate::cli::output::{ellipsize, print_json};
use crate::cli::SessionCommands;
use crate::init::AppContext;
use crate::models::session::SessionStatus;

pub async fn flows(ctx: &AppContext, json: bool) -> Result<()> {
    let config = ctx.config();
    if json {
        let rows: Vec<serde_json::Value> = config
            .flow_types()
            .iter()
            .filter_map(|t| config.flows.get(*t).map(|flow| (t, flow)))
            .map(|(t, flow)| {
                serde_json::json!({
                    "flow_type": t,
                    "name": flow.name,
                    "description": flow.description,
                    "steps": flow.steps.iter().map(|s| &s.name).collect::<Vec<_>>(),
                })
            })
            .collect();
        return print_json(&rows);
    }

    for flow_type in config.flow_types() {
        let Some(flow) = config.flows.get(flow_type) else {
            continue;
        };
        let default_marker = if flow_type == config.server.default_flow {
            " (default)"
        } else {
            ""
        };
        println!("{}{} — {}", flow_type, default_marker, flow.description);
        for step in &flow.steps {
            let mut notes: Vec<String> = Vec::new();
            if let Some(reference) = &step.for_each {
                notes.push(format!("for_each {}", reference));
            }
            if let Some(cond) = &step.conditional {
                notes.push(format!("if {}", cond.source()));
            }
            if step.retry_on_failure {
                notes.push(format!("gate {}", step.quality_threshold));
            }
            if step.is_final {
                notes.push("final".to_string());
            }
            let suffix = if notes.is_empty() {
                String::new()
            } else {
                format!("  [{}]", notes.join(", "))
            };
            println!("  - {} → {}{}", step.name, step.template, suffix);
        }
    }
    Ok(())
}

pub async fn templates(ctx: &AppContext, json: bool) -> Result<()> {
    let infos = ctx.templates.list();
    if json {
        let rows: Vec<serde_json::Value> = infos
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "required_params": t.required_params,
                    "optional_params": t.optional_params,
                    "expected_output": t.expected_output,
                    "uses": t.uses,
                })
            })
            .collect();
        return print_json(&rows);
    }

    for info in infos {
        println!(
            "{} ({:?}) — {}",
            info.name, info.expected_output, info.description
        );
        println!(
            "  required: [{}]  optional: [{}]  uses: {}",
            info.required_params.join(", "),
            info.optional_params.join(", "),
            info.uses
        );
    }
    Ok(())
}

pub async fn sessions(ctx: &AppContext, cmd: &SessionCommands, json: bool) -> Result<()> {
    match cmd {
        SessionCommands::List { status, limit } => {
            let status = status.as_deref().map(parse_status).transpose()?;
            let rows = ctx.store.list_sessions(status, *limit).await?;
            if json {
                return print_json(&rows);
            }
            if rows.is_empty() {
                println!("no sessions");
                return Ok(());
            }
            for row in rows {
                println!(
                    "{}  {}  {}  step {} ({})  {}",
                    row.session_id,
                    row.status,
                    row.flow_type,
                    row.step_number,
                    row.current_step,
                    ellipsize(&row.topic, 60),
                );
            }
            Ok(())
        }

        SessionCommands::Show { session_id } => {
            // Internal read: do not refresh updated_at.
            let session = ctx.sessions.get(session_id, false, Utc::now()).await?;
            if json {
                return print_json(&session);
            }
            println!("session   {}", session.session_id);
            println!("topic     {}", session.topic);
            println!("flow      {}", session.flow_type);
            println!("status    {}", session.status);
            println!(
                "cursor    {} (step_number {}, retry {})",
                session.current_step, session.step_number, session.retry_count
            );
            println!("steps:");
            for row in &session.steps {
                let iteration = row
                    .iteration_index
                    .map(|i| format!("[{}]", i))
                    .unwrap_or_default();
                let score = row
                    .quality_score
                    .map(|s| format!(" score {:.2}", s))
                    .unwrap_or_default();
                println!("  {}{} — {}{}", row.step_name, iteration, row.status, score);
            }
            Ok(())
        }

        SessionCommands::Delete { session_id } => {
            let removed = ctx.store.delete_session(session_id).await?;
            if removed {
                println!("deleted {}", session_id);
            } else {
                println!("no such session: {}", session_id);
            }
            Ok(())
        }

        SessionCommands::Cleanup { days } => {
            let cutoff = Utc::now() - chrono::Duration::days(*days);
            let removed = ctx.store.delete_older_than(cutoff).await?;
            println!("removed {} session(s) older than {} day(s)", removed, days);
            Ok(())
        }
    }
}

fn parse_status(text: &str) -> Result<SessionStatus> {
    match text {
        "active" => Ok(SessionStatus::Active),
        "completed" => Ok(SessionStatus::Completed),
        "failed" => Ok(SessionStatus::Failed),
        "expired" => Ok(SessionStatus::Expired),
        other => anyhow::bail!(
            "unknown status '{}' (expected active, completed, failed or expired)",
            other
        ),
    }
}
