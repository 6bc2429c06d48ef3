//! Durable session storage over the embedded database.
//!
//! The relational layout is the authoritative representation: `session`
//! (topic, status, context), `session_step` (one row per execution unit,
//! keyed by `[session_id, step_name, iteration_slot]`) and `session_current`
//! (denormalised cursor). The in-memory [`Session`] is reassembled from
//! these on cache miss.
//!
//! Every operation runs once and, on failure, is retried once with a fresh
//! query before surfacing `StorageError`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use surrealdb::Datetime;
use tracing::warn;

use crate::db::connection::MullDb;
use crate::models::session::{Session, SessionStatus, StepResult, StepStatus};
use crate::MullError;

/// Iteration slot used in step record ids for plain (non-fan-out) rows.
const SCALAR_SLOT: i64 = -1;

/// Listing row for CLI inspection.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub topic: String,
    pub flow_type: String,
    pub status: SessionStatus,
    pub current_step: String,
    pub step_number: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistent session store contract.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a freshly created session (session row, cursor row, and its
    /// initial step rows) in one transaction.
    async fn save_session(&self, session: &Session) -> Result<(), MullError>;

    /// Reassemble a session from its rows. `None` when the id is unknown.
    async fn load_session(&self, session_id: &str) -> Result<Option<Session>, MullError>;

    /// Insert the row for a new execution unit.
    async fn append_step_result(
        &self,
        session_id: &str,
        seq: usize,
        row: &StepResult,
        structured_output: Option<&Value>,
    ) -> Result<(), MullError>;

    /// Update the row for an existing execution unit.
    async fn update_step_result(
        &self,
        session_id: &str,
        seq: usize,
        row: &StepResult,
        structured_output: Option<&Value>,
    ) -> Result<(), MullError>;

    /// Move the denormalised cursor and refresh `updated_at`.
    async fn update_current_step(
        &self,
        session_id: &str,
        current_step: &str,
        step_number: u32,
        iteration_index: Option<usize>,
        retry_count: u32,
        now: DateTime<Utc>,
    ) -> Result<(), MullError>;

    /// Set the session status and refresh `updated_at`.
    async fn mark_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        now: DateTime<Utc>,
    ) -> Result<(), MullError>;

    /// Replace the session context and refresh `updated_at`.
    async fn update_context(
        &self,
        session_id: &str,
        context: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<(), MullError>;

    /// Refresh `updated_at` only (MCP-tool reads).
    async fn touch(&self, session_id: &str, now: DateTime<Utc>) -> Result<(), MullError>;

    /// Ids of active sessions whose `updated_at` is before `cutoff`.
    async fn list_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, MullError>;

    /// Number of sessions currently `active`.
    async fn count_active(&self) -> Result<usize, MullError>;

    /// Session summaries, newest first.
    async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        limit: usize,
    ) -> Result<Vec<SessionSummary>, MullError>;

    /// Remove a session and all derived rows. Returns whether it existed.
    async fn delete_session(&self, session_id: &str) -> Result<bool, MullError>;

    /// Remove all sessions last updated before `cutoff`. Returns the count.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, MullError>;
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionRow {
    session_id: String,
    topic: String,
    flow_type: String,
    status: SessionStatus,
    context: Map<String, Value>,
    created_at: Datetime,
    updated_at: Datetime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StepRow {
    session_id: String,
    step_name: String,
    iteration_index: Option<i64>,
    /// `iteration_index` with `-1` standing in for scalar rows, mirrored
    /// into the record id for uniqueness.
    iteration_slot: i64,
    /// Append position within the session, for deterministic reassembly.
    seq: i64,
    status: StepStatus,
    raw_text: Option<String>,
    structured_output: Option<Value>,
    quality_score: Option<f64>,
    retry_count: i64,
    started_at: Datetime,
    finished_at: Option<Datetime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CurrentRow {
    session_id: String,
    current_step_name: String,
    step_number: i64,
    iteration_index: Option<i64>,
    retry_count: i64,
}

fn session_row(session: &Session) -> SessionRow {
    SessionRow {
        session_id: session.session_id.clone(),
        topic: session.topic.clone(),
        flow_type: session.flow_type.clone(),
        status: session.status,
        context: session.context.clone(),
        created_at: Datetime::from(session.created_at),
        updated_at: Datetime::from(session.updated_at),
    }
}

fn current_row(session: &Session) -> CurrentRow {
    CurrentRow {
        session_id: session.session_id.clone(),
        current_step_name: session.current_step.clone(),
        step_number: session.step_number as i64,
        iteration_index: session.iteration_index.map(|i| i as i64),
        retry_count: session.retry_count as i64,
    }
}

fn step_row(
    session_id: &str,
    seq: usize,
    result: &StepResult,
    structured_output: Option<&Value>,
) -> StepRow {
    StepRow {
        session_id: session_id.to_string(),
        step_name: result.step_name.clone(),
        iteration_index: result.iteration_index.map(|i| i as i64),
        iteration_slot: result
            .iteration_index
            .map(|i| i as i64)
            .unwrap_or(SCALAR_SLOT),
        seq: seq as i64,
        status: result.status,
        raw_text: result.raw_text.clone(),
        structured_output: structured_output.cloned(),
        quality_score: result.quality_score,
        retry_count: result.retry_count as i64,
        started_at: Datetime::from(result.started_at),
        finished_at: result.finished_at.map(Datetime::from),
    }
}

/// Rebuild the in-memory session from its rows.
///
/// `step_outputs` and `quality_scores` are derived from the step rows: a
/// fan-out step contributes an array of its iteration outputs in iteration
/// order, a plain step its single output; the last row (by `seq`) carrying a
/// score wins per step.
fn assemble(row: SessionRow, current: CurrentRow, mut steps: Vec<StepRow>) -> Session {
    steps.sort_by_key(|s| s.seq);

    let mut step_outputs: HashMap<String, Value> = HashMap::new();
    let mut quality_scores: HashMap<String, f64> = HashMap::new();
    let mut results: Vec<StepResult> = Vec::with_capacity(steps.len());

    for step in &steps {
        if let Some(score) = step.quality_score {
            quality_scores.insert(step.step_name.clone(), score);
        }
        if let Some(output) = &step.structured_output {
            // Same index-addressed layout the session manager maintains.
            if let Some(iteration) = step.iteration_index {
                let iteration = iteration as usize;
                let entry = step_outputs
                    .entry(step.step_name.clone())
                    .or_insert_with(|| Value::Array(vec![]));
                if let Value::Array(items) = entry {
                    if items.len() <= iteration {
                        items.resize(iteration + 1, Value::Null);
                    }
                    items[iteration] = output.clone();
                }
            } else {
                step_outputs.insert(step.step_name.clone(), output.clone());
            }
        }
        results.push(StepResult {
            step_name: step.step_name.clone(),
            iteration_index: step.iteration_index.map(|i| i as usize),
            status: step.status,
            raw_text: step.raw_text.clone(),
            quality_score: step.quality_score,
            retry_count: step.retry_count as u32,
            started_at: step.started_at.clone().into(),
            finished_at: step.finished_at.clone().map(Into::into),
        });
    }

    Session {
        session_id: row.session_id,
        topic: row.topic,
        flow_type: row.flow_type,
        status: row.status,
        current_step: current.current_step_name,
        step_number: current.step_number as u32,
        iteration_index: current.iteration_index.map(|i| i as usize),
        retry_count: current.retry_count as u32,
        context: row.context,
        steps: results,
        step_outputs,
        quality_scores,
        created_at: row.created_at.into(),
        updated_at: row.updated_at.into(),
    }
}

// ---------------------------------------------------------------------------
// SurrealDB implementation
// ---------------------------------------------------------------------------

/// Embedded-database implementation of [`SessionStore`].
pub struct SurrealSessionStore {
    db: Arc<MullDb>,
}

impl SurrealSessionStore {
    pub fn new(db: Arc<MullDb>) -> Self {
        Self { db }
    }

    async fn retry_once<T, F, Fut>(&self, op: &str, f: F) -> Result<T, MullError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, MullError>>,
    {
        match f().await {
            Ok(value) => Ok(value),
            Err(first) => {
                warn!("store operation '{}' failed, retrying once: {}", op, first);
                f().await.map_err(|second| {
                    MullError::Storage(format!("{} failed after retry: {}", op, second))
                })
            }
        }
    }

    async fn save_session_inner(&self, session: &Session) -> Result<(), MullError> {
        let mut query = self
            .db
            .query("BEGIN TRANSACTION")
            .query("UPSERT type::thing('session', $sid) CONTENT $session_row")
            .query("UPSERT type::thing('session_current', $sid) CONTENT $current_row")
            .bind(("sid", session.session_id.clone()))
            .bind(("session_row", session_row(session)))
            .bind(("current_row", current_row(session)));

        for (seq, result) in session.steps.iter().enumerate() {
            let slot_var = format!("slot_{seq}");
            let name_var = format!("name_{seq}");
            let row_var = format!("row_{seq}");
            query = query
                .query(format!(
                    "UPSERT type::thing('session_step', [$sid, ${name_var}, ${slot_var}]) \
                     CONTENT ${row_var}"
                ))
                .bind((name_var, result.step_name.clone()))
                .bind((
                    slot_var,
                    result.iteration_index.map(|i| i as i64).unwrap_or(SCALAR_SLOT),
                ))
                .bind((
                    row_var,
                    step_row(&session.session_id, seq, result, None),
                ));
        }

        query.query("COMMIT TRANSACTION").await?.check()?;
        Ok(())
    }

    async fn load_session_inner(&self, session_id: &str) -> Result<Option<Session>, MullError> {
        let mut response = self
            .db
            .query("SELECT * FROM type::thing('session', $sid)")
            .query("SELECT * FROM type::thing('session_current', $sid)")
            .query("SELECT * FROM session_step WHERE session_id = $sid ORDER BY seq ASC")
            .bind(("sid", session_id.to_string()))
            .await?;

        let session: Option<SessionRow> = response.take(0)?;
        let current: Option<CurrentRow> = response.take(1)?;
        let steps: Vec<StepRow> = response.take(2)?;

        match (session, current) {
            (Some(row), Some(cursor)) => Ok(Some(assemble(row, cursor, steps))),
            (Some(row), None) => {
                // Cursor row lost; degrade to the session row alone rather
                // than failing the lookup.
                warn!("session '{}' has no cursor row", session_id);
                let cursor = CurrentRow {
                    session_id: row.session_id.clone(),
                    current_step_name: crate::models::session::COMPLETE_SENTINEL.to_string(),
                    step_number: 0,
                    iteration_index: None,
                    retry_count: 0,
                };
                Ok(Some(assemble(row, cursor, steps)))
            }
            _ => Ok(None),
        }
    }

    async fn upsert_step_inner(
        &self,
        session_id: &str,
        seq: usize,
        result: &StepResult,
        structured_output: Option<&Value>,
    ) -> Result<(), MullError> {
        self.db
            .query(
                "UPSERT type::thing('session_step', [$sid, $step_name, $slot]) CONTENT $row",
            )
            .bind(("sid", session_id.to_string()))
            .bind(("step_name", result.step_name.clone()))
            .bind((
                "slot",
                result.iteration_index.map(|i| i as i64).unwrap_or(SCALAR_SLOT),
            ))
            .bind(("row", step_row(session_id, seq, result, structured_output)))
            .await?
            .check()?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SurrealSessionStore {
    async fn save_session(&self, session: &Session) -> Result<(), MullError> {
        self.retry_once("save_session", || self.save_session_inner(session))
            .await
    }

    async fn load_session(&self, session_id: &str) -> Result<Option<Session>, MullError> {
        self.retry_once("load_session", || self.load_session_inner(session_id))
            .await
    }

    async fn append_step_result(
        &self,
        session_id: &str,
        seq: usize,
        row: &StepResult,
        structured_output: Option<&Value>,
    ) -> Result<(), MullError> {
        self.retry_once("append_step_result", || {
            self.upsert_step_inner(session_id, seq, row, structured_output)
        })
        .await
    }

    async fn update_step_result(
        &self,
        session_id: &str,
        seq: usize,
        row: &StepResult,
        structured_output: Option<&Value>,
    ) -> Result<(), MullError> {
        self.retry_once("update_step_result", || {
            self.upsert_step_inner(session_id, seq, row, structured_output)
        })
        .await
    }

    async fn update_current_step(
        &self,
        session_id: &str,
        current_step: &str,
        step_number: u32,
        iteration_index: Option<usize>,
        retry_count: u32,
        now: DateTime<Utc>,
    ) -> Result<(), MullError> {
        self.retry_once("update_current_step", || async {
            self.db
                .query("BEGIN TRANSACTION")
                .query(
                    "UPSERT type::thing('session_current', $sid) CONTENT $current_row",
                )
                .query("UPDATE type::thing('session', $sid) SET updated_at = $now")
                .query("COMMIT TRANSACTION")
                .bind(("sid", session_id.to_string()))
                .bind((
                    "current_row",
                    CurrentRow {
                        session_id: session_id.to_string(),
                        current_step_name: current_step.to_string(),
                        step_number: step_number as i64,
                        iteration_index: iteration_index.map(|i| i as i64),
                        retry_count: retry_count as i64,
                    },
                ))
                .bind(("now", Datetime::from(now)))
                .await?
                .check()?;
            Ok(())
        })
        .await
    }

    async fn mark_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        now: DateTime<Utc>,
    ) -> Result<(), MullError> {
        self.retry_once("mark_status", || async {
            self.db
                .query(
                    "UPDATE type::thing('session', $sid) \
                     SET status = $status, updated_at = $now",
                )
                .bind(("sid", session_id.to_string()))
                .bind(("status", status))
                .bind(("now", Datetime::from(now)))
                .await?
                .check()?;
            Ok(())
        })
        .await
    }

    async fn update_context(
        &self,
        session_id: &str,
        context: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<(), MullError> {
        self.retry_once("update_context", || async {
            self.db
                .query(
                    "UPDATE type::thing('session', $sid) \
                     SET context = $context, updated_at = $now",
                )
                .bind(("sid", session_id.to_string()))
                .bind(("context", context.clone()))
                .bind(("now", Datetime::from(now)))
                .await?
                .check()?;
            Ok(())
        })
        .await
    }

    async fn touch(&self, session_id: &str, now: DateTime<Utc>) -> Result<(), MullError> {
        self.retry_once("touch", || async {
            self.db
                .query("UPDATE type::thing('session', $sid) SET updated_at = $now")
                .bind(("sid", session_id.to_string()))
                .bind(("now", Datetime::from(now)))
                .await?
                .check()?;
            Ok(())
        })
        .await
    }

    async fn list_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, MullError> {
        #[derive(Deserialize)]
        struct IdRow {
            session_id: String,
        }
        self.retry_once("list_expired", || async {
            let mut response = self
                .db
                .query(
                    "SELECT session_id FROM session \
                     WHERE status = 'active' AND updated_at < $cutoff",
                )
                .bind(("cutoff", Datetime::from(cutoff)))
                .await?;
            let rows: Vec<IdRow> = response.take(0)?;
            Ok(rows.into_iter().map(|r| r.session_id).collect())
        })
        .await
    }

    async fn count_active(&self) -> Result<usize, MullError> {
        #[derive(Deserialize)]
        struct CountRow {
            count: i64,
        }
        self.retry_once("count_active", || async {
            let mut response = self
                .db
                .query(
                    "SELECT count() AS count FROM session \
                     WHERE status = 'active' GROUP ALL",
                )
                .await?;
            let row: Option<CountRow> = response.take(0)?;
            Ok(row.map(|r| r.count as usize).unwrap_or(0))
        })
        .await
    }

    async fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        limit: usize,
    ) -> Result<Vec<SessionSummary>, MullError> {
        self.retry_once("list_sessions", || async {
            let mut response = match status {
                Some(s) => {
                    self.db
                        .query(
                            "SELECT * FROM session WHERE status = $status \
                             ORDER BY updated_at DESC LIMIT $limit",
                        )
                        .bind(("status", s))
                        .bind(("limit", limit as i64))
                        .await?
                }
                None => {
                    self.db
                        .query(
                            "SELECT * FROM session \
                             ORDER BY updated_at DESC LIMIT $limit",
                        )
                        .bind(("limit", limit as i64))
                        .await?
                }
            };
            let rows: Vec<SessionRow> = response.take(0)?;

            let mut summaries = Vec::with_capacity(rows.len());
            for row in rows {
                let mut cursor_response = self
                    .db
                    .query("SELECT * FROM type::thing('session_current', $sid)")
                    .bind(("sid", row.session_id.clone()))
                    .await?;
                let cursor: Option<CurrentRow> = cursor_response.take(0)?;
                summaries.push(SessionSummary {
                    session_id: row.session_id,
                    topic: row.topic,
                    flow_type: row.flow_type,
                    status: row.status,
                    current_step: cursor
                        .as_ref()
                        .map(|c| c.current_step_name.clone())
                        .unwrap_or_default(),
                    step_number: cursor.map(|c| c.step_number as u32).unwrap_or(0),
                    created_at: row.created_at.into(),
                    updated_at: row.updated_at.into(),
                });
            }
            Ok(summaries)
        })
        .await
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool, MullError> {
        self.retry_once("delete_session", || async {
            let existing = self.load_session_inner(session_id).await?;
            if existing.is_none() {
                return Ok(false);
            }
            self.db
                .query("BEGIN TRANSACTION")
                .query("DELETE type::thing('session', $sid)")
                .query("DELETE type::thing('session_current', $sid)")
                .query("DELETE session_step WHERE session_id = $sid")
                .query("COMMIT TRANSACTION")
                .bind(("sid", session_id.to_string()))
                .await?
                .check()?;
            Ok(true)
        })
        .await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, MullError> {
        #[derive(Deserialize)]
        struct IdRow {
            session_id: String,
        }
        let ids: Vec<String> = self
            .retry_once("delete_older_than", || async {
                let mut response = self
                    .db
                    .query("SELECT session_id FROM session WHERE updated_at < $cutoff")
                    .bind(("cutoff", Datetime::from(cutoff)))
                    .await?;
                let rows: Vec<IdRow> = response.take(0)?;
                Ok(rows.into_iter().map(|r| r.session_id).collect())
            })
            .await?;

        let mut removed = 0;
        for id in ids {
            if self.delete_session(&id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{apply_schema, init_db};
    use serde_json::json;

    async fn store() -> SurrealSessionStore {
        let db = init_db(":memory:").await.expect("memory db");
        apply_schema(&db).await.expect("schema");
        SurrealSessionStore::new(Arc::new(db))
    }

    fn sample_session() -> Session {
        let mut context = Map::new();
        context.insert("complexity".into(), json!("moderate"));
        Session::new("test topic", "quick_analysis", "decompose", context, Utc::now())
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let store = store().await;
        let session = sample_session();
        store.save_session(&session).await.unwrap();

        let loaded = store
            .load_session(&session.session_id)
            .await
            .unwrap()
            .expect("session exists");
        assert_eq!(loaded.session_id, session.session_id);
        assert_eq!(loaded.topic, "test topic");
        assert_eq!(loaded.current_step, "decompose");
        assert_eq!(loaded.steps.len(), 1);
        assert_eq!(loaded.steps[0].status, StepStatus::Pending);
        assert_eq!(loaded.context_str("complexity"), Some("moderate"));
    }

    #[tokio::test]
    async fn unknown_session_loads_none() {
        let store = store().await;
        assert!(store.load_session("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn step_rows_rebuild_outputs_and_scores() {
        let store = store().await;
        let mut session = sample_session();
        store.save_session(&session).await.unwrap();

        // Complete the first step with structured output.
        session.steps[0].status = StepStatus::Completed;
        session.steps[0].raw_text = Some("{\"sub_questions\": []}".into());
        session.steps[0].quality_score = Some(0.9);
        let output = json!({"sub_questions": [{"id": "1"}]});
        store
            .update_step_result(&session.session_id, 0, &session.steps[0], Some(&output))
            .await
            .unwrap();

        // Two fan-out iterations.
        for i in 0..2 {
            let mut row = StepResult::pending("collect", Some(i), Utc::now());
            row.status = StepStatus::Completed;
            row.raw_text = Some(format!("evidence {i}"));
            let out = json!({"evidence": [i]});
            store
                .append_step_result(&session.session_id, 1 + i, &row, Some(&out))
                .await
                .unwrap();
        }

        let loaded = store
            .load_session(&session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.steps.len(), 3);
        assert_eq!(loaded.quality_scores.get("decompose"), Some(&0.9));
        assert!(loaded.step_outputs["decompose"]["sub_questions"].is_array());
        let collected = loaded.step_outputs["collect"].as_array().unwrap();
        assert_eq!(collected.len(), 2);
    }

    #[tokio::test]
    async fn upsert_replaces_same_unit() {
        let store = store().await;
        let session = sample_session();
        store.save_session(&session).await.unwrap();

        let mut row = session.steps[0].clone();
        row.status = StepStatus::Completed;
        row.raw_text = Some("first".into());
        store
            .update_step_result(&session.session_id, 0, &row, None)
            .await
            .unwrap();
        row.raw_text = Some("second".into());
        store
            .update_step_result(&session.session_id, 0, &row, None)
            .await
            .unwrap();

        let loaded = store
            .load_session(&session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.steps.len(), 1);
        assert_eq!(loaded.steps[0].raw_text.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn cursor_and_status_updates_persist() {
        let store = store().await;
        let session = sample_session();
        store.save_session(&session).await.unwrap();

        let now = Utc::now();
        store
            .update_current_step(&session.session_id, "evaluate", 1, None, 0, now)
            .await
            .unwrap();
        store
            .mark_status(&session.session_id, SessionStatus::Completed, now)
            .await
            .unwrap();

        let loaded = store
            .load_session(&session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.current_step, "evaluate");
        assert_eq!(loaded.step_number, 1);
        assert_eq!(loaded.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn expiry_listing_respects_cutoff() {
        let store = store().await;
        let session = sample_session();
        store.save_session(&session).await.unwrap();

        let future = Utc::now() + chrono::Duration::minutes(90);
        let expired = store.list_expired(future).await.unwrap();
        assert_eq!(expired, vec![session.session_id.clone()]);

        let past = Utc::now() - chrono::Duration::minutes(90);
        assert!(store.list_expired(past).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn count_list_delete() {
        let store = store().await;
        let a = sample_session();
        let b = sample_session();
        store.save_session(&a).await.unwrap();
        store.save_session(&b).await.unwrap();

        assert_eq!(store.count_active().await.unwrap(), 2);
        let listed = store.list_sessions(None, 10).await.unwrap();
        assert_eq!(listed.len(), 2);

        assert!(store.delete_session(&a.session_id).await.unwrap());
        assert!(!store.delete_session(&a.session_id).await.unwrap());
        assert_eq!(store.count_active().await.unwrap(), 1);
    }
}
