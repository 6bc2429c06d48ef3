//! The session manager: authoritative owner of mutable session state.
//!
//! A bounded cache of hot sessions sits in front of the persistent store;
//! every mutation writes through. A per-session async mutex linearises
//! writers to the same session while distinct sessions proceed
//! independently. Expiry is enforced on every load and by a periodic sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::models::session::{
    Session, SessionStatus, StepResult, StepStatus, COMPLETE_SENTINEL,
};
use crate::store::SessionStore;
use crate::MullError;

/// Interval between expiry sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    cache: Cache<String, Session>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    max_sessions: usize,
    timeout_minutes: i64,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, config: &ServerConfig) -> Self {
        Self {
            store,
            cache: Cache::builder()
                .max_capacity(config.session_cache_size)
                .build(),
            locks: Mutex::new(HashMap::new()),
            max_sessions: config.max_sessions,
            timeout_minutes: config.session_timeout_minutes,
        }
    }

    /// Acquire the write lock for one session. Held across a whole tool
    /// call so per-session operations linearise; never held across work on
    /// a different session.
    pub async fn lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Create a new session positioned on `first_step` and persist it.
    ///
    /// Enforces `max_sessions` over currently active sessions.
    pub async fn create(
        &self,
        topic: &str,
        flow_type: &str,
        first_step: &str,
        context: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<Session, MullError> {
        let active = self.store.count_active().await?;
        if active >= self.max_sessions {
            return Err(MullError::Validation(format!(
                "session limit reached ({} active, max {})",
                active, self.max_sessions
            )));
        }

        let session = Session::new(topic, flow_type, first_step, context, now);
        self.store.save_session(&session).await?;
        self.cache
            .insert(session.session_id.clone(), session.clone())
            .await;
        info!(session_id = %session.session_id, flow_type, "session created");
        Ok(session)
    }

    /// Load a session, enforcing expiry.
    ///
    /// `touch` refreshes `updated_at` and must be set only by MCP tool
    /// callers; internal readers (CLI listings, sweeps) leave it alone.
    pub async fn get(
        &self,
        session_id: &str,
        touch: bool,
        now: DateTime<Utc>,
    ) -> Result<Session, MullError> {
        let mut session = match self.cache.get(session_id).await {
            Some(hit) => hit,
            None => {
                let loaded = self.store.load_session(session_id).await?.ok_or_else(|| {
                    MullError::SessionNotFound {
                        session_id: session_id.to_string(),
                    }
                })?;
                self.cache
                    .insert(session_id.to_string(), loaded.clone())
                    .await;
                loaded
            }
        };

        if self.is_stale(&session, now) {
            self.store
                .mark_status(session_id, SessionStatus::Expired, now)
                .await?;
            session.status = SessionStatus::Expired;
            self.cache.invalidate(session_id).await;
            return Err(MullError::SessionExpired {
                session_id: session_id.to_string(),
            });
        }

        if touch && session.status == SessionStatus::Active {
            session.updated_at = now;
            self.store.touch(session_id, now).await?;
            self.cache
                .insert(session_id.to_string(), session.clone())
                .await;
        }

        Ok(session)
    }

    /// Like [`Self::get`] but additionally rejects terminal sessions.
    pub async fn get_active(
        &self,
        session_id: &str,
        touch: bool,
        now: DateTime<Utc>,
    ) -> Result<Session, MullError> {
        let session = self.get(session_id, touch, now).await?;
        if session.status.is_terminal() {
            return Err(MullError::SessionTerminal {
                session_id: session_id.to_string(),
                status: session.status.to_string(),
            });
        }
        Ok(session)
    }

    /// Complete the cursor's pending row with the host's reply.
    ///
    /// Updates step outputs, the quality score map and `step_number`
    /// (count of completed rows), then writes through.
    pub async fn complete_cursor_row(
        &self,
        session: &mut Session,
        raw_text: &str,
        structured_output: Option<Value>,
        quality_score: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<(), MullError> {
        let step_name = session.current_step.clone();
        // Normal path: the cursor's pending row. Recovery path: the unit's
        // last row regardless of status (a failed render or fan-out error
        // left no pending row); reusing it keeps the store's unit key
        // unique. A brand-new row only appears if the unit never had one.
        let seq = match session.cursor_row_index() {
            Some(seq) => seq,
            None => match session.steps.iter().rposition(|r| {
                r.step_name == step_name && r.iteration_index == session.iteration_index
            }) {
                Some(seq) => seq,
                None => {
                    session.steps.push(StepResult::pending(
                        &step_name,
                        session.iteration_index,
                        now,
                    ));
                    session.steps.len() - 1
                }
            },
        };

        {
            let row = &mut session.steps[seq];
            row.status = StepStatus::Completed;
            row.raw_text = Some(raw_text.to_string());
            row.quality_score = quality_score;
            row.finished_at = Some(now);
        }

        if let Some(output) = &structured_output {
            // Iteration outputs are written at their index (not pushed) so
            // a gate retry overwrites rather than duplicates.
            if let Some(iteration) = session.steps[seq].iteration_index {
                let entry = session
                    .step_outputs
                    .entry(step_name.clone())
                    .or_insert_with(|| Value::Array(vec![]));
                if let Value::Array(items) = entry {
                    if items.len() <= iteration {
                        items.resize(iteration + 1, Value::Null);
                    }
                    items[iteration] = output.clone();
                }
            } else {
                session
                    .step_outputs
                    .insert(step_name.clone(), output.clone());
            }
        }
        if let Some(score) = quality_score {
            session.quality_scores.insert(step_name, score);
        }
        session.step_number = session.completed_steps() as u32;
        session.updated_at = now;

        self.store
            .update_step_result(
                &session.session_id,
                seq,
                &session.steps[seq],
                structured_output.as_ref(),
            )
            .await?;
        self.persist_cursor(session, now).await
    }

    /// Put the cursor row back to pending for a quality-gate retry.
    pub async fn reset_for_retry(
        &self,
        session: &mut Session,
        retry_count: u32,
        now: DateTime<Utc>,
    ) -> Result<(), MullError> {
        let seq = session
            .steps
            .iter()
            .rposition(|r| {
                r.step_name == session.current_step
                    && r.iteration_index == session.iteration_index
            })
            .ok_or_else(|| {
                MullError::Internal(format!(
                    "no row to retry for cursor '{}' of session '{}'",
                    session.current_step, session.session_id
                ))
            })?;

        {
            let row = &mut session.steps[seq];
            row.status = StepStatus::Pending;
            row.retry_count = retry_count;
            row.started_at = now;
            row.finished_at = None;
        }
        session.retry_count = retry_count;
        session.step_number = session.completed_steps() as u32;
        session.updated_at = now;

        self.store
            .update_step_result(&session.session_id, seq, &session.steps[seq], None)
            .await?;
        self.persist_cursor(session, now).await
    }

    /// Record `skipped` rows for steps passed over during a walk. A step
    /// skipped again after an earlier failure reuses its existing row.
    pub async fn record_skipped(
        &self,
        session: &mut Session,
        steps: &[String],
        now: DateTime<Utc>,
    ) -> Result<(), MullError> {
        for step in steps {
            let seq = match session
                .steps
                .iter()
                .rposition(|r| &r.step_name == step && r.iteration_index.is_none())
            {
                Some(seq) => {
                    let row = &mut session.steps[seq];
                    row.status = StepStatus::Skipped;
                    row.finished_at = Some(now);
                    seq
                }
                None => {
                    session.steps.push(StepResult::skipped(step, now));
                    session.steps.len() - 1
                }
            };
            self.store
                .append_step_result(&session.session_id, seq, &session.steps[seq], None)
                .await?;
            debug!(session_id = %session.session_id, step, "step skipped");
        }
        if !steps.is_empty() {
            session.updated_at = now;
            self.persist_cursor(session, now).await?;
        }
        Ok(())
    }

    /// Move the cursor onto a step (or one of its iterations), creating the
    /// pending row.
    pub async fn enter_step(
        &self,
        session: &mut Session,
        step_name: &str,
        iteration_index: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<(), MullError> {
        session.current_step = step_name.to_string();
        session.iteration_index = iteration_index;
        session.retry_count = 0;
        session
            .steps
            .push(StepResult::pending(step_name, iteration_index, now));
        session.updated_at = now;

        let seq = session.steps.len() - 1;
        self.store
            .append_step_result(&session.session_id, seq, &session.steps[seq], None)
            .await?;
        self.persist_cursor(session, now).await
    }

    /// Record a failed row for `step_name` without moving the cursor
    /// (fan-out resolution failures). A repeated failure reuses the same
    /// row, matching the store's unit key.
    pub async fn fail_step(
        &self,
        session: &mut Session,
        step_name: &str,
        now: DateTime<Utc>,
    ) -> Result<(), MullError> {
        let seq = match session
            .steps
            .iter()
            .rposition(|r| r.step_name == step_name && r.iteration_index.is_none())
        {
            Some(seq) => seq,
            None => {
                session.steps.push(StepResult::pending(step_name, None, now));
                session.steps.len() - 1
            }
        };
        {
            let row = &mut session.steps[seq];
            row.status = StepStatus::Failed;
            row.finished_at = Some(now);
        }
        session.updated_at = now;

        self.store
            .append_step_result(&session.session_id, seq, &session.steps[seq], None)
            .await?;
        self.persist_cursor(session, now).await
    }

    /// Set the cursor to the completion sentinel.
    pub async fn complete_flow(
        &self,
        session: &mut Session,
        now: DateTime<Utc>,
    ) -> Result<(), MullError> {
        session.current_step = COMPLETE_SENTINEL.to_string();
        session.iteration_index = None;
        session.retry_count = 0;
        session.updated_at = now;
        self.persist_cursor(session, now).await
    }

    /// Transition the session to a (usually terminal) status.
    pub async fn mark_status(
        &self,
        session: &mut Session,
        status: SessionStatus,
        now: DateTime<Utc>,
    ) -> Result<(), MullError> {
        session.status = status;
        session.updated_at = now;
        self.store
            .mark_status(&session.session_id, status, now)
            .await?;
        self.cache
            .insert(session.session_id.clone(), session.clone())
            .await;
        Ok(())
    }

    /// Replace the session context (final insights, derived knobs).
    pub async fn set_context(
        &self,
        session: &mut Session,
        context: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<(), MullError> {
        session.context = context;
        session.updated_at = now;
        self.store
            .update_context(&session.session_id, &session.context, now)
            .await?;
        self.cache
            .insert(session.session_id.clone(), session.clone())
            .await;
        Ok(())
    }

    /// Mark every over-age active session expired. Returns how many.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<usize, MullError> {
        let cutoff = now - chrono::Duration::minutes(self.timeout_minutes);
        let stale = self.store.list_expired(cutoff).await?;
        let count = stale.len();
        for session_id in stale {
            self.store
                .mark_status(&session_id, SessionStatus::Expired, now)
                .await?;
            self.cache.invalidate(&session_id).await;
            info!(session_id = %session_id, "session expired");
        }
        Ok(count)
    }

    /// Spawn the periodic expiry sweep. The task runs for the life of the
    /// process; it is the only background work the server does.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match manager.expire_stale(Utc::now()).await {
                    Ok(0) => {}
                    Ok(n) => debug!("expiry sweep marked {} session(s)", n),
                    Err(e) => warn!("expiry sweep failed: {}", e),
                }
            }
        })
    }

    fn is_stale(&self, session: &Session, now: DateTime<Utc>) -> bool {
        session.status == SessionStatus::Active
            && now - session.updated_at > chrono::Duration::minutes(self.timeout_minutes)
    }

    async fn persist_cursor(
        &self,
        session: &Session,
        now: DateTime<Utc>,
    ) -> Result<(), MullError> {
        self.store
            .update_current_step(
                &session.session_id,
                &session.current_step,
                session.step_number,
                session.iteration_index,
                session.retry_count,
                now,
            )
            .await?;
        self.cache
            .insert(session.session_id.clone(), session.clone())
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{apply_schema, init_db};
    use crate::store::SurrealSessionStore;
    use serde_json::json;

    async fn manager_with_timeout(timeout_minutes: i64) -> SessionManager {
        let db = init_db(":memory:").await.expect("memory db");
        apply_schema(&db).await.expect("schema");
        let store = Arc::new(SurrealSessionStore::new(Arc::new(db)));
        let config = ServerConfig {
            session_timeout_minutes: timeout_minutes,
            max_sessions: 3,
            ..ServerConfig::default()
        };
        SessionManager::new(store, &config)
    }

    fn ctx() -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("complexity".into(), json!("moderate"));
        m
    }

    #[tokio::test]
    async fn create_then_get() {
        let manager = manager_with_timeout(60).await;
        let now = Utc::now();
        let created = manager
            .create("topic", "quick_analysis", "decompose", ctx(), now)
            .await
            .unwrap();
        let got = manager.get(&created.session_id, false, now).await.unwrap();
        assert_eq!(got.current_step, "decompose");
        assert_eq!(got.step_number, 0);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let manager = manager_with_timeout(60).await;
        assert!(matches!(
            manager.get("nope", false, Utc::now()).await.unwrap_err(),
            MullError::SessionNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn session_limit_is_enforced() {
        let manager = manager_with_timeout(60).await;
        let now = Utc::now();
        for _ in 0..3 {
            manager
                .create("t", "quick_analysis", "decompose", ctx(), now)
                .await
                .unwrap();
        }
        let err = manager
            .create("t", "quick_analysis", "decompose", ctx(), now)
            .await
            .unwrap_err();
        assert!(matches!(err, MullError::Validation(_)));
    }

    #[tokio::test]
    async fn stale_session_expires_on_touch() {
        let manager = manager_with_timeout(1).await;
        let now = Utc::now();
        let created = manager
            .create("t", "quick_analysis", "decompose", ctx(), now)
            .await
            .unwrap();

        // Just inside the window: still served.
        let slightly_later = now + chrono::Duration::seconds(30);
        assert!(manager
            .get(&created.session_id, false, slightly_later)
            .await
            .is_ok());

        // Past the window: expired on first touch, and stays expired.
        let much_later = now + chrono::Duration::minutes(2);
        assert!(matches!(
            manager
                .get(&created.session_id, false, much_later)
                .await
                .unwrap_err(),
            MullError::SessionExpired { .. }
        ));
        assert!(matches!(
            manager
                .get_active(&created.session_id, false, much_later)
                .await
                .unwrap_err(),
            MullError::SessionTerminal { .. }
        ));
    }

    #[tokio::test]
    async fn terminal_session_rejected_by_get_active() {
        let manager = manager_with_timeout(60).await;
        let now = Utc::now();
        let mut session = manager
            .create("t", "quick_analysis", "decompose", ctx(), now)
            .await
            .unwrap();
        manager
            .mark_status(&mut session, SessionStatus::Completed, now)
            .await
            .unwrap();

        assert!(matches!(
            manager
                .get_active(&session.session_id, false, now)
                .await
                .unwrap_err(),
            MullError::SessionTerminal { .. }
        ));
        // Plain get still serves it (CLI inspection).
        assert!(manager.get(&session.session_id, false, now).await.is_ok());
    }

    #[tokio::test]
    async fn complete_row_maintains_step_number_invariant() {
        let manager = manager_with_timeout(60).await;
        let now = Utc::now();
        let mut session = manager
            .create("t", "quick_analysis", "decompose", ctx(), now)
            .await
            .unwrap();

        manager
            .complete_cursor_row(
                &mut session,
                "raw reply",
                Some(json!({"sub_questions": [{"id": "1"}]})),
                Some(0.9),
                now,
            )
            .await
            .unwrap();
        assert_eq!(session.step_number, 1);
        assert_eq!(session.completed_steps(), 1);
        assert_eq!(session.quality_scores.get("decompose"), Some(&0.9));

        // Cache round trip preserves the state.
        let reloaded = manager.get(&session.session_id, false, now).await.unwrap();
        assert_eq!(reloaded.step_number, 1);
        assert!(reloaded.step_outputs.contains_key("decompose"));
    }

    #[tokio::test]
    async fn retry_resets_row_to_pending() {
        let manager = manager_with_timeout(60).await;
        let now = Utc::now();
        let mut session = manager
            .create("t", "quick_analysis", "decompose", ctx(), now)
            .await
            .unwrap();

        manager
            .complete_cursor_row(&mut session, "weak attempt", None, Some(0.3), now)
            .await
            .unwrap();
        manager.reset_for_retry(&mut session, 1, now).await.unwrap();

        assert_eq!(session.retry_count, 1);
        assert_eq!(session.step_number, 0);
        assert_eq!(session.steps[0].status, StepStatus::Pending);
        assert_eq!(session.steps[0].retry_count, 1);
        // The last attempt's text is retained.
        assert_eq!(session.steps[0].raw_text.as_deref(), Some("weak attempt"));
    }

    #[tokio::test]
    async fn enter_step_and_complete_flow_move_cursor() {
        let manager = manager_with_timeout(60).await;
        let now = Utc::now();
        let mut session = manager
            .create("t", "quick_analysis", "decompose", ctx(), now)
            .await
            .unwrap();

        manager
            .complete_cursor_row(&mut session, "done", None, None, now)
            .await
            .unwrap();
        manager
            .enter_step(&mut session, "evaluate", None, now)
            .await
            .unwrap();
        assert_eq!(session.current_step, "evaluate");
        assert_eq!(session.steps.len(), 2);

        manager
            .complete_cursor_row(&mut session, "eval done", None, None, now)
            .await
            .unwrap();
        manager.complete_flow(&mut session, now).await.unwrap();
        assert!(session.is_complete());
        assert_eq!(session.step_number, 2);
    }

    #[tokio::test]
    async fn expire_stale_sweeps_old_sessions() {
        let manager = manager_with_timeout(1).await;
        let now = Utc::now();
        manager
            .create("t", "quick_analysis", "decompose", ctx(), now)
            .await
            .unwrap();

        let later = now + chrono::Duration::minutes(5);
        let expired = manager.expire_stale(later).await.unwrap();
        assert_eq!(expired, 1);
        // Second sweep finds nothing.
        assert_eq!(manager.expire_stale(later).await.unwrap(), 0);
    }
}
