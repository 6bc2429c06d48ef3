//! Test harness: an isolated in-memory server per test.

use std::io::Write;
use std::sync::Arc;

use tempfile::TempDir;

use mull::init::AppContext;
use mull::mcp::server::MullServer;

/// Each harness wires a full AppContext (config snapshot, in-memory
/// database, managers) and a server over it. Nothing touches the
/// filesystem except an optional temp config file.
pub struct TestHarness {
    pub ctx: Arc<AppContext>,
    pub server: MullServer,
    /// Keeps a temp config directory alive for harnesses built from YAML.
    #[allow(dead_code)]
    temp_dir: Option<TempDir>,
}

impl TestHarness {
    /// Builtin flows and templates, in-memory database.
    pub async fn new() -> Self {
        let mut snapshot = mull::config::load(None).expect("builtin config loads");
        snapshot.server.database_path = ":memory:".to_string();
        let ctx = Arc::new(
            AppContext::from_snapshot(snapshot, None)
                .await
                .expect("context builds"),
        );
        Self {
            server: MullServer::new(ctx.clone()),
            ctx,
            temp_dir: None,
        }
    }

    /// Harness over a YAML config document (merged over builtins). The
    /// database path is forced to `:memory:`.
    pub async fn with_config(yaml: &str) -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let path = temp_dir.path().join("mull.yaml");
        let mut file = std::fs::File::create(&path).expect("config file");
        file.write_all(yaml.as_bytes()).expect("write config");

        let mut snapshot = mull::config::load(Some(&path)).expect("config loads");
        snapshot.server.database_path = ":memory:".to_string();
        let ctx = Arc::new(
            AppContext::from_snapshot(snapshot, Some(path))
                .await
                .expect("context builds"),
        );
        Self {
            server: MullServer::new(ctx.clone()),
            ctx,
            temp_dir: Some(temp_dir),
        }
    }

    /// Load the session fresh through the manager without touching
    /// `updated_at` (internal-reader path).
    pub async fn session(&self, session_id: &str) -> mull::models::session::Session {
        self.ctx
            .sessions
            .get(session_id, false, chrono::Utc::now())
            .await
            .expect("session loads")
    }
}

/// Assert the core session invariant: `step_number` equals the number of
/// completed step rows.
pub fn assert_step_invariant(session: &mull::models::session::Session) {
    assert_eq!(
        session.step_number as usize,
        session.completed_steps(),
        "step_number must equal the count of completed step rows"
    );
}
