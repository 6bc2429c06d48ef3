//! Shared initialization for the MCP server and the CLI.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::config::{self, ConfigSnapshot};
use crate::db::{apply_schema, init_db, MullDb};
use crate::session::SessionManager;
use crate::store::{SessionStore, SurrealSessionStore};
use crate::template::TemplateManager;
use crate::MullError;

/// Application container owning every manager, created once at startup and
/// passed by reference into tool handlers and CLI commands.
pub struct AppContext {
    snapshot: RwLock<Arc<ConfigSnapshot>>,
    config_path: Option<PathBuf>,
    pub db: Arc<MullDb>,
    pub store: Arc<dyn SessionStore>,
    pub sessions: Arc<SessionManager>,
    pub templates: Arc<TemplateManager>,
}

impl AppContext {
    /// Load configuration (builtins when `config_path` is `None`), connect
    /// the embedded database, apply the schema, and wire the managers.
    pub async fn new(config_path: Option<PathBuf>) -> Result<Self, MullError> {
        let snapshot = config::load(config_path.as_deref())?;
        Self::from_snapshot(snapshot, config_path).await
    }

    /// Wire managers from an already-loaded snapshot. Tests use this to
    /// inject `:memory:` database paths.
    pub async fn from_snapshot(
        snapshot: ConfigSnapshot,
        config_path: Option<PathBuf>,
    ) -> Result<Self, MullError> {
        let db = Arc::new(init_db(&snapshot.server.database_path).await?);
        apply_schema(&db).await?;
        tracing::info!(
            database = %snapshot.server.database_path,
            flows = snapshot.flows.len(),
            templates = snapshot.templates.len(),
            "configuration loaded"
        );

        let store: Arc<dyn SessionStore> = Arc::new(SurrealSessionStore::new(db.clone()));
        let sessions = Arc::new(SessionManager::new(store.clone(), &snapshot.server));
        let templates = Arc::new(TemplateManager::new(
            snapshot.templates.clone(),
            snapshot.server.template_cache_size,
        ));

        Ok(Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            config_path,
            db,
            store,
            sessions,
            templates,
        })
    }

    /// The current configuration snapshot. Callers keep the `Arc` for the
    /// duration of one tool call, so a concurrent reload never mixes
    /// pre- and post-reload definitions within a call.
    pub fn config(&self) -> Arc<ConfigSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Re-read the config file and atomically swap flows and templates.
    ///
    /// Server runtime options (cache sizes, timeouts, database path) need a
    /// restart; only flow and template definitions hot-reload.
    pub fn reload(&self) -> Result<(), MullError> {
        let new = Arc::new(config::load(self.config_path.as_deref())?);
        self.templates.reload(new.templates.clone());
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = new;
        tracing::info!("configuration reloaded");
        Ok(())
    }
}
