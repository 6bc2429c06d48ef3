use serde::Deserialize;

use crate::db::connection::MullDb;
use crate::MullError;

/// Current schema version recorded in `_meta:schema`.
pub const SCHEMA_VERSION: i64 = 1;

/// Initial schema: session, session_step, session_current, _meta.
const SCHEMA_001: &str = include_str!("migrations/001_initial_schema.surql");

/// Apply the database schema.
///
/// Migrations are forward-only and idempotent: every statement uses
/// `OVERWRITE`, so re-applying on startup is safe. The `_meta:schema` row is
/// written last so a partially applied schema never advertises the new
/// version.
pub async fn apply_schema(db: &MullDb) -> Result<(), MullError> {
    db.query(SCHEMA_001).await?;
    db.query("UPSERT _meta:schema SET version = $version")
        .bind(("version", SCHEMA_VERSION))
        .await?;
    Ok(())
}

/// Read the recorded schema version, if any.
pub async fn schema_version(db: &MullDb) -> Result<Option<i64>, MullError> {
    #[derive(Deserialize)]
    struct VersionRow {
        version: i64,
    }
    let mut response = db.query("SELECT version FROM _meta:schema").await?;
    let row: Option<VersionRow> = response.take(0)?;
    Ok(row.map(|r| r.version))
}
