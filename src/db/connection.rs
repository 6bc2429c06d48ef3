use surrealdb::engine::any::Any;
use surrealdb::Surreal;

use crate::MullError;

/// Unified database handle type over the embedded engines.
pub type MullDb = Surreal<Any>;

/// Sentinel `database_path` selecting the in-memory engine.
pub const MEMORY_PATH: &str = ":memory:";

/// Initialize and connect to the embedded database.
///
/// `database_path` is either a filesystem path (durable RocksDB storage) or
/// [`MEMORY_PATH`] for a throwaway in-memory instance. The server performs
/// no other I/O, so this is the only place a path leaves the config.
pub async fn init_db(database_path: &str) -> Result<MullDb, MullError> {
    let endpoint = if database_path == MEMORY_PATH {
        "memory".to_string()
    } else {
        if let Some(parent) = std::path::Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        format!("rocksdb:{database_path}")
    };

    let db = surrealdb::engine::any::connect(endpoint).await?;
    db.use_ns("mull").use_db("sessions").await?;
    Ok(db)
}
