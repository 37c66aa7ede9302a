//! Schema migration runner.
//!
//! Migrations run on every [`Database::new`](crate::Database::new) /
//! [`Database::open_at`](crate::Database::open_at) call, guarded by the
//! `user_version` pragma so each executes exactly once.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version. Bump and append a migration whenever the
/// schema changes.
const CURRENT_VERSION: u32 = 1;

const V001_UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Cache: one row per logical entry. `key` carries the schema-version
-- namespace; `written_at` is epoch milliseconds and drives TTL.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS cache (
    key        TEXT PRIMARY KEY NOT NULL,
    written_at INTEGER NOT NULL,
    payload    TEXT NOT NULL
);
"#;

/// Run all pending migrations against the open connection.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    tracing::debug!(
        current_version = current,
        target_version = CURRENT_VERSION,
        "checking cache database migrations"
    );

    if current < 1 {
        tracing::info!("applying migration v001 (cache table)");
        conn.execute_batch(V001_UP_SQL)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        conn.pragma_update(None, "user_version", 1)?;
    }

    Ok(())
}
