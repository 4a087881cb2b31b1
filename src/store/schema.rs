//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS incidents (
            incident_id TEXT PRIMARY KEY,
            correlation_id TEXT NOT NULL,
            status TEXT NOT NULL,
            incident_type TEXT NOT NULL,
            severity TEXT NOT NULL,
            summary TEXT NOT NULL,
            dedup_key TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            report_json TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_incidents_updated ON incidents(updated_at);
        CREATE INDEX IF NOT EXISTS idx_incidents_dedup ON incidents(dedup_key, created_at);",
    )?;
    Ok(())
}
