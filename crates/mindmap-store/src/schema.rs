use rusqlite::Connection;

use mindmap_core::{MindmapError, MindmapResult};

pub const SCHEMA_VERSION: i64 = 1;

/// The snapshot table holds at most one row (`id = 1`).
pub fn init_db(conn: &Connection) -> MindmapResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS snapshots (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            body TEXT NOT NULL, -- JSON mindmap snapshot
            graph_count INTEGER NOT NULL DEFAULT 0,
            saved_at TEXT NOT NULL
        );
        ",
    )
    .map_err(|e| MindmapError::Storage(e.to_string()))?;

    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| MindmapError::Storage(e.to_string()))?;
    if version > SCHEMA_VERSION {
        return Err(MindmapError::Storage(format!(
            "database schema version {version} is newer than supported ({SCHEMA_VERSION})"
        )));
    }
    if version < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(|e| MindmapError::Storage(e.to_string()))?;
    }
    Ok(())
}
