use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use mindmap_core::{Mindmap, MindmapError, MindmapResult, MindmapStore, Updater};

use crate::schema::init_db;

/// Keeps the mindmap snapshot as a single row in SQLite. `update` runs in an
/// IMMEDIATE transaction, so the write lock is held from the read onward.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(path: &Path) -> MindmapResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MindmapError::Storage(format!("cannot create db directory: {e}")))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| MindmapError::Storage(format!("cannot open database: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| MindmapError::Storage(e.to_string()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| MindmapError::Storage(e.to_string()))?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> MindmapResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| MindmapError::Storage(format!("cannot open in-memory db: {e}")))?;
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MindmapResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MindmapError::Storage("database lock poisoned".into()))
    }

    /// When the snapshot was last written, if ever.
    pub fn saved_at(&self) -> MindmapResult<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row("SELECT saved_at FROM snapshots WHERE id = 1", [], |row| row.get(0))
            .optional()
            .map_err(|e| MindmapError::Storage(e.to_string()))?;
        Ok(raw
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }
}

fn read_snapshot(conn: &Connection) -> MindmapResult<Mindmap> {
    let body: Option<String> = conn
        .query_row("SELECT body FROM snapshots WHERE id = 1", [], |row| row.get(0))
        .optional()
        .map_err(|e| MindmapError::Storage(e.to_string()))?;
    Ok(match body {
        Some(text) => Mindmap::from_snapshot_lossy(&text),
        None => Mindmap::new(),
    })
}

fn write_snapshot(conn: &Connection, mindmap: &Mindmap) -> MindmapResult<()> {
    let body = mindmap.to_snapshot()?;
    conn.execute(
        "INSERT INTO snapshots (id, body, graph_count, saved_at) VALUES (1, ?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET
            body = excluded.body,
            graph_count = excluded.graph_count,
            saved_at = excluded.saved_at",
        params![body, mindmap.graphs.len() as i64, Utc::now().to_rfc3339()],
    )
    .map_err(|e| MindmapError::Storage(e.to_string()))?;
    Ok(())
}

impl MindmapStore for SqliteStore {
    fn load(&self) -> MindmapResult<Mindmap> {
        read_snapshot(&*self.conn()?)
    }

    fn save(&self, mindmap: &Mindmap) -> MindmapResult<()> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| MindmapError::Storage(e.to_string()))?;
        write_snapshot(&tx, mindmap)?;
        tx.commit()
            .map_err(|e| MindmapError::Storage(e.to_string()))?;
        debug!(graphs = mindmap.graphs.len(), "snapshot saved to sqlite");
        Ok(())
    }

    fn clear(&self) -> MindmapResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM snapshots", [])
            .map_err(|e| MindmapError::Storage(e.to_string()))?;
        Ok(())
    }

    fn update(&self, apply: &mut Updater<'_>) -> MindmapResult<Mindmap> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| MindmapError::Storage(e.to_string()))?;
        let mut mindmap = read_snapshot(&tx)?;
        apply(&mut mindmap)?;
        write_snapshot(&tx, &mindmap)?;
        tx.commit()
            .map_err(|e| MindmapError::Storage(e.to_string()))?;
        debug!(graphs = mindmap.graphs.len(), "snapshot updated in sqlite");
        Ok(mindmap)
    }
}
