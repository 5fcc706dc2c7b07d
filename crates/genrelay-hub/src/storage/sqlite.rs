//! SQLite-backed persistent progress store.

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use genrelay_core::error::{GenRelayError, Result};
use genrelay_core::progress::{ProgressStore, UserProgress};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS progress (
    user_id INTEGER PRIMARY KEY,
    state TEXT NOT NULL,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);";

/// SQLite progress store — one JSON row per user.
pub struct SqliteProgressStore {
    conn: Mutex<Connection>,
}

impl SqliteProgressStore {
    /// Open or create a SQLite database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| GenRelayError::Store(format!("SQLite open error: {}", e)))?;
        Self::init(conn)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| GenRelayError::Store(format!("SQLite error: {}", e)))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| GenRelayError::Store(format!("SQLite init error: {}", e)))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| GenRelayError::Store(e.to_string()))
    }
}

#[async_trait]
impl ProgressStore for SqliteProgressStore {
    async fn get(&self, user_id: i64) -> Result<Option<UserProgress>> {
        let conn = self.lock()?;
        let state: Option<String> = conn
            .query_row(
                "SELECT state FROM progress WHERE user_id = ?1",
                rusqlite::params![user_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| GenRelayError::Store(e.to_string()))?;

        state
            .map(|s| serde_json::from_str(&s).map_err(GenRelayError::from))
            .transpose()
    }

    async fn put(&self, user_id: i64, progress: &UserProgress) -> Result<()> {
        let state = serde_json::to_string(progress)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO progress (user_id, state) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET state = excluded.state, updated_at = CURRENT_TIMESTAMP",
            rusqlite::params![user_id, state],
        )
        .map_err(|e| GenRelayError::Store(e.to_string()))?;
        Ok(())
    }
}
