//! Persisted flat key/value state

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use turso::{Builder, Connection};

use crate::error::{SyncError, SyncResult};

pub(crate) type DbResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS app_state (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL DEFAULT 0
    );
";

/// Key/value store the orchestrator keeps its settings in.
///
/// The connection sits behind a mutex to serialize database access.
pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    /// Open (or create) the database file and its table
    pub async fn open(db_path: &Path) -> SyncResult<Self> {
        let conn = connect(db_path).await.map_err(SyncError::state)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub async fn get(&self, key: &str) -> SyncResult<Option<String>> {
        let conn = self.conn.lock().await;
        select_value(&conn, key).await.map_err(SyncError::state)
    }

    pub async fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        let conn = self.conn.lock().await;
        upsert_value(&conn, key, value)
            .await
            .map_err(SyncError::state)
    }

    pub async fn delete(&self, key: &str) -> SyncResult<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM app_state WHERE key = ?1", turso::params![key])
            .await
            .map_err(SyncError::state)?;
        Ok(())
    }

    /// Every stored key, sorted
    pub async fn keys(&self) -> SyncResult<Vec<String>> {
        let conn = self.conn.lock().await;
        select_keys(&conn).await.map_err(SyncError::state)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> SyncResult<Option<T>> {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> SyncResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw).await
    }
}

async fn connect(db_path: &Path) -> DbResult<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let path = db_path.to_str().ok_or("Database path is not valid UTF-8")?;
    let db = Builder::new_local(path).build().await?;
    let conn = db.connect()?;
    conn.execute_batch(SCHEMA).await?;
    Ok(conn)
}

async fn select_value(conn: &Connection, key: &str) -> DbResult<Option<String>> {
    let mut rows = conn
        .query("SELECT value FROM app_state WHERE key = ?1", turso::params![key])
        .await?;
    match rows.next().await? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

async fn upsert_value(conn: &Connection, key: &str, value: &str) -> DbResult<()> {
    let now = chrono::Utc::now().timestamp_millis();
    conn.execute(
        "INSERT INTO app_state (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT (key) DO UPDATE SET value = ?2, updated_at = ?3",
        turso::params![key, value, now],
    )
    .await?;
    Ok(())
}

async fn select_keys(conn: &Connection) -> DbResult<Vec<String>> {
    let mut rows = conn
        .query("SELECT key FROM app_state ORDER BY key", ())
        .await?;
    let mut keys = Vec::new();
    while let Some(row) = rows.next().await? {
        keys.push(row.get(0)?);
    }
    Ok(keys)
}
