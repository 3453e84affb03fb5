//! SQLite-backed user, sample and access-log store.

use chrono::Utc;
use facegate_core::{
    AccessLog, Attempt, BackendError, Embedding, EmbeddingBackend, EmbeddingRecord, UserId,
    UserRecord,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use uuid::Uuid;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS users (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL UNIQUE,
    created_at  TEXT NOT NULL,
    last_access TEXT
);

CREATE TABLE IF NOT EXISTS embeddings (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    dimension     INTEGER NOT NULL,
    vector        BLOB NOT NULL,
    model_version TEXT,
    created_at    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_embeddings_user ON embeddings(user_id);

CREATE TABLE IF NOT EXISTS access_log (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id   TEXT REFERENCES users(id) ON DELETE SET NULL,
    success   INTEGER NOT NULL,
    distance  REAL,
    info      TEXT,
    timestamp TEXT NOT NULL
);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("user name already taken: {0}")]
    NameTaken(String),
    #[error("invalid database value: {0}")]
    InvalidDbValue(String),
}

impl From<StoreError> for BackendError {
    fn from(err: StoreError) -> Self {
        BackendError::new(err)
    }
}

type Result<T> = std::result::Result<T, StoreError>;

/// An access-log row, joined with the user's current name.
#[derive(Debug, Clone, Serialize)]
pub struct LoggedAttempt {
    pub id: i64,
    pub user_id: Option<UserId>,
    pub user_name: Option<String>,
    pub success: bool,
    pub distance: Option<f32>,
    pub info: Option<String>,
    pub timestamp: String,
}

/// SQLite store shared behind a mutex so one handle can serve several threads.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "opened face database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", 1)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a user with a fresh UUID. Names are unique.
    pub fn create_user(&self, name: &str) -> Result<UserRecord> {
        let name = name.trim();
        if self.user_by_name(name)?.is_some() {
            return Err(StoreError::NameTaken(name.to_string()));
        }

        let user = UserRecord {
            id: UserId::new(Uuid::new_v4().to_string()),
            name: name.to_string(),
            created_at: Utc::now().to_rfc3339(),
            last_access: None,
        };
        self.conn().execute(
            "INSERT INTO users (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![user.id.as_str(), user.name, user.created_at],
        )?;
        tracing::info!(id = %user.id, name = %user.name, "user created");
        Ok(user)
    }

    pub fn user(&self, id: &UserId) -> Result<Option<UserRecord>> {
        self.conn()
            .query_row(
                "SELECT id, name, created_at, last_access FROM users WHERE id = ?1",
                params![id.as_str()],
                decode_user_row,
            )
            .optional()
            .map_err(StoreError::from)
    }

    pub fn user_by_name(&self, name: &str) -> Result<Option<UserRecord>> {
        self.conn()
            .query_row(
                "SELECT id, name, created_at, last_access FROM users WHERE name = ?1",
                params![name],
                decode_user_row,
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// Look a user up by id, falling back to name.
    pub fn find_user(&self, key: &str) -> Result<UserRecord> {
        if let Some(user) = self.user(&UserId::from(key))? {
            return Ok(user);
        }
        self.user_by_name(key)?
            .ok_or_else(|| StoreError::UserNotFound(key.to_string()))
    }

    /// All users, oldest first.
    pub fn list_users(&self) -> Result<Vec<UserRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, created_at, last_access FROM users ORDER BY created_at, rowid",
        )?;
        let users = stmt
            .query_map([], decode_user_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    /// Delete a user and their samples; their log entries are kept anonymized.
    pub fn delete_user(&self, id: &UserId) -> Result<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM users WHERE id = ?1", params![id.as_str()])?;
        if deleted > 0 {
            tracing::info!(id = %id, "user deleted");
        }
        Ok(deleted > 0)
    }

    /// Number of samples stored for a user.
    pub fn sample_count(&self, id: &UserId) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM embeddings WHERE user_id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        usize::try_from(count).map_err(|_| StoreError::InvalidDbValue(format!("sample count {count}")))
    }

    /// Append a sample and return its row id.
    pub fn insert_embedding(&self, id: &UserId, embedding: &Embedding) -> Result<i64> {
        validate_embedding(&embedding.values)?;
        let conn = self.conn();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::UserNotFound(id.to_string()));
        }

        let dimension = i64::try_from(embedding.dim())
            .map_err(|_| StoreError::InvalidDbValue("embedding dimension overflow".into()))?;
        conn.execute(
            "INSERT INTO embeddings (user_id, dimension, vector, model_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.as_str(),
                dimension,
                encode_f32_blob(&embedding.values),
                embedding.model_version,
                Utc::now().to_rfc3339(),
            ],
        )?;
        let row_id = conn.last_insert_rowid();
        tracing::debug!(user = %id, row_id, dim = embedding.dim(), "embedding stored");
        Ok(row_id)
    }

    /// Every stored sample in insertion order.
    pub fn all_embeddings(&self) -> Result<Vec<EmbeddingRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT user_id, dimension, vector, model_version FROM embeddings ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(user_id, dimension, blob, model_version)| {
                let dimension = usize::try_from(dimension)
                    .map_err(|_| StoreError::InvalidDbValue(format!("dimension {dimension}")))?;
                Ok(EmbeddingRecord {
                    user_id: UserId::new(user_id),
                    embedding: Embedding {
                        values: decode_f32_blob(&blob, dimension)?,
                        model_version,
                    },
                })
            })
            .collect()
    }

    pub fn insert_attempt(&self, attempt: &Attempt) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO access_log (user_id, success, distance, info, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                attempt.user_id.as_ref().map(UserId::as_str),
                attempt.success,
                attempt.distance.map(f64::from),
                attempt.info,
                Utc::now().to_rfc3339(),
            ],
        )?;
        let log_id = conn.last_insert_rowid();
        tracing::info!(
            log_id,
            user = ?attempt.user_id.as_ref().map(UserId::as_str),
            success = attempt.success,
            "access attempt recorded"
        );
        Ok(log_id)
    }

    /// Most recent attempts first.
    pub fn recent_attempts(&self, limit: usize) -> Result<Vec<LoggedAttempt>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT l.id, l.user_id, u.name, l.success, l.distance, l.info, l.timestamp
             FROM access_log l LEFT JOIN users u ON l.user_id = u.id
             ORDER BY l.id DESC LIMIT ?1",
        )?;
        let attempts = stmt
            .query_map(params![limit], |row| {
                Ok(LoggedAttempt {
                    id: row.get(0)?,
                    user_id: row.get::<_, Option<String>>(1)?.map(UserId::new),
                    user_name: row.get(2)?,
                    success: row.get(3)?,
                    distance: row.get::<_, Option<f64>>(4)?.map(|d| d as f32),
                    info: row.get(5)?,
                    timestamp: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(attempts)
    }

    pub fn update_last_access(&self, id: &UserId) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE users SET last_access = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id.as_str()],
        )?;
        if updated == 0 {
            return Err(StoreError::UserNotFound(id.to_string()));
        }
        Ok(())
    }
}

impl EmbeddingBackend for SqliteStore {
    fn list_embeddings(&self) -> std::result::Result<Vec<EmbeddingRecord>, BackendError> {
        Ok(self.all_embeddings()?)
    }

    fn get_user(&self, id: &UserId) -> std::result::Result<Option<UserRecord>, BackendError> {
        Ok(self.user(id)?)
    }

    fn add_embedding(&self, id: &UserId, embedding: &Embedding) -> std::result::Result<(), BackendError> {
        self.insert_embedding(id, embedding)?;
        Ok(())
    }
}

impl AccessLog for SqliteStore {
    fn record_attempt(&self, attempt: &Attempt) -> std::result::Result<(), BackendError> {
        self.insert_attempt(attempt)?;
        Ok(())
    }

    fn touch_last_access(&self, id: &UserId) -> std::result::Result<(), BackendError> {
        Ok(self.update_last_access(id)?)
    }
}

fn decode_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: UserId::new(row.get::<_, String>(0)?),
        name: row.get(1)?,
        created_at: row.get(2)?,
        last_access: row.get(3)?,
    })
}

fn validate_embedding(values: &[f32]) -> Result<()> {
    if values.is_empty() {
        return Err(StoreError::InvalidDbValue("embedding is empty".into()));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(StoreError::InvalidDbValue(
            "embedding contains non-finite values".into(),
        ));
    }
    Ok(())
}

fn encode_f32_blob(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(values));
    for &value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_f32_blob(blob: &[u8], dimension: usize) -> Result<Vec<f32>> {
    let expected_len = dimension
        .checked_mul(std::mem::size_of::<f32>())
        .ok_or_else(|| StoreError::InvalidDbValue("embedding blob length overflow".into()))?;
    if blob.len() != expected_len {
        return Err(StoreError::InvalidDbValue(format!(
            "invalid embedding byte length: expected {expected_len}, got {}",
            blob.len()
        )));
    }

    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
