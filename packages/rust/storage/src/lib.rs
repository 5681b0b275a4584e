//! Turso Embedded / libSQL storage layer.
//!
//! The [`Storage`] struct wraps a libSQL database holding translation
//! sessions, their ordered chunks, and prompt templates.
//!
//! **Write rules:**
//! - Every write is a single-row statement scoped by id, except
//!   [`Storage::replace_chunks`] and [`Storage::delete_session`], which run
//!   inside one transaction each.
//! - Statements are serialized on one connection. A transaction holds the
//!   connection until it commits or rolls back.
//! - Handles opened with [`Storage::open_readonly`] reject all writes.

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use doctrans_shared::{
    Chunk, ChunkStatus, DocTransError, Result, Session, SessionStatus, Template,
};
use libsql::{Connection, Database, params};
use tokio::sync::{Mutex, MutexGuard};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    /// Statements and transactions run one at a time under this lock.
    conn: Mutex<Connection>,
    readonly: bool,
}

/// Editable session fields. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub title: Option<String>,
    pub memo: Option<String>,
    pub custom_dict: Option<String>,
    pub original_file_name: Option<String>,
}

impl SessionPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.memo.is_none()
            && self.custom_dict.is_none()
            && self.original_file_name.is_none()
    }
}

const SESSION_COLUMNS: &str = "id, title, memo, custom_dict, original_file_name, source_text, \
     translated_text, status, total_chunks, created_at, updated_at";

const CHUNK_COLUMNS: &str = "id, session_id, chunk_order, source_text, translated_text, status, \
     error_message, retry_count, token_count, processing_time_ms, created_at, updated_at";

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DocTransError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn: Mutex::new(conn),
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` for inspection only.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DocTransError::Storage(format!(
                "database not found at {} (run a write command first)",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn: Mutex::new(conn),
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn()
                    .await
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        DocTransError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let conn = self.conn().await;
        let result = conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    async fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(DocTransError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Session operations
    // -----------------------------------------------------------------------

    /// Insert a new session record.
    pub async fn insert_session(&self, session: &Session) -> Result<()> {
        self.check_writable()?;
        self.conn()
            .await
            .execute(
                "INSERT INTO sessions (id, title, memo, custom_dict, original_file_name,
                     source_text, translated_text, status, total_chunks, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    session.id.as_str(),
                    session.title.as_str(),
                    session.memo.as_deref(),
                    session.custom_dict.as_deref(),
                    session.original_file_name.as_deref(),
                    session.source_text.as_deref(),
                    session.translated_text.as_deref(),
                    session.status.as_str(),
                    i64::from(session.total_chunks),
                    session.created_at.to_rfc3339(),
                    session.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Get a session by ID.
    pub async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_session(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// List all sessions, most recently updated first.
    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions ORDER BY updated_at DESC, id"),
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_session(&row)?);
        }
        Ok(results)
    }

    /// Read only the durable status of a session.
    ///
    /// The translation loop calls this at every checkpoint, so it never
    /// touches the (potentially large) text columns.
    pub async fn get_session_status(&self, id: &str) -> Result<Option<SessionStatus>> {
        let conn = self.conn().await;
        let mut rows = conn
            .query("SELECT status FROM sessions WHERE id = ?1", params![id])
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => {
                let status: String = row.get(0).map_err(db_err)?;
                Ok(Some(status.parse()?))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Set a session's status.
    pub async fn update_session_status(&self, id: &str, status: SessionStatus) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .await
            .execute(
                "UPDATE sessions SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now.as_str(), id],
            )
            .await
            .map_err(db_err)?;
        require_row(affected, "session", id)
    }

    /// Store (or clear) the assembled translation of a session.
    pub async fn set_translated_text(&self, id: &str, text: Option<&str>) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .await
            .execute(
                "UPDATE sessions SET translated_text = ?1, updated_at = ?2 WHERE id = ?3",
                params![text, now.as_str(), id],
            )
            .await
            .map_err(db_err)?;
        require_row(affected, "session", id)
    }

    /// Apply the non-empty fields of `patch` to a session.
    pub async fn update_session_details(&self, id: &str, patch: &SessionPatch) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .await
            .execute(
                "UPDATE sessions SET
                   title = COALESCE(?1, title),
                   memo = COALESCE(?2, memo),
                   custom_dict = COALESCE(?3, custom_dict),
                   original_file_name = COALESCE(?4, original_file_name),
                   updated_at = ?5
                 WHERE id = ?6",
                params![
                    patch.title.as_deref(),
                    patch.memo.as_deref(),
                    patch.custom_dict.as_deref(),
                    patch.original_file_name.as_deref(),
                    now.as_str(),
                    id,
                ],
            )
            .await
            .map_err(db_err)?;
        require_row(affected, "session", id)
    }

    /// Delete a session and all of its chunks. Returns `false` if it did not exist.
    pub async fn delete_session(&self, id: &str) -> Result<bool> {
        self.check_writable()?;
        let conn = self.conn().await;
        let tx = conn.transaction().await.map_err(db_err)?;

        let result = async {
            tx.execute("DELETE FROM chunks WHERE session_id = ?1", params![id])
                .await
                .map_err(db_err)?;
            tx.execute("DELETE FROM sessions WHERE id = ?1", params![id])
                .await
                .map_err(db_err)
        }
        .await;

        match result {
            Ok(affected) => {
                tx.commit().await.map_err(db_err)?;
                Ok(affected > 0)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Chunk operations
    // -----------------------------------------------------------------------

    /// Atomically replace every chunk of a session.
    ///
    /// Deletes existing chunks, inserts `chunks`, and moves the session to
    /// `ready` with the new source text and chunk count. The translated text
    /// is cleared. Either all of it happens or none of it does.
    pub async fn replace_chunks(
        &self,
        session_id: &str,
        source_text: &str,
        chunks: &[Chunk],
    ) -> Result<()> {
        self.check_writable()?;
        let conn = self.conn().await;
        let tx = conn.transaction().await.map_err(db_err)?;

        let result = async {
            tx.execute(
                "DELETE FROM chunks WHERE session_id = ?1",
                params![session_id],
            )
            .await
            .map_err(db_err)?;

            for chunk in chunks {
                insert_chunk(&tx, chunk).await?;
            }

            let now = Utc::now().to_rfc3339();
            let affected = tx
                .execute(
                    "UPDATE sessions SET
                       source_text = ?1,
                       translated_text = NULL,
                       total_chunks = ?2,
                       status = ?3,
                       updated_at = ?4
                     WHERE id = ?5",
                    params![
                        source_text,
                        chunks.len() as i64,
                        SessionStatus::Ready.as_str(),
                        now.as_str(),
                        session_id,
                    ],
                )
                .await
                .map_err(db_err)?;
            require_row(affected, "session", session_id)
        }
        .await;

        match result {
            Ok(()) => {
                tx.commit().await.map_err(db_err)?;
                tracing::debug!(session_id, chunks = chunks.len(), "replaced chunks");
                Ok(())
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    /// List all chunks of a session in ascending order.
    pub async fn list_chunks(&self, session_id: &str) -> Result<Vec<Chunk>> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {CHUNK_COLUMNS} FROM chunks WHERE session_id = ?1 ORDER BY chunk_order"
                ),
                params![session_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_chunk(&row)?);
        }
        Ok(results)
    }

    /// Get a chunk by ID.
    pub async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                &format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_chunk(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Claim a chunk for translation. `from` is the status the caller last saw.
    pub async fn mark_chunk_processing(&self, id: &str, from: ChunkStatus) -> Result<()> {
        self.transition_chunk(id, from, ChunkStatus::Processing).await
    }

    /// Return a chunk to the pending queue, clearing its last error.
    pub async fn reset_chunk_pending(&self, id: &str, from: ChunkStatus) -> Result<()> {
        self.transition_chunk(id, from, ChunkStatus::Pending).await
    }

    /// Move a chunk from `from` to `to`.
    ///
    /// Fails with `Validation` when [`ChunkStatus::can_transition_to`] rejects
    /// the move or the chunk is no longer in `from`.
    async fn transition_chunk(&self, id: &str, from: ChunkStatus, to: ChunkStatus) -> Result<()> {
        if !from.can_transition_to(to) {
            return Err(DocTransError::validation(format!(
                "chunk {id} cannot move from {from} to {to}"
            )));
        }
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let conn = self.conn().await;
        let affected = conn
            .execute(
                "UPDATE chunks SET status = ?1, error_message = NULL, updated_at = ?2
                 WHERE id = ?3 AND status = ?4",
                params![to.as_str(), now.as_str(), id, from.as_str()],
            )
            .await
            .map_err(db_err)?;
        if affected > 0 {
            return Ok(());
        }

        let mut rows = conn
            .query("SELECT status FROM chunks WHERE id = ?1", params![id])
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => {
                let current: String = row.get(0).map_err(db_err)?;
                Err(DocTransError::validation(format!(
                    "chunk {id} is {current}, not {from}"
                )))
            }
            None => Err(DocTransError::not_found("chunk", id)),
        }
    }

    /// Record a successful translation.
    pub async fn complete_chunk(
        &self,
        id: &str,
        translated_text: &str,
        token_count: Option<u64>,
        processing_time_ms: u64,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .await
            .execute(
                "UPDATE chunks SET
                   status = ?1,
                   translated_text = ?2,
                   error_message = NULL,
                   token_count = ?3,
                   processing_time_ms = ?4,
                   updated_at = ?5
                 WHERE id = ?6",
                params![
                    ChunkStatus::Completed.as_str(),
                    translated_text,
                    token_count.map(|t| t as i64),
                    processing_time_ms as i64,
                    now.as_str(),
                    id,
                ],
            )
            .await
            .map_err(db_err)?;
        require_row(affected, "chunk", id)
    }

    /// Record a failed attempt and bump the retry counter.
    pub async fn fail_chunk(
        &self,
        id: &str,
        error_message: &str,
        processing_time_ms: u64,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .await
            .execute(
                "UPDATE chunks SET
                   status = ?1,
                   error_message = ?2,
                   retry_count = retry_count + 1,
                   processing_time_ms = ?3,
                   updated_at = ?4
                 WHERE id = ?5",
                params![
                    ChunkStatus::Failed.as_str(),
                    error_message,
                    processing_time_ms as i64,
                    now.as_str(),
                    id,
                ],
            )
            .await
            .map_err(db_err)?;
        require_row(affected, "chunk", id)
    }

    /// Release claims left in `processing` for a session. Returns how many
    /// chunks were reset.
    pub async fn reset_processing_chunks(&self, session_id: &str) -> Result<u64> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn()
            .await
            .execute(
                "UPDATE chunks SET status = ?1, updated_at = ?2
                 WHERE session_id = ?3 AND status = ?4",
                params![
                    ChunkStatus::Pending.as_str(),
                    now.as_str(),
                    session_id,
                    ChunkStatus::Processing.as_str(),
                ],
            )
            .await
            .map_err(db_err)
    }

    // -----------------------------------------------------------------------
    // Template operations
    // -----------------------------------------------------------------------

    /// Insert a template, or overwrite the one with the same ID.
    pub async fn save_template(&self, template: &Template) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn()
            .await
            .execute(
                "INSERT INTO templates (id, title, source_language, target_language, description, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                   title = excluded.title,
                   source_language = excluded.source_language,
                   target_language = excluded.target_language,
                   description = excluded.description,
                   content = excluded.content",
                params![
                    template.id.as_str(),
                    template.title.as_str(),
                    template.source_language.as_str(),
                    template.target_language.as_str(),
                    template.description.as_deref(),
                    template.content.as_str(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Get a template by ID.
    pub async fn get_template(&self, id: &str) -> Result<Option<Template>> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                "SELECT id, title, source_language, target_language, description, content
                 FROM templates WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_template(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// List all templates by title.
    pub async fn list_templates(&self) -> Result<Vec<Template>> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                "SELECT id, title, source_language, target_language, description, content
                 FROM templates ORDER BY title, id",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_template(&row)?);
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn db_err(e: libsql::Error) -> DocTransError {
    DocTransError::Storage(e.to_string())
}

fn require_row(affected: u64, kind: &'static str, id: &str) -> Result<()> {
    if affected == 0 {
        return Err(DocTransError::not_found(kind, id));
    }
    Ok(())
}

async fn insert_chunk(conn: &Connection, chunk: &Chunk) -> Result<()> {
    conn.execute(
        "INSERT INTO chunks (id, session_id, chunk_order, source_text, translated_text, status,
             error_message, retry_count, token_count, processing_time_ms, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            chunk.id.as_str(),
            chunk.session_id.as_str(),
            i64::from(chunk.order),
            chunk.source_text.as_str(),
            chunk.translated_text.as_deref(),
            chunk.status.as_str(),
            chunk.error_message.as_deref(),
            i64::from(chunk.retry_count),
            chunk.token_count.map(|t| t as i64),
            chunk.processing_time.map(|t| t as i64),
            chunk.created_at.to_rfc3339(),
            chunk.updated_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

fn parse_timestamp(row: &libsql::Row, idx: i32) -> Result<DateTime<Utc>> {
    let s: String = row.get(idx).map_err(db_err)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DocTransError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to a [`Session`].
fn row_to_session(row: &libsql::Row) -> Result<Session> {
    let status: String = row.get(7).map_err(db_err)?;
    Ok(Session {
        id: row.get::<String>(0).map_err(db_err)?,
        title: row.get::<String>(1).map_err(db_err)?,
        memo: row.get::<String>(2).ok(),
        custom_dict: row.get::<String>(3).ok(),
        original_file_name: row.get::<String>(4).ok(),
        source_text: row.get::<String>(5).ok(),
        translated_text: row.get::<String>(6).ok(),
        status: status.parse()?,
        total_chunks: row.get::<u32>(8).map_err(db_err)?,
        created_at: parse_timestamp(row, 9)?,
        updated_at: parse_timestamp(row, 10)?,
    })
}

/// Convert a database row to a [`Chunk`].
fn row_to_chunk(row: &libsql::Row) -> Result<Chunk> {
    let status: String = row.get(5).map_err(db_err)?;
    Ok(Chunk {
        id: row.get::<String>(0).map_err(db_err)?,
        session_id: row.get::<String>(1).map_err(db_err)?,
        order: row.get::<u32>(2).map_err(db_err)?,
        source_text: row.get::<String>(3).map_err(db_err)?,
        translated_text: row.get::<String>(4).ok(),
        status: status.parse()?,
        error_message: row.get::<String>(6).ok(),
        retry_count: row.get::<u32>(7).map_err(db_err)?,
        token_count: row.get::<i64>(8).ok().map(|v| v as u64),
        processing_time: row.get::<i64>(9).ok().map(|v| v as u64),
        created_at: parse_timestamp(row, 10)?,
        updated_at: parse_timestamp(row, 11)?,
    })
}

/// Convert a database row to a [`Template`].
fn row_to_template(row: &libsql::Row) -> Result<Template> {
    Ok(Template {
        id: row.get::<String>(0).map_err(db_err)?,
        title: row.get::<String>(1).map_err(db_err)?,
        source_language: row.get::<String>(2).map_err(db_err)?,
        target_language: row.get::<String>(3).map_err(db_err)?,
        description: row.get::<String>(4).ok(),
        content: row.get::<String>(5).map_err(db_err)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use doctrans_shared::new_id;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("dt_test_{}.db", new_id()));
        Storage::open(&tmp).await.expect("open test db")
    }

    async fn session_with_chunks(storage: &Storage, texts: &[&str]) -> (Session, Vec<Chunk>) {
        let session = Session::new("Manual");
        storage.insert_session(&session).await.unwrap();
        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Chunk::new(&session.id, i as u32, *t))
            .collect();
        storage
            .replace_chunks(&session.id, &texts.join("\n\n"), &chunks)
            .await
            .unwrap();
        (session, chunks)
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("dt_test_{}.db", new_id()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn session_crud() {
        let storage = test_storage().await;
        let mut session = Session::new("Novel");
        session.memo = Some("formal tone".into());
        storage.insert_session(&session).await.expect("insert session");

        let found = storage.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(found.title, "Novel");
        assert_eq!(found.memo.as_deref(), Some("formal tone"));
        assert_eq!(found.status, SessionStatus::Draft);
        assert!(found.custom_dict.is_none());

        storage
            .update_session_details(
                &session.id,
                &SessionPatch {
                    custom_dict: Some("cat=chat".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let found = storage.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(found.title, "Novel");
        assert_eq!(found.custom_dict.as_deref(), Some("cat=chat"));

        storage
            .update_session_status(&session.id, SessionStatus::Paused)
            .await
            .unwrap();
        assert_eq!(
            storage.get_session_status(&session.id).await.unwrap(),
            Some(SessionStatus::Paused)
        );

        assert_eq!(storage.list_sessions().await.unwrap().len(), 1);
        assert!(storage.get_session("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn updates_on_missing_rows_are_not_found() {
        let storage = test_storage().await;
        let err = storage
            .update_session_status("nope", SessionStatus::Ready)
            .await
            .unwrap_err();
        assert!(matches!(err, DocTransError::NotFound { kind: "session", .. }));

        let err = storage
            .mark_chunk_processing("nope", ChunkStatus::Pending)
            .await.unwrap_err();
        assert!(matches!(err, DocTransError::NotFound { kind: "chunk", .. }));
    }

    #[tokio::test]
    async fn replace_chunks_resets_session() {
        let storage = test_storage().await;
        let (session, first) = session_with_chunks(&storage, &["a", "b", "c"]).await;

        storage
            .set_translated_text(&session.id, Some("old"))
            .await
            .unwrap();

        let second = vec![Chunk::new(&session.id, 0, "only")];
        storage
            .replace_chunks(&session.id, "only", &second)
            .await
            .unwrap();

        let chunks = storage.list_chunks(&session.id).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source_text, "only");
        assert!(storage.get_chunk(&first[0].id).await.unwrap().is_none());

        let session = storage.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Ready);
        assert_eq!(session.total_chunks, 1);
        assert_eq!(session.source_text.as_deref(), Some("only"));
        assert!(session.translated_text.is_none());
    }

    #[tokio::test]
    async fn replace_chunks_is_all_or_nothing() {
        let storage = test_storage().await;
        let (session, _) = session_with_chunks(&storage, &["a", "b"]).await;

        // Duplicate order violates UNIQUE(session_id, chunk_order).
        let broken = vec![
            Chunk::new(&session.id, 0, "x"),
            Chunk::new(&session.id, 0, "y"),
        ];
        assert!(
            storage
                .replace_chunks(&session.id, "x\n\ny", &broken)
                .await
                .is_err()
        );

        let chunks = storage.list_chunks(&session.id).await.unwrap();
        let texts: Vec<_> = chunks.iter().map(|c| c.source_text.as_str()).collect();
        assert_eq!(texts, ["a", "b"]);
        let session = storage.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(session.total_chunks, 2);
    }

    #[tokio::test]
    async fn chunk_lifecycle() {
        let storage = test_storage().await;
        let (_, chunks) = session_with_chunks(&storage, &["one", "two"]).await;
        let id = &chunks[0].id;

        storage.mark_chunk_processing(id, ChunkStatus::Pending).await.unwrap();
        storage.fail_chunk(id, "rate limited", 12).await.unwrap();
        let chunk = storage.get_chunk(id).await.unwrap().unwrap();
        assert_eq!(chunk.status, ChunkStatus::Failed);
        assert_eq!(chunk.error_message.as_deref(), Some("rate limited"));
        assert_eq!(chunk.retry_count, 1);

        storage.reset_chunk_pending(id, ChunkStatus::Failed).await.unwrap();
        storage.mark_chunk_processing(id, ChunkStatus::Pending).await.unwrap();
        storage.complete_chunk(id, "un", Some(7), 40).await.unwrap();
        let chunk = storage.get_chunk(id).await.unwrap().unwrap();
        assert_eq!(chunk.status, ChunkStatus::Completed);
        assert_eq!(chunk.translated_text.as_deref(), Some("un"));
        assert!(chunk.error_message.is_none());
        assert_eq!(chunk.token_count, Some(7));
        assert_eq!(chunk.processing_time, Some(40));
        assert_eq!(chunk.retry_count, 1);
    }

    #[tokio::test]
    async fn chunk_transitions_follow_the_state_machine() {
        let storage = test_storage().await;
        let (_, chunks) = session_with_chunks(&storage, &["one"]).await;
        let id = &chunks[0].id;

        storage.mark_chunk_processing(id, ChunkStatus::Pending).await.unwrap();

        // A second claim sees a stale status.
        let err = storage
            .mark_chunk_processing(id, ChunkStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, DocTransError::Validation { .. }), "{err}");
        assert!(err.to_string().contains("is processing"));

        // Not a legal move at all, whatever the row holds.
        let err = storage
            .mark_chunk_processing(id, ChunkStatus::Processing)
            .await
            .unwrap_err();
        assert!(matches!(err, DocTransError::Validation { .. }));
        let err = storage
            .reset_chunk_pending(id, ChunkStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, DocTransError::Validation { .. }));

        storage.complete_chunk(id, "un", None, 1).await.unwrap();
        storage.mark_chunk_processing(id, ChunkStatus::Completed).await.unwrap();
        let chunk = storage.get_chunk(id).await.unwrap().unwrap();
        assert_eq!(chunk.status, ChunkStatus::Processing);
        assert_eq!(chunk.translated_text.as_deref(), Some("un"));
    }

    #[tokio::test]
    async fn reset_processing_releases_stale_claims() {
        let storage = test_storage().await;
        let (session, chunks) = session_with_chunks(&storage, &["a", "b", "c"]).await;
        for chunk in [&chunks[0], &chunks[2]] {
            storage
                .mark_chunk_processing(&chunk.id, ChunkStatus::Pending)
                .await
                .unwrap();
        }

        assert_eq!(storage.reset_processing_chunks(&session.id).await.unwrap(), 2);
        let statuses: Vec<_> = storage
            .list_chunks(&session.id)
            .await
            .unwrap()
            .iter()
            .map(|c| c.status)
            .collect();
        assert_eq!(statuses, [ChunkStatus::Pending; 3]);
    }

    #[tokio::test]
    async fn delete_session_removes_chunks() {
        let storage = test_storage().await;
        let (session, chunks) = session_with_chunks(&storage, &["a", "b"]).await;

        assert!(storage.delete_session(&session.id).await.unwrap());
        assert!(storage.get_session(&session.id).await.unwrap().is_none());
        assert!(storage.get_chunk(&chunks[1].id).await.unwrap().is_none());
        assert!(!storage.delete_session(&session.id).await.unwrap());
    }

    #[tokio::test]
    async fn template_save_and_query() {
        let storage = test_storage().await;
        let mut template = Template {
            id: "default".into(),
            title: "Default".into(),
            source_language: "en".into(),
            target_language: "fr".into(),
            description: None,
            content: "<|im_start|>USER\n{{current.sourceText}}\n<|im_end|>".into(),
        };
        storage.save_template(&template).await.unwrap();

        template.description = Some("updated".into());
        storage.save_template(&template).await.unwrap();

        let found = storage.get_template("default").await.unwrap().unwrap();
        assert_eq!(found, template);
        assert_eq!(storage.list_templates().await.unwrap().len(), 1);
        assert!(storage.get_template("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("dt_test_{}.db", new_id()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.insert_session(&Session::new("first")).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.list_sessions().await.unwrap().len(), 1);
        let result = ro.insert_session(&Session::new("second")).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn readonly_requires_existing_file() {
        let tmp = std::env::temp_dir().join(format!("dt_missing_{}.db", new_id()));
        assert!(Storage::open_readonly(&tmp).await.is_err());
    }
}
