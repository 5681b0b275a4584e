//! SQL migration definitions for the doctrans database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: sessions, chunks, templates",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Translation sessions
CREATE TABLE IF NOT EXISTS sessions (
    id                 TEXT PRIMARY KEY,
    title              TEXT NOT NULL,
    memo               TEXT,
    custom_dict        TEXT,
    original_file_name TEXT,
    source_text        TEXT,
    translated_text    TEXT,
    status             TEXT NOT NULL DEFAULT 'draft',
    total_chunks       INTEGER NOT NULL DEFAULT 0,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);

-- Ordered chunks of a session's source text
CREATE TABLE IF NOT EXISTS chunks (
    id                 TEXT PRIMARY KEY,
    session_id         TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    chunk_order        INTEGER NOT NULL,
    source_text        TEXT NOT NULL,
    translated_text    TEXT,
    status             TEXT NOT NULL DEFAULT 'pending',
    error_message      TEXT,
    retry_count        INTEGER NOT NULL DEFAULT 0,
    token_count        INTEGER,
    processing_time_ms INTEGER,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL,
    UNIQUE(session_id, chunk_order)
);

CREATE INDEX IF NOT EXISTS idx_chunks_session_id ON chunks(session_id);
CREATE INDEX IF NOT EXISTS idx_chunks_status ON chunks(session_id, status);

-- Prompt templates
CREATE TABLE IF NOT EXISTS templates (
    id              TEXT PRIMARY KEY,
    title           TEXT NOT NULL,
    source_language TEXT NOT NULL,
    target_language TEXT NOT NULL,
    description     TEXT,
    content         TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
