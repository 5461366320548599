//! Database schema definitions
//!
//! This module contains the SQL schema for the archive state database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Subjects being archived and their enabled resource kinds (bitmask)
CREATE TABLE IF NOT EXISTS subjects (
    subject_id INTEGER PRIMARY KEY,
    flags INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- One resumption point per (subject, resource kind)
CREATE TABLE IF NOT EXISTS watermarks (
    subject_id INTEGER NOT NULL,
    resource TEXT NOT NULL,
    shape TEXT NOT NULL,
    first_value INTEGER NOT NULL,
    second_value INTEGER NOT NULL,
    third_value INTEGER,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (subject_id, resource)
);

-- Id-only edges for followers, friends and favorites
CREATE TABLE IF NOT EXISTS adjacency (
    subject_id INTEGER NOT NULL,
    resource TEXT NOT NULL,
    target_id INTEGER NOT NULL,
    first_seen_at TEXT NOT NULL,
    PRIMARY KEY (subject_id, resource, target_id)
);

CREATE INDEX IF NOT EXISTS idx_adjacency_resource ON adjacency(resource);

-- Adjacency targets committed with a watermark but not yet recorded
CREATE TABLE IF NOT EXISTS pending_adjacency (
    subject_id INTEGER NOT NULL,
    resource TEXT NOT NULL,
    target_id INTEGER NOT NULL,
    PRIMARY KEY (subject_id, resource, target_id)
);

-- Outcome of every crawl step
CREATE TABLE IF NOT EXISTS crawl_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    subject_id INTEGER NOT NULL,
    resource TEXT NOT NULL,
    status TEXT NOT NULL,
    item_count INTEGER NOT NULL DEFAULT 0,
    request TEXT NOT NULL,
    error_message TEXT,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_crawl_log_subject ON crawl_log(subject_id, resource);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
