//! v001 -- Initial schema creation.
//!
//! A single namespaced key/value table.  Values are JSON documents; the
//! `updated_at` column is informational only.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key        TEXT PRIMARY KEY NOT NULL,   -- namespace key, e.g. "students"
    value      TEXT NOT NULL,               -- JSON document
    updated_at TEXT NOT NULL                -- ISO-8601 / RFC-3339
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
