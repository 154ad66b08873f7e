//! Mirror store connection pool and schema bootstrap.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::errors::SyncError;

/// Open the SQLite mirror store, creating the file if missing.
///
/// In-memory URLs are pinned to a single connection so every handle sees the
/// same database.
pub async fn connect_mirror(url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let mut pool_options = SqlitePoolOptions::new().max_connections(5);
    if url.contains(":memory:") {
        pool_options = pool_options
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }
    pool_options.connect_with(options).await
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS findings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id TEXT NOT NULL,
        name TEXT NOT NULL DEFAULT '',
        description TEXT NOT NULL DEFAULT '',
        url_path TEXT NOT NULL DEFAULT '',
        cvss REAL NOT NULL DEFAULT 0,
        cwe INTEGER NOT NULL DEFAULT 0,
        cve TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT '',
        project_id TEXT NOT NULL DEFAULT '',
        project_name TEXT NOT NULL DEFAULT '',
        project_description TEXT NOT NULL DEFAULT '',
        issue_type TEXT NOT NULL DEFAULT '',
        fix_description TEXT NOT NULL DEFAULT '',
        param TEXT NOT NULL DEFAULT '',
        technical TEXT NOT NULL DEFAULT '',
        risks TEXT NOT NULL DEFAULT '',
        references_text TEXT NOT NULL DEFAULT '',
        project_start TEXT,
        project_end TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_findings_cvss ON findings (cvss)",
    "CREATE INDEX IF NOT EXISTS idx_findings_status ON findings (status)",
    "CREATE INDEX IF NOT EXISTS idx_findings_project_id ON findings (project_id)",
    "CREATE INDEX IF NOT EXISTS idx_findings_source_id ON findings (source_id)",
    r#"
    CREATE TABLE IF NOT EXISTS sync_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        time TEXT NOT NULL,
        count INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        message TEXT NOT NULL DEFAULT ''
    )
    "#,
];

/// Create the mirror schema. Idempotent; safe to call before every run.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), SyncError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
