//! Reader for SQLite file databases (local, or fetched by a transport).

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::config::{ConnectionProfile, FieldMapping, TableMapping};
use crate::errors::{classify_source_error, SyncError};
use crate::sources::{issues_join_sql, IdentQuote, RawIssue, SourceCounts, SourceReader};

#[derive(Debug)]
pub struct SqliteReader {
    pool: SqlitePool,
    tables: TableMapping,
    fields: FieldMapping,
    backend: &'static str,
}

impl SqliteReader {
    /// Open an existing database file. `backend` distinguishes the local
    /// and remote-file flavors in logs and errors.
    pub async fn open(
        path: &Path,
        profile: &ConnectionProfile,
        backend: &'static str,
    ) -> Result<Self, SyncError> {
        if !path.exists() {
            return Err(SyncError::connection(
                backend,
                format!("database file {} does not exist", path.display()),
            ));
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|e| SyncError::connection(backend, e))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| SyncError::connection(backend, e))?;
        Ok(Self {
            pool,
            tables: profile.tables.clone(),
            fields: profile.fields.clone(),
            backend,
        })
    }

    fn quoted(&self, ident: &str) -> String {
        format!("\"{ident}\"")
    }
}

/// Decode a dynamically typed SQLite value as text, tolerating numeric
/// storage (epoch timestamps are INTEGER in some source versions).
fn text_ish(row: &SqliteRow, col: &str) -> Option<String> {
    if let Ok(v) = row.try_get::<Option<String>, _>(col) {
        return v;
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(col) {
        return v.map(|n| n.to_string());
    }
    row.try_get::<Option<f64>, _>(col)
        .ok()
        .flatten()
        .map(|n| n.to_string())
}

fn text(row: &SqliteRow, col: &str) -> String {
    text_ish(row, col).unwrap_or_default()
}

fn float(row: &SqliteRow, col: &str) -> f64 {
    if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(col) {
        return v;
    }
    if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(col) {
        return v as f64;
    }
    text_ish(row, col)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0)
}

fn integer(row: &SqliteRow, col: &str) -> i64 {
    if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(col) {
        return v;
    }
    text_ish(row, col)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

fn decode_issue(row: &SqliteRow) -> RawIssue {
    RawIssue {
        source_id: text(row, "source_id"),
        name: text(row, "name"),
        description: text(row, "description"),
        url_path: text(row, "url_path"),
        cvss: float(row, "cvss"),
        cwe: integer(row, "cwe"),
        cve: text(row, "cve"),
        status: text(row, "status"),
        issue_type: text(row, "issue_type"),
        fix_description: text(row, "fix_description"),
        param: text(row, "param"),
        technical: text(row, "technical"),
        risks: text(row, "risks"),
        references_text: text(row, "references_text"),
        project_id: text(row, "project_id"),
        project_name: text(row, "project_name"),
        project_description: text(row, "project_description"),
        project_start: text_ish(row, "project_start"),
        project_end: text_ish(row, "project_end"),
    }
}

#[async_trait]
impl SourceReader for SqliteReader {
    fn backend(&self) -> &'static str {
        self.backend
    }

    async fn fetch_issues(&self) -> Result<Vec<RawIssue>, SyncError> {
        let sql = issues_join_sql(&self.tables, &self.fields, IdentQuote::Double);
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify_source_error(self.backend, e))?;
        Ok(rows.iter().map(decode_issue).collect())
    }

    async fn update_status(&self, source_id: &str, status: &str) -> Result<(), SyncError> {
        let sql = format!(
            "UPDATE {} SET {} = ? WHERE {} = ?",
            self.quoted(&self.tables.issues),
            self.quoted(&self.fields.status),
            self.quoted(&self.fields.issue_id),
        );
        let result = sqlx::query(&sql)
            .bind(status)
            .bind(source_id)
            .execute(&self.pool)
            .await
            .map_err(|e| classify_source_error(self.backend, e))?;
        if result.rows_affected() == 0 {
            return Err(SyncError::NotFound(format!(
                "source issue {source_id} not found"
            )));
        }
        Ok(())
    }

    async fn probe(&self) -> Result<SourceCounts, SyncError> {
        let issues_sql = format!(
            "SELECT COUNT(*) FROM {}",
            self.quoted(&self.tables.issues)
        );
        let issues = sqlx::query_scalar::<_, i64>(&issues_sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify_source_error(self.backend, e))?;

        // Some source schema versions ship without a projects table.
        let projects_sql = format!(
            "SELECT COUNT(*) FROM {}",
            self.quoted(&self.tables.projects)
        );
        let projects = match sqlx::query_scalar::<_, i64>(&projects_sql)
            .fetch_one(&self.pool)
            .await
        {
            Ok(n) => n,
            Err(err) => match classify_source_error(self.backend, err) {
                SyncError::Schema { .. } => 0,
                other => return Err(other),
            },
        };

        Ok(SourceCounts { issues, projects })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, ConnectionProfile};
    use tempfile::TempDir;

    async fn seed_source(dir: &TempDir, with_projects: bool) -> std::path::PathBuf {
        let path = dir.path().join("pcf.sqlite3");
        let pool = crate::db::connect_mirror(&format!("sqlite://{}?mode=rwc", path.display()))
            .await
            .unwrap();
        sqlx::query(
            r#"CREATE TABLE issues (
                id TEXT PRIMARY KEY, name TEXT, description TEXT, url_path TEXT,
                cvss REAL, cwe INTEGER, cve TEXT, status TEXT, "type" TEXT,
                fix TEXT, param TEXT, technical TEXT, risks TEXT,
                "references" TEXT, project_id TEXT
            )"#,
        )
        .execute(&pool)
        .await
        .unwrap();
        if with_projects {
            sqlx::query(
                "CREATE TABLE projects (id TEXT PRIMARY KEY, name TEXT, description TEXT, start_date INTEGER, end_date INTEGER)",
            )
            .execute(&pool)
            .await
            .unwrap();
            sqlx::query(
                "INSERT INTO projects VALUES ('p1', 'Webshop', 'External pentest', 1700000000, 1700600000)",
            )
            .execute(&pool)
            .await
            .unwrap();
        }
        sqlx::query(
            r#"INSERT INTO issues VALUES
               ('i1', 'SQLi', 'Blind SQL injection', '/login', 9.1, 89, 'CVE-2024-0001', 'Open', 'web', 'Use prepared statements', 'user', 'tech', 'high', 'OWASP', 'p1'),
               ('i2', 'Open redirect', 'Redirect via next param', '/next', 4.3, 601, '', 'Open', 'web', 'Whitelist targets', 'next', '', '', '', 'missing-project')"#,
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;
        path
    }

    fn profile_for(path: &std::path::Path) -> ConnectionProfile {
        ConnectionProfile::new(BackendConfig::LocalFile {
            path: path.to_path_buf(),
        })
    }

    #[tokio::test]
    async fn open_fails_for_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.sqlite3");
        let profile = profile_for(&path);
        let err = SqliteReader::open(&path, &profile, "local_file")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Connection { .. }));
    }

    #[tokio::test]
    async fn fetch_orders_by_cvss_and_joins_projects() {
        let dir = TempDir::new().unwrap();
        let path = seed_source(&dir, true).await;
        let profile = profile_for(&path);
        let reader = SqliteReader::open(&path, &profile, "local_file").await.unwrap();

        let issues = reader.fetch_issues().await.unwrap();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].source_id, "i1");
        assert_eq!(issues[0].cvss, 9.1);
        assert_eq!(issues[0].project_name, "Webshop");
        assert_eq!(issues[0].project_end.as_deref(), Some("1700600000"));

        // Left join: unmatched project yields empty project fields.
        assert_eq!(issues[1].source_id, "i2");
        assert_eq!(issues[1].project_name, "");
        assert!(issues[1].project_end.is_none());
    }

    #[tokio::test]
    async fn fetch_against_wrong_mapping_is_schema_error() {
        let dir = TempDir::new().unwrap();
        let path = seed_source(&dir, true).await;
        let mut profile = profile_for(&path);
        profile.fields.cvss = "cvss_v4".to_string();
        let reader = SqliteReader::open(&path, &profile, "local_file").await.unwrap();

        let err = reader.fetch_issues().await.unwrap_err();
        assert!(matches!(err, SyncError::Schema { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn update_status_writes_through() {
        let dir = TempDir::new().unwrap();
        let path = seed_source(&dir, true).await;
        let profile = profile_for(&path);
        let reader = SqliteReader::open(&path, &profile, "local_file").await.unwrap();

        reader.update_status("i1", "Closed").await.unwrap();
        let issues = reader.fetch_issues().await.unwrap();
        assert_eq!(issues[0].status, "Closed");

        let err = reader.update_status("ghost", "Closed").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn probe_tolerates_missing_projects_table() {
        let dir = TempDir::new().unwrap();
        let path = seed_source(&dir, false).await;
        let profile = profile_for(&path);
        let reader = SqliteReader::open(&path, &profile, "local_file").await.unwrap();

        let counts = reader.probe().await.unwrap();
        assert_eq!(counts.issues, 2);
        assert_eq!(counts.projects, 0);
    }
}
