//! Reader for PostgreSQL-backed source schemas.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use crate::config::{ConnectionProfile, FieldMapping, TableMapping};
use crate::errors::{classify_source_error, SyncError};
use crate::sources::{issues_join_sql, IdentQuote, RawIssue, SourceCounts, SourceReader};

const BACKEND: &str = "postgres";

pub struct PostgresReader {
    pool: PgPool,
    tables: TableMapping,
    fields: FieldMapping,
}

impl PostgresReader {
    pub async fn open(url: &str, profile: &ConnectionProfile) -> Result<Self, SyncError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(profile.connect_timeout_secs))
            .connect(url)
            .await
            .map_err(|e| SyncError::connection(BACKEND, e))?;
        Ok(Self {
            pool,
            tables: profile.tables.clone(),
            fields: profile.fields.clone(),
        })
    }
}

fn text_ish(row: &PgRow, col: &str) -> Option<String> {
    if let Ok(v) = row.try_get::<Option<String>, _>(col) {
        return v;
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(col) {
        return v.map(|n| n.to_string());
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(col) {
        return v.map(|n| n.to_string());
    }
    row.try_get::<Option<f64>, _>(col)
        .ok()
        .flatten()
        .map(|n| n.to_string())
}

fn text(row: &PgRow, col: &str) -> String {
    text_ish(row, col).unwrap_or_default()
}

fn float(row: &PgRow, col: &str) -> f64 {
    if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(col) {
        return v;
    }
    if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(col) {
        return v as f64;
    }
    text_ish(row, col)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0)
}

fn integer(row: &PgRow, col: &str) -> i64 {
    if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(col) {
        return v;
    }
    if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(col) {
        return v as i64;
    }
    text_ish(row, col)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

fn decode_issue(row: &PgRow) -> RawIssue {
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
impl SourceReader for PostgresReader {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn fetch_issues(&self) -> Result<Vec<RawIssue>, SyncError> {
        let sql = issues_join_sql(&self.tables, &self.fields, IdentQuote::Double);
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| classify_source_error(BACKEND, e))?;
        Ok(rows.iter().map(decode_issue).collect())
    }

    async fn update_status(&self, source_id: &str, status: &str) -> Result<(), SyncError> {
        let sql = format!(
            "UPDATE \"{}\" SET \"{}\" = $1 WHERE \"{}\" = $2",
            self.tables.issues, self.fields.status, self.fields.issue_id,
        );
        let result = sqlx::query(&sql)
            .bind(status)
            .bind(source_id)
            .execute(&self.pool)
            .await
            .map_err(|e| classify_source_error(BACKEND, e))?;
        if result.rows_affected() == 0 {
            return Err(SyncError::NotFound(format!(
                "source issue {source_id} not found"
            )));
        }
        Ok(())
    }

    async fn probe(&self) -> Result<SourceCounts, SyncError> {
        let issues = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM \"{}\"",
            self.tables.issues
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify_source_error(BACKEND, e))?;

        let projects = match sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM \"{}\"",
            self.tables.projects
        ))
        .fetch_one(&self.pool)
        .await
        {
            Ok(n) => n,
            Err(err) => match classify_source_error(BACKEND, err) {
                SyncError::Schema { .. } => 0,
                other => return Err(other),
            },
        };

        Ok(SourceCounts { issues, projects })
    }
}
