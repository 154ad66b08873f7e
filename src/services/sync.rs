//! Sync orchestrator: pulls all records from the configured source,
//! normalizes them, and reloads the mirror in per-transaction batches.
//!
//! Every run, successful or not, lands in the run log. The mirror table is
//! fully replaced each cycle; cross-cycle identity is `source_id`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::config::ConnectionProfile;
use crate::db;
use crate::errors::SyncError;
use crate::models::finding::NewFinding;
use crate::models::sync_run::{record_run, RunStatus};
use crate::sources::{self, RawIssue};

/// Result of a successful sync run.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SyncOutcome {
    pub count: usize,
}

/// Interpret a source-side project timestamp: epoch seconds (integer or
/// numeric string), RFC 3339, or `YYYY-MM-DD[ HH:MM:SS]`.
pub fn parse_source_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(epoch) = raw.parse::<i64>() {
        return Utc.timestamp_opt(epoch, 0).single();
    }
    if let Ok(epoch) = raw.parse::<f64>() {
        return Utc.timestamp_opt(epoch as i64, 0).single();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
    }
    None
}

/// Normalize one raw record. `created_at` is the project end, falling back
/// to the project start, falling back to `now`: a finding counts as created
/// when its originating assessment concluded.
pub fn normalize(raw: &RawIssue, now: DateTime<Utc>) -> NewFinding {
    let project_start = raw.project_start.as_deref().and_then(parse_source_timestamp);
    let project_end = raw.project_end.as_deref().and_then(parse_source_timestamp);
    let created_at = project_end.or(project_start).unwrap_or(now);

    NewFinding {
        source_id: raw.source_id.clone(),
        name: raw.name.clone(),
        description: raw.description.clone(),
        url_path: raw.url_path.clone(),
        cvss: raw.cvss,
        cwe: raw.cwe,
        cve: raw.cve.clone(),
        status: raw.status.clone(),
        project_id: raw.project_id.clone(),
        project_name: raw.project_name.clone(),
        project_description: raw.project_description.clone(),
        issue_type: raw.issue_type.clone(),
        fix_description: raw.fix_description.clone(),
        param: raw.param.clone(),
        technical: raw.technical.clone(),
        risks: raw.risks.clone(),
        references_text: raw.references_text.clone(),
        project_start,
        project_end,
        created_at,
    }
}

async fn insert_finding(
    tx: &mut Transaction<'_, Sqlite>,
    finding: &NewFinding,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO findings (
            source_id, name, description, url_path, cvss, cwe, cve, status,
            project_id, project_name, project_description, issue_type,
            fix_description, param, technical, risks, references_text,
            project_start, project_end, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&finding.source_id)
    .bind(&finding.name)
    .bind(&finding.description)
    .bind(&finding.url_path)
    .bind(finding.cvss)
    .bind(finding.cwe)
    .bind(&finding.cve)
    .bind(&finding.status)
    .bind(&finding.project_id)
    .bind(&finding.project_name)
    .bind(&finding.project_description)
    .bind(&finding.issue_type)
    .bind(&finding.fix_description)
    .bind(&finding.param)
    .bind(&finding.technical)
    .bind(&finding.risks)
    .bind(&finding.references_text)
    .bind(finding.project_start)
    .bind(finding.project_end)
    .bind(finding.created_at)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Record an error run and hand the error back for propagation.
async fn fail_run(mirror: &SqlitePool, committed: i64, err: SyncError) -> SyncError {
    let message = format!("{}: {}", err.code(), err);
    tracing::error!(error = %err, committed, "Sync run failed");
    if let Err(log_err) = record_run(mirror, committed, RunStatus::Error, &message).await {
        tracing::error!(error = %log_err, "Failed to record error run");
    }
    err
}

/// Run one full sync cycle against the mirror.
///
/// Truncate-and-reload: batches already committed stay committed when a
/// later batch fails, so a mid-run failure leaves a partial mirror plus an
/// error run record. Concurrent invocations against one mirror must be
/// serialized by the caller.
pub async fn sync(
    mirror: &SqlitePool,
    profile: &ConnectionProfile,
) -> Result<SyncOutcome, SyncError> {
    profile.validate()?;
    db::ensure_schema(mirror).await?;

    let backend = profile.backend.kind();
    tracing::info!(backend, "Starting sync run");

    let reader = match sources::open_reader(profile).await {
        Ok(r) => r,
        Err(err) => return Err(fail_run(mirror, 0, err).await),
    };
    let raw = match reader.fetch_issues().await {
        Ok(r) => r,
        Err(err) => return Err(fail_run(mirror, 0, err).await),
    };

    let now = Utc::now();
    let findings: Vec<NewFinding> = raw.iter().map(|r| normalize(r, now)).collect();

    // Full replace. The truncate commits on its own; the reload that
    // follows is batched so one giant transaction never builds up.
    if let Err(err) = sqlx::query("DELETE FROM findings").execute(mirror).await {
        return Err(fail_run(mirror, 0, err.into()).await);
    }

    let mut committed: i64 = 0;
    for (index, batch) in findings.chunks(profile.sync.batch_size).enumerate() {
        let batch_no = index + 1;
        let result: Result<(), sqlx::Error> = async {
            let mut tx = mirror.begin().await?;
            for finding in batch {
                insert_finding(&mut tx, finding, now).await?;
            }
            tx.commit().await
        }
        .await;

        if let Err(err) = result {
            let err = SyncError::BatchWrite {
                batch: batch_no,
                message: err.to_string(),
            };
            return Err(fail_run(mirror, committed, err).await);
        }
        committed += batch.len() as i64;
        tracing::debug!(batch = batch_no, rows = batch.len(), "Committed batch");
    }

    record_run(mirror, committed, RunStatus::Success, "Sync OK").await?;
    tracing::info!(backend, count = committed, "Sync run complete");
    Ok(SyncOutcome {
        count: committed as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn timestamp_epoch_seconds() {
        let ts = parse_source_timestamp("1700600000").unwrap();
        assert_eq!(ts.timestamp(), 1700600000);
    }

    #[test]
    fn timestamp_numeric_string_with_fraction() {
        let ts = parse_source_timestamp("1700600000.5").unwrap();
        assert_eq!(ts.timestamp(), 1700600000);
    }

    #[test]
    fn timestamp_rfc3339() {
        let ts = parse_source_timestamp("2023-11-21T20:53:20Z").unwrap();
        assert_eq!(ts.timestamp(), 1700600000);
    }

    #[test]
    fn timestamp_sql_datetime_and_date() {
        assert!(parse_source_timestamp("2023-11-21 20:53:20").is_some());
        assert!(parse_source_timestamp("2023-11-21").is_some());
    }

    #[test]
    fn timestamp_garbage_is_none() {
        assert!(parse_source_timestamp("").is_none());
        assert!(parse_source_timestamp("yesterday").is_none());
    }

    #[test]
    fn created_at_prefers_project_end() {
        let now = Utc::now();
        let raw = RawIssue {
            project_start: Some("1700000000".to_string()),
            project_end: Some("1700600000".to_string()),
            ..RawIssue::default()
        };
        assert_eq!(normalize(&raw, now).created_at.timestamp(), 1700600000);
    }

    #[test]
    fn created_at_falls_back_to_project_start() {
        let now = Utc::now();
        let raw = RawIssue {
            project_start: Some("1700000000".to_string()),
            project_end: None,
            ..RawIssue::default()
        };
        assert_eq!(normalize(&raw, now).created_at.timestamp(), 1700000000);
    }

    #[test]
    fn created_at_falls_back_to_wall_clock() {
        let now = Utc::now();
        let raw = RawIssue::default();
        let normalized = normalize(&raw, now);
        assert!(normalized.created_at - now < Duration::seconds(1));
    }

    #[test]
    fn created_at_ignores_unparseable_end() {
        let now = Utc::now();
        let raw = RawIssue {
            project_start: Some("1700000000".to_string()),
            project_end: Some("n/a".to_string()),
            ..RawIssue::default()
        };
        assert_eq!(normalize(&raw, now).created_at.timestamp(), 1700000000);
    }
}
