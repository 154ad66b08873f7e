//! Append-only sync run log.
//!
//! The latest successful entry answers "when did we last sync" and gates
//! caller-side auto-sync.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::errors::SyncError;

/// Outcome of a sync run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// One audited sync run.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SyncRun {
    pub id: i64,
    pub time: DateTime<Utc>,
    pub count: i64,
    pub status: String,
    pub message: String,
}

/// Append a run record. Never skipped: both success and error runs land here.
pub async fn record_run(
    pool: &SqlitePool,
    count: i64,
    status: RunStatus,
    message: &str,
) -> Result<(), SyncError> {
    sqlx::query("INSERT INTO sync_runs (time, count, status, message) VALUES (?, ?, ?, ?)")
        .bind(Utc::now())
        .bind(count)
        .bind(status.as_str())
        .bind(message)
        .execute(pool)
        .await?;
    Ok(())
}

/// Timestamp of the most recent successful run, if any.
pub async fn last_successful_run(
    pool: &SqlitePool,
) -> Result<Option<DateTime<Utc>>, SyncError> {
    let time = sqlx::query_scalar::<_, DateTime<Utc>>(
        "SELECT time FROM sync_runs WHERE status = 'success' ORDER BY time DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(time)
}

/// Most recent runs, newest first.
pub async fn recent_runs(pool: &SqlitePool, limit: i64) -> Result<Vec<SyncRun>, SyncError> {
    let runs = sqlx::query_as::<_, SyncRun>(
        "SELECT id, time, count, status, message FROM sync_runs ORDER BY time DESC, id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(runs)
}

/// Staleness threshold for caller-driven auto-sync.
pub const AUTO_SYNC_STALENESS_SECS: i64 = 3600;

/// Whether a caller should trigger a sync: true when no successful run exists
/// or the last one is older than the staleness threshold. Advisory only; the
/// orchestrator itself never checks this.
pub async fn is_stale(pool: &SqlitePool) -> Result<bool, SyncError> {
    match last_successful_run(pool).await? {
        None => Ok(true),
        Some(t) => Ok(Utc::now() - t > Duration::seconds(AUTO_SYNC_STALENESS_SECS)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn mirror() -> SqlitePool {
        let pool = db::connect_mirror("sqlite::memory:").await.unwrap();
        db::ensure_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn run_log_appends_and_lists() {
        let pool = mirror().await;
        record_run(&pool, 12, RunStatus::Success, "Sync OK").await.unwrap();
        record_run(&pool, 0, RunStatus::Error, "CONNECTION_ERROR: refused")
            .await
            .unwrap();

        let runs = recent_runs(&pool, 10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].status, "error");
        assert_eq!(runs[0].count, 0);
        assert_eq!(runs[1].status, "success");
        assert_eq!(runs[1].count, 12);
    }

    #[tokio::test]
    async fn last_successful_run_ignores_errors() {
        let pool = mirror().await;
        assert!(last_successful_run(&pool).await.unwrap().is_none());

        record_run(&pool, 0, RunStatus::Error, "boom").await.unwrap();
        assert!(last_successful_run(&pool).await.unwrap().is_none());

        record_run(&pool, 5, RunStatus::Success, "Sync OK").await.unwrap();
        assert!(last_successful_run(&pool).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stale_without_any_success() {
        let pool = mirror().await;
        assert!(is_stale(&pool).await.unwrap());

        record_run(&pool, 3, RunStatus::Success, "Sync OK").await.unwrap();
        assert!(!is_stale(&pool).await.unwrap());
    }
}
