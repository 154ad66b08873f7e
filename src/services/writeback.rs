//! Status write-back: mirror first, source best-effort.
//!
//! The mirror is the system of record for status, so a source-side failure
//! is logged but never turns the operation into an error. The closed status
//! vocabulary is enforced before anything is written.

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::ConnectionProfile;
use crate::errors::SyncError;
use crate::models::finding::WritebackStatus;
use crate::sources::{self, SourceReader};

/// Outcome of one status change.
#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub mirror_id: i64,
    pub source_id: String,
    pub name: String,
    pub status: String,
    /// Whether the source system accepted the update. `false` still counts
    /// as overall success.
    pub source_updated: bool,
}

/// Per-id entry in a bulk write-back result.
#[derive(Debug, Clone, Serialize)]
pub struct BulkItem {
    pub mirror_id: i64,
    pub success: bool,
    pub detail: String,
}

/// Aggregate result of a bulk write-back.
#[derive(Debug, Clone, Serialize)]
pub struct BulkOutcome {
    pub results: Vec<BulkItem>,
    pub success_count: usize,
    pub error_count: usize,
}

/// Change one finding's status.
///
/// Fails with `InvalidStatus` before any write for labels outside the
/// closed set, and `NotFound` when the mirror row is absent.
pub async fn set_status(
    mirror: &SqlitePool,
    profile: &ConnectionProfile,
    mirror_id: i64,
    status_label: &str,
) -> Result<StatusChange, SyncError> {
    let status: WritebackStatus = status_label.parse()?;

    let reader = open_source_quietly(profile).await;
    apply_status(mirror, reader.as_deref(), mirror_id, status).await
}

/// Apply one status change to a list of mirror ids. Every id is attempted
/// regardless of earlier failures; the aggregate counts mirror-side results.
pub async fn bulk_set_status(
    mirror: &SqlitePool,
    profile: &ConnectionProfile,
    mirror_ids: &[i64],
    status_label: &str,
) -> Result<BulkOutcome, SyncError> {
    let status: WritebackStatus = status_label.parse()?;

    let reader = open_source_quietly(profile).await;
    let mut results = Vec::with_capacity(mirror_ids.len());
    let mut success_count = 0;
    let mut error_count = 0;

    for &mirror_id in mirror_ids {
        match apply_status(mirror, reader.as_deref(), mirror_id, status).await {
            Ok(change) => {
                success_count += 1;
                results.push(BulkItem {
                    mirror_id,
                    success: true,
                    detail: format!("{} -> {}", change.name, change.status),
                });
            }
            Err(err) => {
                error_count += 1;
                results.push(BulkItem {
                    mirror_id,
                    success: false,
                    detail: err.to_string(),
                });
            }
        }
    }

    Ok(BulkOutcome {
        results,
        success_count,
        error_count,
    })
}

/// Open the source for write-back. Failure is logged and tolerated: status
/// changes must never be blocked by source unavailability.
async fn open_source_quietly(profile: &ConnectionProfile) -> Option<Box<dyn SourceReader>> {
    match sources::open_reader(profile).await {
        Ok(reader) => Some(reader),
        Err(err) => {
            tracing::warn!(
                backend = profile.backend.kind(),
                error = %err,
                "Source unavailable for write-back, updating mirror only"
            );
            None
        }
    }
}

async fn apply_status(
    mirror: &SqlitePool,
    reader: Option<&dyn SourceReader>,
    mirror_id: i64,
    status: WritebackStatus,
) -> Result<StatusChange, SyncError> {
    let row = sqlx::query_as::<_, (String, String)>(
        "SELECT source_id, name FROM findings WHERE id = ?",
    )
    .bind(mirror_id)
    .fetch_optional(mirror)
    .await?;
    let (source_id, name) =
        row.ok_or_else(|| SyncError::NotFound(format!("finding {mirror_id} not found")))?;

    sqlx::query("UPDATE findings SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(mirror_id)
        .execute(mirror)
        .await?;

    let source_updated = match reader {
        Some(reader) => match reader.update_status(&source_id, status.as_str()).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    backend = reader.backend(),
                    source_id,
                    error = %err,
                    "Source-side status update failed"
                );
                false
            }
        },
        None => false,
    };

    tracing::info!(mirror_id, source_id, status = status.as_str(), source_updated, "Status updated");
    Ok(StatusChange {
        mirror_id,
        source_id,
        name,
        status: status.as_str().to_string(),
        source_updated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, ConnectionProfile};
    use crate::db;
    use std::path::PathBuf;

    async fn mirror_with_finding() -> SqlitePool {
        let pool = db::connect_mirror("sqlite::memory:").await.unwrap();
        db::ensure_schema(&pool).await.unwrap();
        sqlx::query(
            "INSERT INTO findings (source_id, name, status, created_at, updated_at)
             VALUES ('i1', 'SQLi', 'Open', ?, ?)",
        )
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(&pool)
        .await
        .unwrap();
        pool
    }

    fn unreachable_profile() -> ConnectionProfile {
        // A profile whose source cannot be opened: write-back must still
        // succeed against the mirror alone.
        ConnectionProfile::new(BackendConfig::LocalFile {
            path: PathBuf::from("/nonexistent/pcf.sqlite3"),
        })
    }

    #[tokio::test]
    async fn invalid_status_rejected_before_any_write() {
        let pool = mirror_with_finding().await;
        let err = set_status(&pool, &unreachable_profile(), 1, "Fixed")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidStatus(_)));

        let status =
            sqlx::query_scalar::<_, String>("SELECT status FROM findings WHERE id = 1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, "Open");
    }

    #[tokio::test]
    async fn missing_finding_is_not_found() {
        let pool = mirror_with_finding().await;
        let err = set_status(&pool, &unreachable_profile(), 99, "Closed")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn mirror_updated_even_when_source_is_down() {
        let pool = mirror_with_finding().await;
        let change = set_status(&pool, &unreachable_profile(), 1, "Closed")
            .await
            .unwrap();
        assert_eq!(change.status, "Closed");
        assert!(!change.source_updated);

        let status =
            sqlx::query_scalar::<_, String>("SELECT status FROM findings WHERE id = 1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, "Closed");
    }

    #[tokio::test]
    async fn bulk_attempts_every_id() {
        let pool = mirror_with_finding().await;
        let outcome = bulk_set_status(&pool, &unreachable_profile(), &[99, 1, 98], "Raised for Risk")
            .await
            .unwrap();

        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.success_count, 1);
        assert_eq!(outcome.error_count, 2);
        assert!(!outcome.results[0].success);
        assert!(outcome.results[1].success);
        assert!(!outcome.results[2].success);

        let status =
            sqlx::query_scalar::<_, String>("SELECT status FROM findings WHERE id = 1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, "Raised for Risk");
    }

    #[tokio::test]
    async fn bulk_rejects_invalid_label_up_front() {
        let pool = mirror_with_finding().await;
        let err = bulk_set_status(&pool, &unreachable_profile(), &[1], "Remediated")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidStatus(_)));
    }
}
