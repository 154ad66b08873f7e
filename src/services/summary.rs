//! Operator summary query over the mirror: severity bands, status, project
//! and month filters with a whitelisted sort order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::errors::SyncError;
use crate::models::finding::{Finding, SeverityBand};
use crate::models::pagination::{PagedResult, Pagination};

/// Trimmed finding row for list views.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct FindingSummary {
    pub id: i64,
    pub source_id: String,
    pub name: String,
    pub cvss: f64,
    pub cwe: i64,
    pub cve: String,
    pub status: String,
    pub project_id: String,
    pub project_name: String,
    pub created_at: DateTime<Utc>,
}

/// Filters accepted by the summary query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummaryFilters {
    pub project_id: Option<String>,
    pub severity: Option<SeverityBand>,
    pub status: Option<String>,
    /// Month bucket over `created_at`, formatted `YYYY-MM`.
    pub month: Option<String>,
    /// Sort column; must be whitelisted. Defaults to severity descending
    /// then recency.
    pub sort: Option<String>,
    pub ascending: Option<bool>,
}

/// Bind-free SQL condition for a severity band.
fn band_condition(band: SeverityBand) -> &'static str {
    match band {
        SeverityBand::Critical => "cvss >= 9.0",
        SeverityBand::High => "cvss >= 7.0 AND cvss < 9.0",
        SeverityBand::Medium => "cvss >= 4.0 AND cvss < 7.0",
        SeverityBand::Low => "cvss > 0.0 AND cvss < 4.0",
        SeverityBand::Info => "cvss = 0.0",
    }
}

fn sort_column(name: &str) -> Option<&'static str> {
    match name {
        "cvss" => Some("cvss"),
        "created_at" => Some("created_at"),
        "name" => Some("name"),
        "status" => Some("status"),
        "project_id" => Some("project_id"),
        "project_name" => Some("project_name"),
        _ => None,
    }
}

fn valid_month(month: &str) -> bool {
    let bytes = month.as_bytes();
    bytes.len() == 7
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..].iter().all(u8::is_ascii_digit)
}

/// List mirror findings matching the filters.
pub async fn list(
    mirror: &SqlitePool,
    filters: &SummaryFilters,
    pagination: &Pagination,
) -> Result<PagedResult<FindingSummary>, SyncError> {
    let mut conditions: Vec<String> = Vec::new();

    if filters.project_id.is_some() {
        conditions.push("project_id = ?".to_string());
    }
    if let Some(band) = filters.severity {
        conditions.push(band_condition(band).to_string());
    }
    if filters.status.is_some() {
        conditions.push("status = ?".to_string());
    }
    if let Some(month) = &filters.month {
        if !valid_month(month) {
            return Err(SyncError::Config(format!(
                "month filter must be YYYY-MM, got '{month}'"
            )));
        }
        conditions.push("strftime('%Y-%m', created_at) = ?".to_string());
    }

    let order_by = match &filters.sort {
        None => "cvss DESC, created_at DESC".to_string(),
        Some(name) => {
            let column = sort_column(name).ok_or_else(|| {
                SyncError::Config(format!("'{name}' is not a sortable column"))
            })?;
            let direction = if filters.ascending.unwrap_or(false) {
                "ASC"
            } else {
                "DESC"
            };
            format!("{column} {direction}, cvss DESC, created_at DESC")
        }
    };

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = format!("SELECT COUNT(*) FROM findings {where_clause}");
    let data_sql = format!(
        "SELECT id, source_id, name, cvss, cwe, cve, status, project_id, project_name, created_at \
         FROM findings {where_clause} ORDER BY {order_by} LIMIT {} OFFSET {}",
        pagination.limit(),
        pagination.offset(),
    );

    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    let mut data_query = sqlx::query_as::<_, FindingSummary>(&data_sql);

    macro_rules! bind_both {
        ($val:expr) => {
            count_query = count_query.bind($val);
            data_query = data_query.bind($val);
        };
    }

    if let Some(project_id) = &filters.project_id {
        bind_both!(project_id);
    }
    if let Some(status) = &filters.status {
        bind_both!(status);
    }
    if let Some(month) = &filters.month {
        bind_both!(month);
    }

    let total = count_query.fetch_one(mirror).await?;
    let items = data_query.fetch_all(mirror).await?;
    Ok(PagedResult::new(items, total, pagination))
}

/// Fetch one full mirror record by its internal id.
pub async fn get(mirror: &SqlitePool, id: i64) -> Result<Finding, SyncError> {
    sqlx::query_as::<_, Finding>("SELECT * FROM findings WHERE id = ?")
        .bind(id)
        .fetch_optional(mirror)
        .await?
        .ok_or_else(|| SyncError::NotFound(format!("finding {id} not found")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::TimeZone;

    async fn seeded_mirror() -> SqlitePool {
        let pool = db::connect_mirror("sqlite::memory:").await.unwrap();
        db::ensure_schema(&pool).await.unwrap();
        let rows: [(&str, &str, f64, &str, &str, i64); 4] = [
            ("i1", "SQLi", 9.8, "Open", "p1", 1700600000),
            ("i2", "XSS", 6.1, "Open", "p1", 1700600000),
            ("i3", "Weak TLS", 3.7, "Closed", "p2", 1696118400),
            ("i4", "Banner", 0.0, "Open", "p2", 1696118400),
        ];
        for (id, name, cvss, status, project, epoch) in rows {
            sqlx::query(
                "INSERT INTO findings (source_id, name, cvss, status, project_id, project_name, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(name)
            .bind(cvss)
            .bind(status)
            .bind(project)
            .bind(format!("Project {project}"))
            .bind(Utc.timestamp_opt(epoch, 0).single().unwrap())
            .bind(Utc::now())
            .execute(&pool)
            .await
            .unwrap();
        }
        pool
    }

    #[tokio::test]
    async fn default_sort_is_severity_then_recency() {
        let pool = seeded_mirror().await;
        let page = list(&pool, &SummaryFilters::default(), &Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 4);
        let ids: Vec<_> = page.items.iter().map(|f| f.source_id.as_str()).collect();
        assert_eq!(ids, ["i1", "i2", "i3", "i4"]);
    }

    #[tokio::test]
    async fn severity_band_filters() {
        let pool = seeded_mirror().await;

        let critical = SummaryFilters {
            severity: Some(SeverityBand::Critical),
            ..Default::default()
        };
        let page = list(&pool, &critical, &Pagination::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].source_id, "i1");

        let info = SummaryFilters {
            severity: Some(SeverityBand::Info),
            ..Default::default()
        };
        let page = list(&pool, &info, &Pagination::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].source_id, "i4");
    }

    #[tokio::test]
    async fn project_status_and_month_filters_combine() {
        let pool = seeded_mirror().await;
        let filters = SummaryFilters {
            project_id: Some("p2".to_string()),
            status: Some("Closed".to_string()),
            month: Some("2023-10".to_string()),
            ..Default::default()
        };
        let page = list(&pool, &filters, &Pagination::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].source_id, "i3");
    }

    #[tokio::test]
    async fn month_filter_validated() {
        let pool = seeded_mirror().await;
        let filters = SummaryFilters {
            month: Some("October".to_string()),
            ..Default::default()
        };
        let err = list(&pool, &filters, &Pagination::default()).await.unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[tokio::test]
    async fn sort_whitelist_enforced() {
        let pool = seeded_mirror().await;
        let filters = SummaryFilters {
            sort: Some("cvss; DROP TABLE findings".to_string()),
            ..Default::default()
        };
        let err = list(&pool, &filters, &Pagination::default()).await.unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[tokio::test]
    async fn get_returns_full_record_or_not_found() {
        let pool = seeded_mirror().await;
        let finding = get(&pool, 1).await.unwrap();
        assert_eq!(finding.source_id, "i1");
        assert_eq!(finding.cvss, 9.8);
        assert!(finding.project_end.is_none());

        let err = get(&pool, 999).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn explicit_sort_ascending() {
        let pool = seeded_mirror().await;
        let filters = SummaryFilters {
            sort: Some("cvss".to_string()),
            ascending: Some(true),
            ..Default::default()
        };
        let page = list(&pool, &filters, &Pagination::default()).await.unwrap();
        assert_eq!(page.items[0].source_id, "i4");
        assert_eq!(page.items[3].source_id, "i1");
    }
}
