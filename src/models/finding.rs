//! Mirror finding model, severity bands, and the write-back status set.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::errors::SyncError;

/// A finding row in the mirror store.
///
/// `id` is mirror-internal; cross-cycle identity is `source_id`, because the
/// whole table is replaced on every sync run.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Finding {
    pub id: i64,
    pub source_id: String,
    pub name: String,
    pub description: String,
    pub url_path: String,
    pub cvss: f64,
    pub cwe: i64,
    pub cve: String,
    pub status: String,
    pub project_id: String,
    pub project_name: String,
    pub project_description: String,
    pub issue_type: String,
    pub fix_description: String,
    pub param: String,
    pub technical: String,
    pub risks: String,
    pub references_text: String,
    pub project_start: Option<DateTime<Utc>>,
    pub project_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A normalized record ready for insertion into the mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFinding {
    pub source_id: String,
    pub name: String,
    pub description: String,
    pub url_path: String,
    pub cvss: f64,
    pub cwe: i64,
    pub cve: String,
    pub status: String,
    pub project_id: String,
    pub project_name: String,
    pub project_description: String,
    pub issue_type: String,
    pub fix_description: String,
    pub param: String,
    pub technical: String,
    pub risks: String,
    pub references_text: String,
    pub project_start: Option<DateTime<Utc>>,
    pub project_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// CVSS severity bands used by the operator summary query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SeverityBand {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl SeverityBand {
    /// Band for a CVSS score.
    pub fn from_score(cvss: f64) -> Self {
        if cvss >= 9.0 {
            Self::Critical
        } else if cvss >= 7.0 {
            Self::High
        } else if cvss >= 4.0 {
            Self::Medium
        } else if cvss > 0.0 {
            Self::Low
        } else {
            Self::Info
        }
    }
}

/// Closed set of statuses accepted by the write-back operation.
///
/// The source system stores the label verbatim; anything outside this set is
/// rejected before any write happens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WritebackStatus {
    RaisedForRisk,
    Closed,
}

impl WritebackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RaisedForRisk => "Raised for Risk",
            Self::Closed => "Closed",
        }
    }
}

impl FromStr for WritebackStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Raised for Risk" | "RaisedForRisk" => Ok(Self::RaisedForRisk),
            "Closed" => Ok(Self::Closed),
            other => Err(SyncError::InvalidStatus(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_boundaries() {
        assert_eq!(SeverityBand::from_score(10.0), SeverityBand::Critical);
        assert_eq!(SeverityBand::from_score(9.0), SeverityBand::Critical);
        assert_eq!(SeverityBand::from_score(8.9), SeverityBand::High);
        assert_eq!(SeverityBand::from_score(7.0), SeverityBand::High);
        assert_eq!(SeverityBand::from_score(6.9), SeverityBand::Medium);
        assert_eq!(SeverityBand::from_score(4.0), SeverityBand::Medium);
        assert_eq!(SeverityBand::from_score(3.9), SeverityBand::Low);
        assert_eq!(SeverityBand::from_score(0.1), SeverityBand::Low);
        assert_eq!(SeverityBand::from_score(0.0), SeverityBand::Info);
    }

    #[test]
    fn band_deserializes_lowercase() {
        let band: SeverityBand = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(band, SeverityBand::Critical);
    }

    #[test]
    fn writeback_status_parses_both_spellings() {
        assert_eq!(
            "Raised for Risk".parse::<WritebackStatus>().unwrap(),
            WritebackStatus::RaisedForRisk
        );
        assert_eq!(
            "RaisedForRisk".parse::<WritebackStatus>().unwrap(),
            WritebackStatus::RaisedForRisk
        );
        assert_eq!(
            "Closed".parse::<WritebackStatus>().unwrap(),
            WritebackStatus::Closed
        );
    }

    #[test]
    fn writeback_status_rejects_unknown_label() {
        let err = "Fixed".parse::<WritebackStatus>().unwrap_err();
        assert!(matches!(err, SyncError::InvalidStatus(ref s) if s == "Fixed"));
    }

    #[test]
    fn writeback_status_labels() {
        assert_eq!(WritebackStatus::RaisedForRisk.as_str(), "Raised for Risk");
        assert_eq!(WritebackStatus::Closed.as_str(), "Closed");
    }
}
