//! Source backends: a uniform reader contract over the supported transports
//! and the connector selector that picks one from a profile.

pub mod api;
pub mod mysql;
pub mod postgres;
pub mod sqlite;
pub mod transport;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{BackendConfig, ConnectionProfile, FieldMapping, TableMapping};
use crate::errors::SyncError;

/// One issue as fetched from a source, already aliased to logical field
/// names with its project attributes joined in.
///
/// Project timestamps stay textual here; the source may supply epoch seconds
/// or a timestamp string, and the orchestrator owns the interpretation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawIssue {
    pub source_id: String,
    pub name: String,
    pub description: String,
    pub url_path: String,
    pub cvss: f64,
    pub cwe: i64,
    pub cve: String,
    pub status: String,
    pub issue_type: String,
    pub fix_description: String,
    pub param: String,
    pub technical: String,
    pub risks: String,
    pub references_text: String,
    pub project_id: String,
    pub project_name: String,
    pub project_description: String,
    pub project_start: Option<String>,
    pub project_end: Option<String>,
}

/// Row counts reported by a diagnostics probe.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SourceCounts {
    pub issues: i64,
    pub projects: i64,
}

/// Uniform contract over every source backend.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Backend tag for logging and error context.
    fn backend(&self) -> &'static str;

    /// Fetch every issue with joined project attributes, highest CVSS first.
    async fn fetch_issues(&self) -> Result<Vec<RawIssue>, SyncError>;

    /// Update the status of the source record identified by `source_id`.
    async fn update_status(&self, source_id: &str, status: &str) -> Result<(), SyncError>;

    /// Count issues and projects. A missing projects table yields a zero
    /// count; a missing issues table is an error.
    async fn probe(&self) -> Result<SourceCounts, SyncError>;
}

/// Open a live reader for the profile's backend. Pure dispatch; the only
/// I/O is whatever the chosen reader's `open` performs (plus the transport
/// fetch for the remote-file backend).
pub async fn open_reader(
    profile: &ConnectionProfile,
) -> Result<Box<dyn SourceReader>, SyncError> {
    match &profile.backend {
        BackendConfig::LocalFile { path } => Ok(Box::new(
            sqlite::SqliteReader::open(path, profile, "local_file").await?,
        )),
        BackendConfig::RemoteFile {
            transport,
            local_path,
            max_age_secs,
        } => {
            transport::ensure_local_copy(transport, local_path, *max_age_secs).await?;
            Ok(Box::new(
                sqlite::SqliteReader::open(local_path, profile, "remote_file").await?,
            ))
        }
        BackendConfig::Mysql { url } => {
            Ok(Box::new(mysql::MysqlReader::open(url, profile).await?))
        }
        BackendConfig::Postgres { url } => {
            Ok(Box::new(postgres::PostgresReader::open(url, profile).await?))
        }
        BackendConfig::Api { .. } => Ok(Box::new(api::ApiReader::new(profile)?)),
    }
}

/// Identifier quoting style for the two SQL dialect families.
#[derive(Debug, Clone, Copy)]
pub(crate) enum IdentQuote {
    /// Standard double quotes (SQLite, PostgreSQL).
    Double,
    /// Backticks (MySQL).
    Backtick,
}

impl IdentQuote {
    fn wrap(&self, ident: &str) -> String {
        match self {
            Self::Double => format!("\"{ident}\""),
            Self::Backtick => format!("`{ident}`"),
        }
    }
}

/// Assemble the issues-projects outer join for a relational backend.
///
/// Physical names come from the validated mappings and are quoted, so a
/// source column named after a reserved word (`references`, `type`) still
/// works. Result columns always carry the logical aliases.
pub(crate) fn issues_join_sql(
    tables: &TableMapping,
    fields: &FieldMapping,
    quote: IdentQuote,
) -> String {
    let q = |ident: &str| quote.wrap(ident);
    format!(
        "SELECT i.{id} AS source_id, i.{name} AS name, i.{description} AS description, \
         i.{url_path} AS url_path, i.{cvss} AS cvss, i.{cwe} AS cwe, i.{cve} AS cve, \
         i.{status} AS status, i.{issue_type} AS issue_type, i.{fix} AS fix_description, \
         i.{param} AS param, i.{technical} AS technical, i.{risks} AS risks, \
         i.{references} AS references_text, i.{project_id} AS project_id, \
         p.{project_name} AS project_name, p.{project_description} AS project_description, \
         p.{project_start} AS project_start, p.{project_end} AS project_end \
         FROM {issues} i LEFT OUTER JOIN {projects} p ON i.{project_id} = p.{project_key} \
         ORDER BY i.{cvss} DESC",
        id = q(&fields.issue_id),
        name = q(&fields.name),
        description = q(&fields.description),
        url_path = q(&fields.url_path),
        cvss = q(&fields.cvss),
        cwe = q(&fields.cwe),
        cve = q(&fields.cve),
        status = q(&fields.status),
        issue_type = q(&fields.issue_type),
        fix = q(&fields.fix),
        param = q(&fields.param),
        technical = q(&fields.technical),
        risks = q(&fields.risks),
        references = q(&fields.references),
        project_id = q(&fields.project_id),
        project_name = q(&fields.project_name),
        project_description = q(&fields.project_description),
        project_start = q(&fields.project_start),
        project_end = q(&fields.project_end),
        issues = q(&tables.issues),
        projects = q(&tables.projects),
        project_key = q(&fields.project_key),
    )
}
