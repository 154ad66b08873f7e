//! Reader for the source system's REST API.
//!
//! Issues and projects come from two endpoints; the join happens in memory
//! against a project index keyed by id. Responses run through the TTL disk
//! cache so repeated syncs within the cache window stay off the network.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::DiskCache;
use crate::config::{BackendConfig, ConnectionProfile, FieldMapping, TableMapping};
use crate::errors::SyncError;
use crate::sources::{RawIssue, SourceCounts, SourceReader};

const BACKEND: &str = "api";

pub struct ApiReader {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    username: Option<String>,
    password: Option<String>,
    tables: TableMapping,
    fields: FieldMapping,
    cache: DiskCache,
}

impl ApiReader {
    pub fn new(profile: &ConnectionProfile) -> Result<Self, SyncError> {
        let BackendConfig::Api {
            base_url,
            token,
            username,
            password,
            verify_tls,
            ca_path,
            timeout_secs,
        } = &profile.backend
        else {
            return Err(SyncError::Config(
                "ApiReader requires an api backend profile".to_string(),
            ));
        };

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(*timeout_secs))
            .danger_accept_invalid_certs(!verify_tls);
        if let Some(ca) = ca_path {
            let pem = std::fs::read(ca)
                .map_err(|e| SyncError::Config(format!("cannot read CA file: {e}")))?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| SyncError::Config(format!("invalid CA certificate: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder
            .build()
            .map_err(|e| SyncError::connection(BACKEND, e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.clone(),
            username: username.clone(),
            password: password.clone(),
            tables: profile.tables.clone(),
            fields: profile.fields.clone(),
            cache: DiskCache::new(&profile.cache),
        })
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name)
    }

    /// Bearer token wins when both token and basic credentials are set.
    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.token {
            request.bearer_auth(token)
        } else if let Some(user) = &self.username {
            request.basic_auth(user, self.password.as_deref())
        } else {
            request
        }
    }

    async fn get_live(&self, url: &str) -> Result<String, SyncError> {
        let response = self
            .with_auth(self.client.get(url))
            .send()
            .await
            .map_err(|e| SyncError::connection(BACKEND, e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SyncError::schema(BACKEND, format!("endpoint {url} not found")));
        }
        let response = response
            .error_for_status()
            .map_err(|e| SyncError::connection(BACKEND, e))?;
        response
            .text()
            .await
            .map_err(|e| SyncError::connection(BACKEND, e))
    }

    /// GET through the result cache, keyed by the full URL.
    async fn get_json(&self, url: &str) -> Result<Value, SyncError> {
        if let Some(cached) = self.cache.get(url) {
            if let Ok(value) = serde_json::from_str(&cached) {
                return Ok(value);
            }
            tracing::warn!(url, "Cached payload no longer parses, refetching");
        }
        let body = self.get_live(url).await?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| SyncError::connection(BACKEND, format!("invalid JSON response: {e}")))?;
        if let Err(err) = self.cache.set(url, &body) {
            tracing::warn!(url, error = %err, "Failed to write cache entry");
        }
        Ok(value)
    }

    /// Project index for the in-memory left join; a missing projects
    /// endpoint degrades to an empty index.
    async fn project_index_or_empty(&self) -> Result<HashMap<String, Value>, SyncError> {
        match self.get_json(&self.endpoint(&self.tables.projects)).await {
            Ok(value) => Ok(project_index(&records(&value)?, &self.fields)),
            Err(SyncError::Schema { message, .. }) => {
                tracing::warn!(message, "Projects endpoint unavailable, joining without projects");
                Ok(HashMap::new())
            }
            Err(other) => Err(other),
        }
    }
}

/// Unwrap a response into its record list: either a bare array or an object
/// with a `data` array.
fn records(value: &Value) -> Result<Vec<Value>, SyncError> {
    if let Some(array) = value.as_array() {
        return Ok(array.clone());
    }
    if let Some(array) = value.get("data").and_then(Value::as_array) {
        return Ok(array.clone());
    }
    Err(SyncError::schema(
        BACKEND,
        "response is neither an array nor an object with a 'data' array",
    ))
}

fn json_text(obj: &Value, key: &str) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn json_text_opt(obj: &Value, key: &str) -> Option<String> {
    match obj.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn json_f64(obj: &Value, key: &str) -> f64 {
    match obj.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn json_i64(obj: &Value, key: &str) -> i64 {
    match obj.get(key) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

/// Index projects by their id key.
fn project_index(projects: &[Value], fields: &FieldMapping) -> HashMap<String, Value> {
    projects
        .iter()
        .filter_map(|p| {
            let id = json_text(p, &fields.project_key);
            (!id.is_empty()).then(|| (id, p.clone()))
        })
        .collect()
}

/// Left-join issues against the project index. A lookup miss leaves the
/// project fields empty rather than failing.
fn decode_issues(
    issues: &[Value],
    projects: &HashMap<String, Value>,
    fields: &FieldMapping,
) -> Vec<RawIssue> {
    let mut out: Vec<RawIssue> = issues
        .iter()
        .map(|issue| {
            let project_id = json_text(issue, &fields.project_id);
            let project = projects.get(&project_id);
            RawIssue {
                source_id: json_text(issue, &fields.issue_id),
                name: json_text(issue, &fields.name),
                description: json_text(issue, &fields.description),
                url_path: json_text(issue, &fields.url_path),
                cvss: json_f64(issue, &fields.cvss),
                cwe: json_i64(issue, &fields.cwe),
                cve: json_text(issue, &fields.cve),
                status: json_text(issue, &fields.status),
                issue_type: json_text(issue, &fields.issue_type),
                fix_description: json_text(issue, &fields.fix),
                param: json_text(issue, &fields.param),
                technical: json_text(issue, &fields.technical),
                risks: json_text(issue, &fields.risks),
                references_text: json_text(issue, &fields.references),
                project_id,
                project_name: project.map(|p| json_text(p, &fields.project_name)).unwrap_or_default(),
                project_description: project
                    .map(|p| json_text(p, &fields.project_description))
                    .unwrap_or_default(),
                project_start: project.and_then(|p| json_text_opt(p, &fields.project_start)),
                project_end: project.and_then(|p| json_text_opt(p, &fields.project_end)),
            }
        })
        .collect();
    out.sort_by(|a, b| b.cvss.partial_cmp(&a.cvss).unwrap_or(std::cmp::Ordering::Equal));
    out
}

#[async_trait]
impl SourceReader for ApiReader {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn fetch_issues(&self) -> Result<Vec<RawIssue>, SyncError> {
        let issues_value = self.get_json(&self.endpoint(&self.tables.issues)).await?;
        let issues = records(&issues_value)?;
        let projects = self.project_index_or_empty().await?;
        Ok(decode_issues(&issues, &projects, &self.fields))
    }

    async fn update_status(&self, source_id: &str, status: &str) -> Result<(), SyncError> {
        let url = format!("{}/{}", self.endpoint(&self.tables.issues), source_id);
        let mut body = serde_json::Map::new();
        body.insert(self.fields.status.clone(), Value::String(status.to_string()));
        let response = self
            .with_auth(self.client.patch(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| SyncError::connection(BACKEND, e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SyncError::NotFound(format!(
                "source issue {source_id} not found"
            )));
        }
        response
            .error_for_status()
            .map_err(|e| SyncError::connection(BACKEND, e))?;
        Ok(())
    }

    async fn probe(&self) -> Result<SourceCounts, SyncError> {
        // Cheap connectivity probe first: one record, straight past the cache.
        let probe_url = format!("{}?limit=1", self.endpoint(&self.tables.issues));
        let body = self.get_live(&probe_url).await?;
        serde_json::from_str::<Value>(&body)
            .map_err(|e| SyncError::connection(BACKEND, format!("invalid JSON response: {e}")))?;

        // Then a full fetch for true counts.
        let issues_value = self.get_json(&self.endpoint(&self.tables.issues)).await?;
        let issues = records(&issues_value)?.len() as i64;
        let projects = match self.get_json(&self.endpoint(&self.tables.projects)).await {
            Ok(value) => records(&value)?.len() as i64,
            Err(SyncError::Schema { .. }) => 0,
            Err(other) => return Err(other),
        };
        Ok(SourceCounts { issues, projects })
    }
}
