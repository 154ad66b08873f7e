//! Connection profiles: backend selection, credentials, and the
//! logical-to-physical field/table mappings.
//!
//! A profile is an immutable value passed to every core operation, so a
//! production profile and a test profile can coexist in one process.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::SyncError;

/// Logical entity names mapped to physical table (or API endpoint) names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableMapping {
    pub issues: String,
    pub projects: String,
    pub users: String,
    pub categories: String,
}

impl Default for TableMapping {
    fn default() -> Self {
        Self {
            issues: "issues".to_string(),
            projects: "projects".to_string(),
            users: "users".to_string(),
            categories: "categories".to_string(),
        }
    }
}

/// Logical finding fields mapped to physical column / JSON key names.
///
/// Defaults match the source tool's native schema; override entries when a
/// source version renames columns. Every entry is required and must be a
/// bare identifier so query assembly cannot produce malformed SQL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldMapping {
    pub issue_id: String,
    pub name: String,
    pub description: String,
    pub url_path: String,
    pub cvss: String,
    pub cwe: String,
    pub cve: String,
    pub status: String,
    pub fix: String,
    pub issue_type: String,
    pub param: String,
    pub technical: String,
    pub risks: String,
    pub references: String,
    pub project_id: String,
    pub project_key: String,
    pub project_name: String,
    pub project_description: String,
    pub project_start: String,
    pub project_end: String,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self {
            issue_id: "id".to_string(),
            name: "name".to_string(),
            description: "description".to_string(),
            url_path: "url_path".to_string(),
            cvss: "cvss".to_string(),
            cwe: "cwe".to_string(),
            cve: "cve".to_string(),
            status: "status".to_string(),
            fix: "fix".to_string(),
            issue_type: "type".to_string(),
            param: "param".to_string(),
            technical: "technical".to_string(),
            risks: "risks".to_string(),
            references: "references".to_string(),
            project_id: "project_id".to_string(),
            project_key: "id".to_string(),
            project_name: "name".to_string(),
            project_description: "description".to_string(),
            project_start: "start_date".to_string(),
            project_end: "end_date".to_string(),
        }
    }
}

impl FieldMapping {
    fn entries(&self) -> [(&'static str, &str); 20] {
        [
            ("issue_id", &self.issue_id),
            ("name", &self.name),
            ("description", &self.description),
            ("url_path", &self.url_path),
            ("cvss", &self.cvss),
            ("cwe", &self.cwe),
            ("cve", &self.cve),
            ("status", &self.status),
            ("fix", &self.fix),
            ("issue_type", &self.issue_type),
            ("param", &self.param),
            ("technical", &self.technical),
            ("risks", &self.risks),
            ("references", &self.references),
            ("project_id", &self.project_id),
            ("project_key", &self.project_key),
            ("project_name", &self.project_name),
            ("project_description", &self.project_description),
            ("project_start", &self.project_start),
            ("project_end", &self.project_end),
        ]
    }
}

/// Check that a mapped physical name is a bare SQL identifier.
fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !s.chars().next().is_some_and(|c| c.is_ascii_digit())
}

/// How a remote file database is fetched into the local cache file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum TransportConfig {
    Ssh {
        host: String,
        port: u16,
        username: String,
        /// Inline password transfers via sshpass; omit to rely on key auth.
        password: Option<String>,
        remote_path: String,
    },
    Http {
        url: String,
        username: Option<String>,
        password: Option<String>,
        verify_tls: bool,
        timeout_secs: u64,
    },
    Ftp {
        host: String,
        port: u16,
        username: String,
        password: String,
        remote_path: String,
    },
    Smb {
        host: String,
        share: String,
        remote_path: String,
        username: String,
        password: String,
    },
}

impl TransportConfig {
    pub fn method(&self) -> &'static str {
        match self {
            Self::Ssh { .. } => "ssh",
            Self::Http { .. } => "http",
            Self::Ftp { .. } => "ftp",
            Self::Smb { .. } => "smb",
        }
    }
}

/// Backend-specific connection parameters, one variant per supported source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// SQLite database file readable on the local filesystem.
    LocalFile { path: PathBuf },
    /// SQLite database file fetched over the network into a local cache file.
    RemoteFile {
        transport: TransportConfig,
        /// Where the fetched copy lives.
        local_path: PathBuf,
        /// Re-fetch when the local copy is older than this.
        max_age_secs: u64,
    },
    Mysql { url: String },
    Postgres { url: String },
    Api {
        base_url: String,
        /// Bearer token; preferred over basic auth when both are set.
        token: Option<String>,
        username: Option<String>,
        password: Option<String>,
        verify_tls: bool,
        ca_path: Option<PathBuf>,
        timeout_secs: u64,
    },
}

impl BackendConfig {
    /// Backend tag for logging and error context.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LocalFile { .. } => "local_file",
            Self::RemoteFile { .. } => "remote_file",
            Self::Mysql { .. } => "mysql",
            Self::Postgres { .. } => "postgres",
            Self::Api { .. } => "api",
        }
    }
}

/// Textual backend tag, used when a profile is assembled from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    LocalFile,
    RemoteFile,
    Mysql,
    Postgres,
    Api,
}

impl FromStr for BackendKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local_file" => Ok(Self::LocalFile),
            "remote_file" => Ok(Self::RemoteFile),
            "mysql" => Ok(Self::Mysql),
            "postgres" => Ok(Self::Postgres),
            "api" => Ok(Self::Api),
            other => Err(SyncError::UnsupportedBackend(other.to_string())),
        }
    }
}

/// Batch and retry settings for sync runs.
///
/// Retry count and delay are advisory: they are surfaced to callers wrapping
/// `sync`, never consumed inside the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    pub batch_size: usize,
    pub retry_count: u32,
    pub retry_delay_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            retry_count: 3,
            retry_delay_secs: 5,
        }
    }
}

/// On-disk result cache settings (API backend responses).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    pub enabled: bool,
    pub dir: PathBuf,
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".pcfmirror/cache"),
            ttl_secs: 300,
        }
    }
}

/// A fully specified set of connection parameters for one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub backend: BackendConfig,
    pub tables: TableMapping,
    pub fields: FieldMapping,
    pub sync: SyncSettings,
    pub cache: CacheSettings,
    pub connect_timeout_secs: u64,
}

impl ConnectionProfile {
    /// Build a profile with default mappings and settings for a backend.
    pub fn new(backend: BackendConfig) -> Self {
        Self {
            backend,
            tables: TableMapping::default(),
            fields: FieldMapping::default(),
            sync: SyncSettings::default(),
            cache: CacheSettings::default(),
            connect_timeout_secs: 10,
        }
    }

    /// Validate mapping entries and settings, failing fast on anything that
    /// would later produce a malformed query.
    pub fn validate(&self) -> Result<(), SyncError> {
        for (logical, physical) in self.fields.entries() {
            if !is_identifier(physical) {
                return Err(SyncError::Config(format!(
                    "field mapping '{logical}' maps to invalid identifier '{physical}'"
                )));
            }
        }
        for (logical, physical) in [
            ("issues", self.tables.issues.as_str()),
            ("projects", self.tables.projects.as_str()),
            ("users", self.tables.users.as_str()),
            ("categories", self.tables.categories.as_str()),
        ] {
            if !is_identifier(physical) {
                return Err(SyncError::Config(format!(
                    "table mapping '{logical}' maps to invalid identifier '{physical}'"
                )));
            }
        }
        if self.sync.batch_size == 0 {
            return Err(SyncError::Config("batch_size must be positive".to_string()));
        }
        Ok(())
    }

    /// Load a profile from environment variables (`PCF_*`).
    pub fn from_env() -> Result<Self, SyncError> {
        let kind: BackendKind = require_var("PCF_BACKEND")?.parse()?;

        let backend = match kind {
            BackendKind::LocalFile => BackendConfig::LocalFile {
                path: PathBuf::from(require_var("PCF_DB_PATH")?),
            },
            BackendKind::RemoteFile => BackendConfig::RemoteFile {
                transport: transport_from_env()?,
                local_path: PathBuf::from(
                    env::var("PCF_DB_PATH")
                        .unwrap_or_else(|_| ".pcfmirror/pcf.sqlite3".to_string()),
                ),
                max_age_secs: var_or("PCF_FILE_MAX_AGE_SECS", 3600),
            },
            BackendKind::Mysql | BackendKind::Postgres => {
                let url = require_var("PCF_DB_URL")?;
                if kind == BackendKind::Mysql {
                    BackendConfig::Mysql { url }
                } else {
                    BackendConfig::Postgres { url }
                }
            }
            BackendKind::Api => BackendConfig::Api {
                base_url: require_var("PCF_API_URL")?,
                token: env::var("PCF_API_TOKEN").ok(),
                username: env::var("PCF_API_USERNAME").ok(),
                password: env::var("PCF_API_PASSWORD").ok(),
                verify_tls: env::var("PCF_TLS_VERIFY")
                    .map(|v| v != "false" && v != "0")
                    .unwrap_or(true),
                ca_path: env::var("PCF_TLS_CA_PATH").ok().map(PathBuf::from),
                timeout_secs: var_or("PCF_API_TIMEOUT_SECS", 30),
            },
        };

        let profile = Self {
            backend,
            tables: TableMapping {
                issues: env::var("PCF_TABLE_ISSUES")
                    .unwrap_or_else(|_| "issues".to_string()),
                projects: env::var("PCF_TABLE_PROJECTS")
                    .unwrap_or_else(|_| "projects".to_string()),
                users: env::var("PCF_TABLE_USERS").unwrap_or_else(|_| "users".to_string()),
                categories: env::var("PCF_TABLE_CATEGORIES")
                    .unwrap_or_else(|_| "categories".to_string()),
            },
            fields: FieldMapping::default(),
            sync: SyncSettings {
                batch_size: var_or("PCF_BATCH_SIZE", 100),
                retry_count: var_or("PCF_RETRY_COUNT", 3),
                retry_delay_secs: var_or("PCF_RETRY_DELAY_SECS", 5),
            },
            cache: CacheSettings {
                enabled: env::var("PCF_CACHE_ENABLED")
                    .map(|v| v != "false" && v != "0")
                    .unwrap_or(true),
                dir: PathBuf::from(
                    env::var("PCF_CACHE_DIR")
                        .unwrap_or_else(|_| ".pcfmirror/cache".to_string()),
                ),
                ttl_secs: var_or("PCF_CACHE_TTL_SECS", 300),
            },
            connect_timeout_secs: var_or("PCF_CONNECT_TIMEOUT_SECS", 10),
        };
        profile.validate()?;
        Ok(profile)
    }
}

fn transport_from_env() -> Result<TransportConfig, SyncError> {
    match require_var("PCF_FETCH_METHOD")?.as_str() {
        "ssh" => Ok(TransportConfig::Ssh {
            host: require_var("PCF_REMOTE_HOST")?,
            port: var_or("PCF_REMOTE_PORT", 22),
            username: require_var("PCF_REMOTE_USER")?,
            password: env::var("PCF_REMOTE_PASSWORD").ok(),
            remote_path: require_var("PCF_REMOTE_PATH")?,
        }),
        "http" | "https" => Ok(TransportConfig::Http {
            url: require_var("PCF_REMOTE_URL")?,
            username: env::var("PCF_REMOTE_USER").ok(),
            password: env::var("PCF_REMOTE_PASSWORD").ok(),
            verify_tls: env::var("PCF_TLS_VERIFY")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            timeout_secs: var_or("PCF_FETCH_TIMEOUT_SECS", 30),
        }),
        "ftp" => Ok(TransportConfig::Ftp {
            host: require_var("PCF_REMOTE_HOST")?,
            port: var_or("PCF_REMOTE_PORT", 21),
            username: require_var("PCF_REMOTE_USER")?,
            password: require_var("PCF_REMOTE_PASSWORD")?,
            remote_path: require_var("PCF_REMOTE_PATH")?,
        }),
        "smb" => Ok(TransportConfig::Smb {
            host: require_var("PCF_REMOTE_HOST")?,
            share: require_var("PCF_REMOTE_SHARE")?,
            remote_path: require_var("PCF_REMOTE_PATH")?,
            username: require_var("PCF_REMOTE_USER")?,
            password: require_var("PCF_REMOTE_PASSWORD")?,
        }),
        other => Err(SyncError::Config(format!(
            "unknown fetch method '{other}'"
        ))),
    }
}

fn require_var(name: &str) -> Result<String, SyncError> {
    env::var(name).map_err(|_| SyncError::Config(format!("{name} is not set")))
}

fn var_or<T: FromStr + Copy>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses_known_tags() {
        assert_eq!("mysql".parse::<BackendKind>().unwrap(), BackendKind::Mysql);
        assert_eq!("api".parse::<BackendKind>().unwrap(), BackendKind::Api);
    }

    #[test]
    fn backend_kind_rejects_unknown_tag() {
        let err = "oracle".parse::<BackendKind>().unwrap_err();
        assert!(matches!(err, SyncError::UnsupportedBackend(ref t) if t == "oracle"));
    }

    #[test]
    fn default_profile_validates() {
        let profile = ConnectionProfile::new(BackendConfig::LocalFile {
            path: PathBuf::from("pcf.sqlite3"),
        });
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn empty_mapping_entry_fails_validation() {
        let mut profile = ConnectionProfile::new(BackendConfig::LocalFile {
            path: PathBuf::from("pcf.sqlite3"),
        });
        profile.fields.cvss = String::new();
        let err = profile.validate().unwrap_err();
        assert!(err.to_string().contains("cvss"));
    }

    #[test]
    fn injection_in_mapping_fails_validation() {
        let mut profile = ConnectionProfile::new(BackendConfig::LocalFile {
            path: PathBuf::from("pcf.sqlite3"),
        });
        profile.tables.issues = "issues; DROP TABLE findings".to_string();
        assert!(profile.validate().is_err());
    }

    #[test]
    fn leading_digit_is_not_an_identifier() {
        assert!(!is_identifier("1ssues"));
        assert!(is_identifier("issues_v2"));
    }

    #[test]
    fn zero_batch_size_rejected() {
        let mut profile = ConnectionProfile::new(BackendConfig::LocalFile {
            path: PathBuf::from("pcf.sqlite3"),
        });
        profile.sync.batch_size = 0;
        assert!(profile.validate().is_err());
    }

    #[test]
    fn backend_kind_strings() {
        let b = BackendConfig::Api {
            base_url: "https://pcf.example".to_string(),
            token: None,
            username: None,
            password: None,
            verify_tls: true,
            ca_path: None,
            timeout_secs: 30,
        };
        assert_eq!(b.kind(), "api");
    }

    #[test]
    fn transport_method_names() {
        let t = TransportConfig::Smb {
            host: "fileserver".to_string(),
            share: "pcf".to_string(),
            remote_path: "db/pcf.sqlite3".to_string(),
            username: "svc".to_string(),
            password: "secret".to_string(),
        };
        assert_eq!(t.method(), "smb");
    }
}
