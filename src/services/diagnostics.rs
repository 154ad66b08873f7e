//! Operator-facing connectivity and data-availability probe.

use serde::Serialize;

use crate::config::ConnectionProfile;
use crate::errors::SyncError;
use crate::sources;

/// Report produced by `test_connection`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionTest {
    pub backend: String,
    pub connection_ok: bool,
    pub data_available: bool,
    pub issue_count: i64,
    pub project_count: i64,
    pub error: Option<String>,
}

impl ConnectionTest {
    fn failure(backend: &str, connection_ok: bool, err: &SyncError) -> Self {
        Self {
            backend: backend.to_string(),
            connection_ok,
            data_available: false,
            issue_count: 0,
            project_count: 0,
            error: Some(err.to_string()),
        }
    }
}

/// Probe the profile's source: can we connect, and is there data to sync?
///
/// Never returns an error; every failure mode is folded into the report so
/// an operator sees one shape regardless of what broke.
pub async fn test_connection(profile: &ConnectionProfile) -> ConnectionTest {
    let backend = profile.backend.kind();

    if let Err(err) = profile.validate() {
        return ConnectionTest::failure(backend, false, &err);
    }

    let reader = match sources::open_reader(profile).await {
        Ok(r) => r,
        Err(err) => {
            tracing::warn!(backend, error = %err, "Connection test failed to open source");
            return ConnectionTest::failure(backend, false, &err);
        }
    };

    match reader.probe().await {
        Ok(counts) => ConnectionTest {
            backend: backend.to_string(),
            connection_ok: true,
            data_available: counts.issues > 0,
            issue_count: counts.issues,
            project_count: counts.projects,
            error: None,
        },
        // Reachable but the mapped issues table/endpoint is absent.
        Err(err @ SyncError::Schema { .. }) => {
            tracing::warn!(backend, error = %err, "Connection test found schema problem");
            ConnectionTest::failure(backend, true, &err)
        }
        Err(err) => {
            tracing::warn!(backend, error = %err, "Connection test probe failed");
            ConnectionTest::failure(backend, false, &err)
        }
    }
}
