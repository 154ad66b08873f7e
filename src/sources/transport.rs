//! Transport fetchers for the remote-file backend.
//!
//! Each fetcher materializes the remote SQLite database into the local cache
//! file. The cache-age policy lives here; retry policy does not (callers of
//! `sync` own retries). SSH and SMB shell out to the platform tools behind
//! this seam so a native implementation can replace them without touching
//! the orchestrator.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use suppaftp::types::FileType;
use suppaftp::FtpStream;

use crate::config::TransportConfig;
use crate::errors::SyncError;

fn fetch_err(method: &str, err: impl std::fmt::Display) -> SyncError {
    SyncError::TransportFetch {
        method: method.to_string(),
        message: err.to_string(),
    }
}

/// Whether the local copy exists and is younger than `max_age_secs`.
pub fn is_fresh(path: &Path, max_age_secs: u64) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    meta.modified()
        .ok()
        .and_then(|mtime| mtime.elapsed().ok())
        .is_some_and(|age| age <= Duration::from_secs(max_age_secs))
}

/// Sibling path the transports download into. The fetched bytes move onto
/// `dest` only after the transport reports success, so an interrupted
/// transfer can never refresh the cache mtime.
fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Make sure a current copy of the remote file database exists at
/// `local_path`, fetching it when absent or older than `max_age_secs`.
pub async fn ensure_local_copy(
    transport: &TransportConfig,
    local_path: &Path,
    max_age_secs: u64,
) -> Result<(), SyncError> {
    if is_fresh(local_path, max_age_secs) {
        tracing::debug!(path = %local_path.display(), "Remote file cache is fresh, skipping fetch");
        return Ok(());
    }

    let method = transport.method();
    if let Some(parent) = local_path.parent() {
        fs::create_dir_all(parent).map_err(|e| fetch_err(method, e))?;
    }

    tracing::info!(method, path = %local_path.display(), "Fetching remote file database");
    let staging = staging_path(local_path);
    let fetched = match transport.clone() {
        TransportConfig::Http {
            url,
            username,
            password,
            verify_tls,
            timeout_secs,
        } => fetch_http(&url, username, password, verify_tls, timeout_secs, &staging).await,
        other => {
            let dest = staging.clone();
            tokio::task::spawn_blocking(move || match other {
                TransportConfig::Ssh {
                    host,
                    port,
                    username,
                    password,
                    remote_path,
                } => fetch_scp(&host, port, &username, password.as_deref(), &remote_path, &dest),
                TransportConfig::Ftp {
                    host,
                    port,
                    username,
                    password,
                    remote_path,
                } => fetch_ftp(&host, port, &username, &password, &remote_path, &dest),
                TransportConfig::Smb {
                    host,
                    share,
                    remote_path,
                    username,
                    password,
                } => fetch_smb(&host, &share, &remote_path, &username, &password, &dest),
                TransportConfig::Http { .. } => unreachable!("handled above"),
            })
            .await
            .map_err(|e| fetch_err(method, e))?
        }
    };

    match fetched {
        Ok(()) => fs::rename(&staging, local_path).map_err(|e| fetch_err(method, e)),
        Err(err) => {
            if staging.exists() {
                let _ = fs::remove_file(&staging);
            }
            Err(err)
        }
    }
}

/// Authenticated GET into `dest`.
async fn fetch_http(
    url: &str,
    username: Option<String>,
    password: Option<String>,
    verify_tls: bool,
    timeout_secs: u64,
    dest: &Path,
) -> Result<(), SyncError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .danger_accept_invalid_certs(!verify_tls)
        .build()
        .map_err(|e| fetch_err("http", e))?;

    let mut request = client.get(url);
    if let Some(user) = username {
        request = request.basic_auth(user, password);
    }

    let response = request
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| fetch_err("http", e))?;
    let body = response.bytes().await.map_err(|e| fetch_err("http", e))?;
    fs::write(dest, &body).map_err(|e| fetch_err("http", e))?;
    Ok(())
}

/// Secure-copy transfer; uses sshpass for inline password authentication.
fn fetch_scp(
    host: &str,
    port: u16,
    username: &str,
    password: Option<&str>,
    remote_path: &str,
    dest: &Path,
) -> Result<(), SyncError> {
    let source = format!("{username}@{host}:{remote_path}");
    let mut command = match password {
        Some(pw) => {
            let mut c = Command::new("sshpass");
            c.arg("-p").arg(pw).arg("scp");
            c
        }
        None => {
            let mut c = Command::new("scp");
            c.arg("-o").arg("BatchMode=yes");
            c
        }
    };
    command
        .arg("-P")
        .arg(port.to_string())
        .arg(&source)
        .arg(dest);
    run_tool("ssh", command)
}

/// Passive-mode binary GET over FTP.
fn fetch_ftp(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
    remote_path: &str,
    dest: &Path,
) -> Result<(), SyncError> {
    let mut ftp =
        FtpStream::connect(format!("{host}:{port}")).map_err(|e| fetch_err("ftp", e))?;
    ftp.login(username, password).map_err(|e| fetch_err("ftp", e))?;
    ftp.transfer_type(FileType::Binary)
        .map_err(|e| fetch_err("ftp", e))?;
    let buffer = ftp
        .retr_as_buffer(remote_path)
        .map_err(|e| fetch_err("ftp", e))?;
    fs::write(dest, buffer.into_inner()).map_err(|e| fetch_err("ftp", e))?;
    let _ = ftp.quit();
    Ok(())
}

/// SMB client invocation: `smbclient //host/share -c "get remote local"`.
fn fetch_smb(
    host: &str,
    share: &str,
    remote_path: &str,
    username: &str,
    password: &str,
    dest: &Path,
) -> Result<(), SyncError> {
    let mut command = Command::new("smbclient");
    command
        .arg(format!("//{host}/{share}"))
        .arg("-U")
        .arg(format!("{username}%{password}"))
        .arg("-c")
        .arg(format!("get {remote_path} {}", dest.display()));
    run_tool("smb", command)
}

fn run_tool(method: &str, mut command: Command) -> Result<(), SyncError> {
    let output = command.output().map_err(|e| fetch_err(method, e))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(fetch_err(
            method,
            format!("exited with {}: {}", output.status, stderr.trim()),
        ));
    }
    Ok(())
}
