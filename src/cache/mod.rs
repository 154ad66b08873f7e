//! TTL-based on-disk cache for API responses.
//!
//! Entries are JSON envelopes keyed by the SHA-256 of the cache key. Expiry
//! is lazy: a stale entry is deleted by the `get` that finds it, so no
//! background sweep is needed.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::CacheSettings;
use crate::errors::SyncError;

/// On-disk envelope format version. Bump when the layout changes; entries
/// with a different version are discarded as corrupt.
const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    /// Absolute expiry, epoch seconds.
    expires: i64,
    content: String,
}

/// File-backed result cache with a fixed TTL.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
    ttl_secs: u64,
    enabled: bool,
}

impl DiskCache {
    pub fn new(settings: &CacheSettings) -> Self {
        Self {
            dir: settings.dir.clone(),
            ttl_secs: settings.ttl_secs,
            enabled: settings.enabled,
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }

    /// Fetch a cached payload. Misses on: disabled cache, absent entry,
    /// unreadable or wrong-version envelope, or expiry. Stale and corrupt
    /// files are deleted on the way out.
    pub fn get(&self, key: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let path = self.entry_path(key);
        let raw = fs::read_to_string(&path).ok()?;

        let envelope = match decode_envelope(&path, &raw) {
            Ok(e) => e,
            Err(err) => {
                tracing::warn!(error = %err, "Discarding corrupt cache entry");
                remove_quietly(&path);
                return None;
            }
        };
        if envelope.expires <= Utc::now().timestamp() {
            remove_quietly(&path);
            return None;
        }
        Some(envelope.content)
    }

    /// Store a payload under `key`. A no-op when the cache is disabled.
    pub fn set(&self, key: &str, payload: &str) -> std::io::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        fs::create_dir_all(&self.dir)?;
        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            expires: Utc::now().timestamp() + self.ttl_secs as i64,
            content: payload.to_string(),
        };
        let body = serde_json::to_string(&envelope)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(self.entry_path(key), body)
    }

    /// Whether a backing file currently exists for `key`.
    pub fn has_entry(&self, key: &str) -> bool {
        self.entry_path(key).exists()
    }
}

/// Parse an on-disk envelope, rejecting unparseable bodies and foreign
/// versions as [`SyncError::CacheCorrupt`]. Callers degrade the error to a
/// cache miss after logging it.
fn decode_envelope(path: &Path, raw: &str) -> Result<Envelope, SyncError> {
    let envelope: Envelope = serde_json::from_str(raw)
        .map_err(|e| SyncError::CacheCorrupt(format!("{}: {e}", path.display())))?;
    if envelope.version != ENVELOPE_VERSION {
        return Err(SyncError::CacheCorrupt(format!(
            "{}: unknown envelope version {}",
            path.display(),
            envelope.version
        )));
    }
    Ok(envelope)
}

fn remove_quietly(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %err, "Failed to remove stale cache file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache_in(dir: &TempDir, ttl_secs: u64, enabled: bool) -> DiskCache {
        DiskCache::new(&CacheSettings {
            enabled,
            dir: dir.path().to_path_buf(),
            ttl_secs,
        })
    }

    #[test]
    fn set_then_get_before_expiry() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, 60, true);
        cache.set("issues?page=1", "[{\"id\": 1}]").unwrap();
        assert_eq!(cache.get("issues?page=1").as_deref(), Some("[{\"id\": 1}]"));
    }

    #[test]
    fn expired_entry_misses_and_is_deleted() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, 0, true);
        cache.set("issues", "payload").unwrap();
        assert!(cache.has_entry("issues"));

        assert!(cache.get("issues").is_none());
        assert!(!cache.has_entry("issues"));
    }

    #[test]
    fn corrupt_entry_misses_and_is_deleted() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, 60, true);
        cache.set("issues", "payload").unwrap();

        // Clobber the envelope on disk.
        let digest = Sha256::digest("issues".as_bytes());
        let path = dir.path().join(format!("{}.json", hex::encode(digest)));
        fs::write(&path, "not json").unwrap();

        assert!(cache.get("issues").is_none());
        assert!(!path.exists());
    }

    #[test]
    fn wrong_version_treated_as_miss() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, 60, true);
        let digest = Sha256::digest("issues".as_bytes());
        let path = dir.path().join(format!("{}.json", hex::encode(digest)));
        fs::create_dir_all(dir.path()).unwrap();
        fs::write(
            &path,
            "{\"version\": 99, \"expires\": 9999999999, \"content\": \"x\"}",
        )
        .unwrap();

        assert!(cache.get("issues").is_none());
    }

    #[test]
    fn bad_envelopes_classify_as_cache_corrupt() {
        let path = Path::new("entry.json");
        let err = decode_envelope(path, "not json").unwrap_err();
        assert!(matches!(err, SyncError::CacheCorrupt(_)));

        let err = decode_envelope(
            path,
            "{\"version\": 99, \"expires\": 9999999999, \"content\": \"x\"}",
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::CacheCorrupt(ref msg) if msg.contains("version 99")));
    }

    #[test]
    fn disabled_cache_never_hits() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, 60, false);
        cache.set("issues", "payload").unwrap();
        assert!(cache.get("issues").is_none());
        assert!(!cache.has_entry("issues"));
    }

    #[test]
    fn distinct_keys_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir, 60, true);
        cache.set("issues", "a").unwrap();
        cache.set("projects", "b").unwrap();
        assert_eq!(cache.get("issues").as_deref(), Some("a"));
        assert_eq!(cache.get("projects").as_deref(), Some("b"));
    }
}
