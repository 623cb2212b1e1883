//! File-based cache for LLM review responses.
//!
//! Entries are keyed by a SHA-256 fingerprint of `provider:model:diff`, so
//! no plaintext diff ever appears in a filename. Corrupted or expired
//! entries read as misses. Cache operations are best-effort — callers
//! degrade to an uncached review rather than failing the run.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct Entry {
    key: String,
    response: String,
    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,
    ttl: i64,
}

/// Cache statistics as reported by [`Cache::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub dir: PathBuf,
    pub entries: usize,
    #[serde(rename = "totalBytes")]
    pub total_bytes: u64,
    pub expired: usize,
}

pub struct Cache {
    dir: PathBuf,
    ttl_seconds: i64,
    enabled: bool,
}

impl Cache {
    /// Creates a cache rooted at `dir`, or at the platform default when
    /// `dir` is `None`. A disabled cache never touches the filesystem.
    pub fn new(enabled: bool, dir: Option<&Path>, ttl_seconds: i64) -> Result<Self> {
        if !enabled {
            return Ok(Self::disabled());
        }
        let dir = match dir {
            Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
            _ => default_cache_dir()?,
        };
        fs::create_dir_all(&dir)
            .map_err(|e| Error::Cache(format!("creating cache directory {}: {e}", dir.display())))?;
        Ok(Self {
            dir,
            ttl_seconds,
            enabled: true,
        })
    }

    /// A cache where every method is a successful no-op and `get` misses.
    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            ttl_seconds: 0,
            enabled: false,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Retrieves a cached response. Corrupt entries are misses; expired
    /// entries are deleted on read.
    pub fn get(&self, key: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let path = self.entry_path(key);
        let data = fs::read_to_string(&path).ok()?;
        let entry: Entry = serde_json::from_str(&data).ok()?;
        if self.ttl_seconds > 0 {
            let age = Utc::now().signed_duration_since(entry.created_at);
            if age.num_seconds() > self.ttl_seconds {
                let _ = fs::remove_file(&path);
                return None;
            }
        }
        Some(entry.response)
    }

    /// Stores a response. Writes go through a temp file and rename, so
    /// concurrent writers to the same key settle on last-writer-wins.
    pub fn put(&self, key: &str, response: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let entry = Entry {
            key: hash_key(key),
            response: response.to_string(),
            created_at: Utc::now(),
            ttl: self.ttl_seconds,
        };
        let data = serde_json::to_string(&entry)
            .map_err(|e| Error::Cache(format!("marshaling cache entry: {e}")))?;
        write_atomic(&self.entry_path(key), &data)
    }

    /// Removes all cache entries. Files without the entry extension are left
    /// alone.
    pub fn clear(&self) -> Result<()> {
        if !self.enabled || self.dir.as_os_str().is_empty() {
            return Ok(());
        }
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::Cache(format!("reading cache directory: {e}"))),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                let _ = fs::remove_file(&path);
            }
        }
        Ok(())
    }

    /// Returns entry count, total size, and how many entries have expired.
    pub fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats {
            dir: self.dir.clone(),
            ..Default::default()
        };
        if !self.enabled || self.dir.as_os_str().is_empty() {
            return Ok(stats);
        }
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stats),
            Err(e) => return Err(Error::Cache(format!("reading cache directory: {e}"))),
        };
        for dir_entry in entries.flatten() {
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(meta) = dir_entry.metadata() else {
                continue;
            };
            stats.entries += 1;
            stats.total_bytes += meta.len();

            let Ok(data) = fs::read_to_string(&path) else {
                continue;
            };
            let Ok(entry) = serde_json::from_str::<Entry>(&data) else {
                continue;
            };
            if self.ttl_seconds > 0 {
                let age = Utc::now().signed_duration_since(entry.created_at);
                if age.num_seconds() > self.ttl_seconds {
                    stats.expired += 1;
                }
            }
        }
        Ok(stats)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hash_key(key)))
    }
}

/// SHA-256 hex digest of the given key material.
pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// The cache key for a single-shot review request.
pub fn build_cache_key(provider: &str, model: &str, diff: &str) -> String {
    hash_key(&format!("{provider}:{model}:{diff}"))
}

fn default_cache_dir() -> Result<PathBuf> {
    dirs::cache_dir()
        .map(|d| d.join("prism"))
        .ok_or_else(|| Error::Cache("cannot determine user cache directory".to_string()))
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content).map_err(|e| Error::Cache(format!("writing cache entry: {e}")))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(Error::Cache(format!("writing cache entry: {e}")));
    }
    Ok(())
}
