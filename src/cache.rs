use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::BuildError;

/// Cache directory below the project root.
pub const CACHE_DIR: &str = ".loom/cache";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Output path -> sha256 of the last content written there.
    pub hashes: BTreeMap<String, String>,
}

/// Content-hash write cache for one output target.
///
/// An artifact is written only when its content differs from what the cache
/// recorded for that path and the file on disk still exists.
pub struct OutputCache {
    cache_path: PathBuf,
    entry: CacheEntry,
}

impl OutputCache {
    pub fn open(cache_dir: &Path, target: &str) -> Self {
        let safe_name = target.replace(['/', '\\', ':'], "_");
        let cache_path = cache_dir.join(format!("{}.json", safe_name));

        let entry = match fs::read_to_string(&cache_path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(
                        "[LOOM] cache for {} is corrupt ({}); starting fresh",
                        target, e
                    );
                    fs::remove_file(&cache_path).ok();
                    CacheEntry::default()
                }
            },
            Err(_) => CacheEntry::default(),
        };
        Self { cache_path, entry }
    }

    pub fn compute_hash(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        format!("{:x}", hasher.finalize())
    }

    /// Writes `content` to `path` unless it is already there. Returns whether
    /// the file was written.
    pub fn write(&mut self, path: &Path, content: &[u8]) -> Result<bool, BuildError> {
        let key = path.to_string_lossy().to_string();
        let hash = Self::compute_hash(content);
        if path.is_file() && self.entry.hashes.get(&key) == Some(&hash) {
            debug!("[LOOM] unchanged {}", key);
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }
        fs::write(path, content).map_err(|e| BuildError::io(path, e))?;
        self.entry.hashes.insert(key, hash);
        Ok(true)
    }

    pub fn write_str(&mut self, path: &Path, content: &str) -> Result<bool, BuildError> {
        self.write(path, content.as_bytes())
    }

    pub fn save(&self) -> Result<(), BuildError> {
        if let Some(parent) = self.cache_path.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::io(parent, e))?;
        }
        let data = serde_json::to_string_pretty(&self.entry).map_err(|source| {
            BuildError::Serialize {
                what: "output cache".to_string(),
                source,
            }
        })?;
        fs::write(&self.cache_path, data).map_err(|e| BuildError::io(&self.cache_path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_unchanged_content_is_not_rewritten() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("dist/main.js");
        let mut cache = OutputCache::open(&dir.path().join(CACHE_DIR), "app");

        assert!(cache.write_str(&out, "a").unwrap());
        assert!(!cache.write_str(&out, "a").unwrap());
        assert!(cache.write_str(&out, "b").unwrap());

        fs::remove_file(&out).unwrap();
        assert!(cache.write_str(&out, "b").unwrap());
    }

    #[test]
    fn test_cache_survives_reopen() {
        let dir = tempdir().unwrap();
        let cache_dir = dir.path().join(CACHE_DIR);
        let out = dir.path().join("dist/lib.js");
        {
            let mut cache = OutputCache::open(&cache_dir, "ui/lib");
            cache.write_str(&out, "x").unwrap();
            cache.save().unwrap();
        }
        let mut cache = OutputCache::open(&cache_dir, "ui/lib");
        assert!(!cache.write_str(&out, "x").unwrap());
    }

    #[test]
    fn test_corrupt_cache_starts_fresh() {
        let dir = tempdir().unwrap();
        let cache_dir = dir.path().join(CACHE_DIR);
        fs::create_dir_all(&cache_dir).unwrap();
        fs::write(cache_dir.join("app.json"), "{ not json").unwrap();
        let cache = OutputCache::open(&cache_dir, "app");
        assert!(cache.entry.hashes.is_empty());
        assert!(!cache_dir.join("app.json").exists());
    }
}
