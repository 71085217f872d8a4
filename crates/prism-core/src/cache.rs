use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::FileRecord;

/// Cache entry for a single file's extraction result, before resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedFile {
    pub hash: String,
    pub record: FileRecord,
}

/// Extraction cache stored in `<cache_dir>/cache.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisCache {
    /// Records from another prism version are not reused.
    pub version: String,
    pub files: BTreeMap<String, CachedFile>,
}

const CACHE_FILE: &str = "cache.json";

impl Default for AnalysisCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisCache {
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            files: BTreeMap::new(),
        }
    }

    fn cache_path(project_root: &Path, cache_dir: &str) -> PathBuf {
        project_root.join(cache_dir).join(CACHE_FILE)
    }

    /// Load the cache, or an empty one if none exists or it belongs to another version.
    pub fn load(project_root: &Path, cache_dir: &str) -> Result<Self> {
        let cache_path = Self::cache_path(project_root, cache_dir);
        if !cache_path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(&cache_path).context("failed to read analysis cache")?;
        let cache: Self = serde_json::from_str(&content).context("failed to parse analysis cache")?;
        if cache.version != env!("CARGO_PKG_VERSION") {
            return Ok(Self::new());
        }
        Ok(cache)
    }

    pub fn save(&self, project_root: &Path, cache_dir: &str) -> Result<()> {
        let dir = project_root.join(cache_dir);
        std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
        let content = serde_json::to_string(self).context("failed to serialize analysis cache")?;
        std::fs::write(Self::cache_path(project_root, cache_dir), content)
            .context("failed to write analysis cache")?;
        Ok(())
    }

    /// Get the cached record for a file if its content is unchanged.
    pub fn get(&self, rel_path: &str, content: &str) -> Option<&FileRecord> {
        let cached = self.files.get(rel_path)?;
        (cached.hash == compute_hash(content)).then_some(&cached.record)
    }

    pub fn insert(&mut self, rel_path: String, content: &str, record: FileRecord) {
        self.files.insert(
            rel_path,
            CachedFile {
                hash: compute_hash(content),
                record,
            },
        );
    }

    /// Remove entries for files that no longer exist.
    pub fn prune(&mut self, existing_files: &[String]) {
        let existing: HashSet<&str> = existing_files.iter().map(String::as_str).collect();
        self.files.retain(|path, _| existing.contains(path.as_str()));
    }
}

/// Compute SHA-256 hash of file content.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Language;

    #[test]
    fn test_compute_hash_deterministic() {
        assert_eq!(compute_hash("hello world"), compute_hash("hello world"));
        assert_ne!(compute_hash("hello"), compute_hash("world"));
    }

    #[test]
    fn test_get_detects_changed_content() {
        let mut cache = AnalysisCache::new();
        cache.insert(
            "a.py".to_string(),
            "x = 1",
            FileRecord::empty("a.py", Language::Python),
        );
        assert!(cache.get("a.py", "x = 1").is_some());
        assert!(cache.get("a.py", "x = 2").is_none());
        assert!(cache.get("b.py", "x = 1").is_none());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = AnalysisCache::new();
        cache.insert(
            "src/a.py".to_string(),
            "pass",
            FileRecord::empty("src/a.py", Language::Python),
        );
        cache.save(dir.path(), ".prism-cache").unwrap();

        let loaded = AnalysisCache::load(dir.path(), ".prism-cache").unwrap();
        assert_eq!(loaded.files.len(), 1);
        assert_eq!(loaded.get("src/a.py", "pass").map(|r| r.path.as_str()), Some("src/a.py"));
    }

    #[test]
    fn test_prune() {
        let mut cache = AnalysisCache::new();
        for path in ["a.py", "b.py"] {
            cache.insert(path.to_string(), "", FileRecord::empty(path, Language::Python));
        }
        cache.prune(&["a.py".to_string()]);
        assert_eq!(cache.files.keys().collect::<Vec<_>>(), vec!["a.py"]);
    }
}
