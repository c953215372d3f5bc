//! Per-category reference cache, kept in memory and mirrored to disk.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{to_pretty_json, ReferenceRecord};

/// Records sampled into the fingerprint.
const HASH_SAMPLE: usize = 100;
/// Prompt characters per record included in the fingerprint.
const HASH_PROMPT_CHARS: usize = 50;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryCache {
    /// Scope key the cache was stored under.
    pub key: String,
    pub hash: String,
    pub data: Vec<ReferenceRecord>,
    pub total: usize,
    /// Image files present in the scanned scope when the cache was built.
    pub file_count: usize,
    pub categories: Vec<String>,
}

impl CategoryCache {
    pub fn new(data: Vec<ReferenceRecord>, file_count: usize, categories: Vec<String>) -> Self {
        Self {
            key: String::new(),
            hash: compute_hash(&data),
            total: data.len(),
            data,
            file_count,
            categories,
        }
    }
}

/// md5 over `file_name|category|prompt-prefix` of the first records.
pub fn compute_hash(records: &[ReferenceRecord]) -> String {
    if records.is_empty() {
        return String::new();
    }
    let sample = records
        .iter()
        .take(HASH_SAMPLE)
        .map(|r| {
            let prompt: String = r.prompt.chars().take(HASH_PROMPT_CHARS).collect();
            format!("{}|{}|{}", r.file_name, r.category, prompt)
        })
        .collect::<Vec<_>>()
        .join("|");
    format!("{:x}", md5::compute(sample.as_bytes()))
}

pub struct CacheManager {
    dir: PathBuf,
    memory: RwLock<HashMap<String, CategoryCache>>,
}

impl CacheManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            memory: RwLock::new(HashMap::new()),
        }
    }

    /// `references_<key>.json`, keeping only alphanumerics, `_` and `-`.
    /// Keys that lose characters get a digest suffix so they can't share a
    /// file with the key they sanitize to. The all-scope key `""` maps to
    /// `references_.json`.
    pub fn file_path(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        let name = if safe == key {
            format!("references_{safe}.json")
        } else {
            let digest = format!("{:x}", md5::compute(key.as_bytes()));
            format!("references_{safe}~{}.json", &digest[..8])
        };
        self.dir.join(name)
    }

    /// Memory first, then disk. A disk hit is promoted into memory.
    pub async fn get(&self, key: &str) -> Option<CategoryCache> {
        if let Some(hit) = self.memory.read().await.get(key) {
            return Some(hit.clone());
        }

        let path = self.file_path(key);
        let bytes = fs::read(&path).await.ok()?;
        match serde_json::from_slice::<CategoryCache>(&bytes) {
            Ok(cache) if cache.key != key => {
                warn!(
                    "Ignoring cache {} stored for {:?}, wanted {key:?}",
                    path.display(),
                    cache.key
                );
                None
            }
            Ok(cache) => {
                debug!("Loaded cache {} from disk", path.display());
                self.memory.write().await.insert(key.to_string(), cache.clone());
                Some(cache)
            }
            Err(err) => {
                warn!("Ignoring unreadable cache {}: {err}", path.display());
                None
            }
        }
    }

    /// Store in memory and on disk. Disk failures are logged only.
    pub async fn put(&self, key: &str, mut cache: CategoryCache) {
        cache.key = key.to_string();
        let path = self.file_path(key);
        match to_pretty_json(&cache) {
            Ok(json) => {
                if let Err(err) = fs::create_dir_all(&self.dir).await {
                    warn!("Failed to create cache dir {}: {err}", self.dir.display());
                } else if let Err(err) = fs::write(&path, json).await {
                    warn!("Failed to write cache {}: {err}", path.display());
                }
            }
            Err(err) => warn!("Failed to serialize cache for {key:?}: {err}"),
        }
        self.memory.write().await.insert(key.to_string(), cache);
    }
}
