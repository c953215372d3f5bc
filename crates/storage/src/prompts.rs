//! Prompt collection stored as one JSON array, optionally refreshed from a
//! seed file shipped alongside it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::to_pretty_json;

pub const DEFAULT_DIRECTION: &str = "无";
pub const DEFAULT_TYPE: &str = "其它";

/// A saved prompt, kept as the JSON object it was given. Known keys are
/// `name`, `direction`, `type`, `note` and `text`; nothing is coerced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptEntry(Map<String, Value>);

/// Keys filled on `add` when absent.
const DEFAULT_FIELDS: [(&str, &str); 5] = [
    ("name", ""),
    ("direction", DEFAULT_DIRECTION),
    ("type", DEFAULT_TYPE),
    ("note", ""),
    ("text", ""),
];

impl PromptEntry {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The `name` value when it is a string, `""` otherwise.
    pub fn name(&self) -> &str {
        self.0.get("name").and_then(Value::as_str).unwrap_or_default()
    }

    fn with_defaults(mut self) -> Self {
        for (key, value) in DEFAULT_FIELDS {
            self.0
                .entry(key)
                .or_insert_with(|| Value::String(value.to_string()));
        }
        self
    }

    /// Overwrite every key present in `patch`; everything else is kept.
    fn apply(&mut self, patch: PromptEntry) {
        self.0.extend(patch.0);
    }
}

impl From<Map<String, Value>> for PromptEntry {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

pub struct PromptStore {
    path: PathBuf,
    default_path: PathBuf,
    write_lock: Mutex<()>,
}

impl PromptStore {
    /// Open the store, creating an empty collection file when missing.
    pub async fn open(path: impl Into<PathBuf>, default_path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            path: path.into(),
            default_path: default_path.into(),
            write_lock: Mutex::new(()),
        };

        if fs::metadata(&store.path).await.is_err() {
            if let Some(parent) = store.path.parent() {
                fs::create_dir_all(parent).await?;
            }
            store.write(&[]).await?;
            info!("Created empty prompt file at {}", store.path.display());
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sync from the default file, then return the collection.
    pub async fn get(&self) -> Result<Vec<PromptEntry>> {
        let _guard = self.write_lock.lock().await;
        self.sync_defaults().await?;
        self.read().await
    }

    pub async fn save(&self, entries: Vec<PromptEntry>) -> Result<Vec<PromptEntry>> {
        let _guard = self.write_lock.lock().await;
        self.write(&entries).await?;
        Ok(entries)
    }

    pub async fn add(&self, entry: PromptEntry) -> Result<Vec<PromptEntry>> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read().await?;
        entries.push(entry.with_defaults());
        self.write(&entries).await?;
        Ok(entries)
    }

    /// Out-of-range indices (including negative ones) leave the file untouched.
    pub async fn update(&self, index: i64, patch: PromptEntry) -> Result<Vec<PromptEntry>> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read().await?;
        match checked_index(index, entries.len()) {
            Some(i) => {
                entries[i].apply(patch);
                self.write(&entries).await?;
            }
            None => debug!("update ignored, index {index} out of range"),
        }
        Ok(entries)
    }

    pub async fn delete(&self, index: i64) -> Result<Vec<PromptEntry>> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read().await?;
        match checked_index(index, entries.len()) {
            Some(i) => {
                entries.remove(i);
                self.write(&entries).await?;
            }
            None => debug!("delete ignored, index {index} out of range"),
        }
        Ok(entries)
    }

    /// Replace the user file with the default file when every user entry
    /// name also appears in the defaults.
    async fn sync_defaults(&self) -> Result<()> {
        let default_bytes = match fs::read(&self.default_path).await {
            Ok(bytes) => bytes,
            Err(_) => return Ok(()),
        };
        let defaults: Vec<PromptEntry> = match serde_json::from_slice(&default_bytes) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("Ignoring unreadable default prompts {}: {err}", self.default_path.display());
                return Ok(());
            }
        };

        let current = self.read().await?;
        let default_names: HashSet<&str> = defaults.iter().map(PromptEntry::name).collect();
        if current.iter().all(|entry| default_names.contains(entry.name())) {
            fs::write(&self.path, &default_bytes)
                .await
                .with_context(|| format!("writing {}", self.path.display()))?;
            debug!("Prompt file refreshed from {}", self.default_path.display());
        }
        Ok(())
    }

    async fn read(&self) -> Result<Vec<PromptEntry>> {
        let bytes = fs::read(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", self.path.display()))
    }

    async fn write(&self, entries: &[PromptEntry]) -> Result<()> {
        let json = to_pretty_json(&entries)?;
        fs::write(&self.path, json)
            .await
            .with_context(|| format!("writing {}", self.path.display()))
    }
}

fn checked_index(index: i64, len: usize) -> Option<usize> {
    usize::try_from(index).ok().filter(|i| *i < len)
}
