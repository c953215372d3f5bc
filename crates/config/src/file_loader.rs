use std::{env, fs, path::Path};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Configuration loaded from `promptdeck-config.toml` (or `promptdeck.config.toml`).
/// All fields are optional; present values are copied into the matching
/// `PROMPTDECK_*` environment variables unless those are already set.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub catalog: CatalogSection,
}

#[derive(Debug, Default, Deserialize)]
pub struct PathsSection {
    pub data_dir: Option<String>,
    pub prompts_file: Option<String>,
    pub default_prompts_file: Option<String>,
    pub references_dir: Option<String>,
    pub cache_dir: Option<String>,
    pub lora_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiSection {
    pub addr: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CatalogSection {
    pub url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub download_timeout_secs: Option<u64>,
    pub max_preview_images: Option<usize>,
}

const CANDIDATES: &[&str] = &[
    "promptdeck-config.toml",
    "promptdeck.config.toml",
    "config/promptdeck-config.toml",
];

pub fn load_file_config_into_env() -> Result<()> {
    if let Some(cfg) = read_first_config()? {
        apply_to_env(cfg);
    }
    Ok(())
}

pub fn parse_file_config(contents: &str) -> Result<FileConfig> {
    toml::from_str(contents).context("Failed to parse promptdeck config file")
}

fn apply_to_env(cfg: FileConfig) {
    set_if_missing("PROMPTDECK_DATA_DIR", cfg.paths.data_dir);
    set_if_missing("PROMPTDECK_PROMPTS_FILE", cfg.paths.prompts_file);
    set_if_missing(
        "PROMPTDECK_DEFAULT_PROMPTS_FILE",
        cfg.paths.default_prompts_file,
    );
    set_if_missing("PROMPTDECK_REFERENCES_DIR", cfg.paths.references_dir);
    set_if_missing("PROMPTDECK_CACHE_DIR", cfg.paths.cache_dir);
    set_if_missing("PROMPTDECK_LORA_DIR", cfg.paths.lora_dir);

    set_if_missing("PROMPTDECK_API_ADDR", cfg.api.addr);
    set_if_missing("PROMPTDECK_API_KEY", cfg.api.key);

    set_if_missing("PROMPTDECK_CATALOG_URL", cfg.catalog.url);
    set_if_missing(
        "PROMPTDECK_CATALOG_TIMEOUT_SECS",
        cfg.catalog.timeout_secs.map(|v| v.to_string()),
    );
    set_if_missing(
        "PROMPTDECK_DOWNLOAD_TIMEOUT_SECS",
        cfg.catalog.download_timeout_secs.map(|v| v.to_string()),
    );
    set_if_missing(
        "PROMPTDECK_MAX_PREVIEW_IMAGES",
        cfg.catalog.max_preview_images.map(|v| v.to_string()),
    );
}

fn read_first_config() -> Result<Option<FileConfig>> {
    for candidate in CANDIDATES {
        let path = Path::new(candidate);
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            return parse_file_config(&contents).map(Some);
        }
    }
    Ok(None)
}

fn set_if_missing(key: &str, val: Option<String>) {
    if let Some(val) = val {
        let trimmed = val.trim();
        if trimmed.is_empty() {
            return;
        }
        if env::var(key).is_err() {
            env::set_var(key, trimmed);
        }
    }
}
