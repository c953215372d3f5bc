//! Application-wide configuration helpers.
//!
//! Reads environment variables (with optional `.env`) and provides strongly
//! typed config structs consumed by other crates.

mod file_loader;

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

pub use file_loader::{load_file_config_into_env, parse_file_config, FileConfig};

pub const DEFAULT_API_ADDR: &str = "127.0.0.1:8765";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_REFERENCES_DIR: &str = "lora_prompts";
pub const DEFAULT_CACHE_DIR: &str = "cache";
pub const DEFAULT_LORA_DIR: &str = "models/loras";
pub const DEFAULT_CATALOG_URL: &str = "https://civitai.com/api/v1";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_addr: String,
    pub api_key: Option<String>,
    pub data_dir: PathBuf,
    /// User prompt list (JSON array).
    pub prompts_file: PathBuf,
    /// Seed prompt list used to refresh the user file.
    pub default_prompts_file: PathBuf,
    /// Root of the reference images, one subdirectory per category.
    pub references_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub lora_dir: PathBuf,
    pub catalog_url: String,
    pub catalog_timeout_secs: u64,
    pub download_timeout_secs: u64,
    /// Preview images fetched per Lora by the metadata job.
    pub max_preview_images: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let data_dir = PathBuf::from(
            var("PROMPTDECK_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
        );
        let prompts_file = var("PROMPTDECK_PROMPTS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("prompts.json"));
        let default_prompts_file = var("PROMPTDECK_DEFAULT_PROMPTS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("default_prompts.json"));

        Ok(Self {
            api_addr: var("PROMPTDECK_API_ADDR").unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            api_key: var("PROMPTDECK_API_KEY"),
            prompts_file,
            default_prompts_file,
            data_dir,
            references_dir: PathBuf::from(
                var("PROMPTDECK_REFERENCES_DIR")
                    .unwrap_or_else(|| DEFAULT_REFERENCES_DIR.to_string()),
            ),
            cache_dir: PathBuf::from(
                var("PROMPTDECK_CACHE_DIR").unwrap_or_else(|| DEFAULT_CACHE_DIR.to_string()),
            ),
            lora_dir: PathBuf::from(
                var("PROMPTDECK_LORA_DIR").unwrap_or_else(|| DEFAULT_LORA_DIR.to_string()),
            ),
            catalog_url: var("PROMPTDECK_CATALOG_URL")
                .unwrap_or_else(|| DEFAULT_CATALOG_URL.to_string()),
            catalog_timeout_secs: parse_u64(
                "PROMPTDECK_CATALOG_TIMEOUT_SECS",
                var("PROMPTDECK_CATALOG_TIMEOUT_SECS"),
                30,
            )?,
            download_timeout_secs: parse_u64(
                "PROMPTDECK_DOWNLOAD_TIMEOUT_SECS",
                var("PROMPTDECK_DOWNLOAD_TIMEOUT_SECS"),
                60,
            )?,
            max_preview_images: parse_u64(
                "PROMPTDECK_MAX_PREVIEW_IMAGES",
                var("PROMPTDECK_MAX_PREVIEW_IMAGES"),
                3,
            )? as usize,
        })
    }
}

fn parse_u64(key: &str, val: Option<String>, default: u64) -> Result<u64> {
    match val {
        Some(val) => val
            .parse::<u64>()
            .with_context(|| format!("Failed to parse {key} as u64")),
        None => Ok(default),
    }
}
