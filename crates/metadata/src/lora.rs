//! Lora sidecar (`<stem>.metadata.json`) and the catalog shapes embedded in it.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::lenient;

pub const SIDECAR_SUFFIX: &str = ".metadata.json";
/// Trigger words surfaced in listings.
pub const MAX_TRIGGER_WORDS: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoraSidecar {
    #[serde(deserialize_with = "lenient::string")]
    pub file_name: String,
    #[serde(deserialize_with = "lenient::string")]
    pub file_path: String,
    #[serde(deserialize_with = "lenient::string")]
    pub model_name: String,
    #[serde(deserialize_with = "lenient::string")]
    pub sha256: String,
    #[serde(deserialize_with = "lenient::number")]
    pub size: u64,
    #[serde(deserialize_with = "lenient::opt_string")]
    pub preview_url: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub notes: String,
    #[serde(deserialize_with = "lenient::flag")]
    pub from_civitai: bool,
    #[serde(
        deserialize_with = "lenient::opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub base_model: Option<String>,
    #[serde(
        deserialize_with = "lenient::object",
        skip_serializing_if = "Option::is_none"
    )]
    pub civitai: Option<CivitaiInfo>,
}

/// Model version as returned by the catalog's by-hash endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CivitaiInfo {
    #[serde(deserialize_with = "lenient::opt_number")]
    pub id: Option<u64>,
    #[serde(deserialize_with = "lenient::opt_number")]
    pub model_id: Option<u64>,
    #[serde(deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(deserialize_with = "lenient::word_list")]
    pub trained_words: Vec<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub description: String,
    #[serde(deserialize_with = "lenient::string")]
    pub base_model: String,
    #[serde(deserialize_with = "lenient::string")]
    pub created_at: String,
    #[serde(deserialize_with = "lenient::string")]
    pub status: String,
    #[serde(deserialize_with = "lenient::list")]
    pub images: Vec<CatalogImage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogImage {
    #[serde(deserialize_with = "lenient::string")]
    pub url: String,
    #[serde(deserialize_with = "lenient::dimension")]
    pub width: Option<u32>,
    #[serde(deserialize_with = "lenient::dimension")]
    pub height: Option<u32>,
    #[serde(deserialize_with = "lenient::object")]
    pub meta: Option<ImageMeta>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageMeta {
    #[serde(deserialize_with = "lenient::string")]
    pub prompt: String,
    #[serde(rename = "negativePrompt", deserialize_with = "lenient::string")]
    pub negative_prompt: String,
    #[serde(deserialize_with = "lenient::string")]
    pub steps: String,
    #[serde(deserialize_with = "lenient::string")]
    pub sampler: String,
    #[serde(rename = "cfgScale", deserialize_with = "lenient::string")]
    pub cfg_scale: String,
    #[serde(deserialize_with = "lenient::string")]
    pub seed: String,
    #[serde(rename = "Model", deserialize_with = "lenient::string")]
    pub model: String,
}

impl LoraSidecar {
    /// `models/loras/foo.safetensors` -> `models/loras/foo.metadata.json`.
    pub fn path_for(model_file: &Path) -> PathBuf {
        let stem = model_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        model_file.with_file_name(format!("{stem}{SIDECAR_SUFFIX}"))
    }

    pub fn read(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading lora sidecar {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing lora sidecar {}", path.display()))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing lora sidecar {}", path.display()))
    }

    /// Build a sidecar for `model_file` from a catalog model version.
    pub fn from_catalog(model_file: &Path, sha256: &str, size: u64, info: CivitaiInfo) -> Self {
        let stem = model_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let model_name = if info.name.is_empty() {
            stem.clone()
        } else {
            info.name.clone()
        };
        let preview_url = info
            .images
            .first()
            .map(|image| image.url.clone())
            .filter(|url| !url.is_empty());

        LoraSidecar {
            file_name: stem,
            file_path: model_file.display().to_string(),
            model_name,
            sha256: sha256.to_string(),
            size,
            preview_url,
            notes: info.description.clone(),
            from_civitai: true,
            base_model: None,
            civitai: Some(info),
        }
    }

    /// Display name: `model_name`, else `file_name`.
    pub fn display_name(&self) -> &str {
        if self.model_name.is_empty() {
            &self.file_name
        } else {
            &self.model_name
        }
    }

    pub fn base_model(&self) -> String {
        self.civitai
            .as_ref()
            .map(|c| c.base_model.clone())
            .filter(|b| !b.is_empty())
            .or_else(|| self.base_model.clone())
            .unwrap_or_default()
    }

    pub fn trigger_words(&self) -> Vec<String> {
        self.civitai
            .as_ref()
            .map(|c| c.trained_words.iter().take(MAX_TRIGGER_WORDS).cloned().collect())
            .unwrap_or_default()
    }

    pub fn images(&self) -> &[CatalogImage] {
        self.civitai
            .as_ref()
            .map(|c| c.images.as_slice())
            .unwrap_or_default()
    }
}
