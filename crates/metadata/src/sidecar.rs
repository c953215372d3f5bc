//! `<stem>.json` written next to downloaded reference images.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::lenient;
use crate::GenerationParams;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSidecar {
    #[serde(deserialize_with = "lenient::string")]
    pub prompt: String,
    #[serde(deserialize_with = "lenient::string")]
    pub negative_prompt: String,
    #[serde(deserialize_with = "lenient::string")]
    pub steps: String,
    #[serde(deserialize_with = "lenient::string")]
    pub sampler: String,
    #[serde(deserialize_with = "lenient::string")]
    pub cfg_scale: String,
    #[serde(deserialize_with = "lenient::string")]
    pub seed: String,
    #[serde(deserialize_with = "lenient::dimension")]
    pub width: Option<u32>,
    #[serde(deserialize_with = "lenient::dimension")]
    pub height: Option<u32>,
    #[serde(deserialize_with = "lenient::string")]
    pub model: String,
    #[serde(deserialize_with = "lenient::string")]
    pub lora_name: String,
    #[serde(deserialize_with = "lenient::string")]
    pub lora_category: String,
    #[serde(deserialize_with = "lenient::string")]
    pub extracted_at: String,
}

impl ImageSidecar {
    pub fn path_for(image: &Path) -> PathBuf {
        image.with_extension("json")
    }

    pub fn read(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading sidecar {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing sidecar {}", path.display()))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing sidecar {}", path.display()))
    }

    pub fn params(&self) -> GenerationParams {
        GenerationParams {
            prompt: self.prompt.trim().to_string(),
            negative_prompt: self.negative_prompt.clone(),
            steps: self.steps.clone(),
            sampler: self.sampler.clone(),
            cfg_scale: self.cfg_scale.clone(),
            seed: self.seed.clone(),
            model: self.model.clone(),
            width: self.width,
            height: self.height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn numeric_fields_are_stringified() {
        let sidecar: ImageSidecar = serde_json::from_str(
            r#"{"prompt": "a cat", "steps": 20, "cfg_scale": 7.5, "seed": 123, "width": "512", "height": 768, "extra": true}"#,
        )
        .unwrap();
        assert_eq!(sidecar.steps, "20");
        assert_eq!(sidecar.cfg_scale, "7.5");
        assert_eq!(sidecar.seed, "123");
        assert_eq!(sidecar.width, Some(512));
        assert_eq!(sidecar.height, Some(768));
        assert!(sidecar.sampler.is_empty());
    }

    #[test]
    fn write_then_read() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("hero_0.png");
        let sidecar = ImageSidecar {
            prompt: "knight, 城堡".into(),
            lora_name: "hero".into(),
            width: Some(640),
            ..Default::default()
        };
        let path = ImageSidecar::path_for(&image);
        sidecar.write(&path).unwrap();

        assert_eq!(path.file_name().unwrap(), "hero_0.json");
        assert_eq!(ImageSidecar::read(&path).unwrap(), sidecar);
    }
}
