//! Local Lora inventory, annotated from `<stem>.metadata.json` sidecars.

use std::path::{Path, PathBuf};

use promptdeck_metadata::LoraSidecar;
use promptdeck_storage::ROOT_CATEGORY;
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

pub const MODEL_EXTENSIONS: &[&str] = &["safetensors", "pt", "ckpt", "bin"];
/// Preview suffixes tried in order after the stem.
const PREVIEW_SUFFIXES: &[&str] = &[
    ".preview.png",
    ".png",
    ".jpg",
    ".jpeg",
    ".webp",
    ".gif",
    ".mp4",
    ".webm",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoraDescriptor {
    pub name: String,
    pub filename: String,
    pub base_model: String,
    pub category: String,
    pub trigger_words: Vec<String>,
    pub preview_url: Option<String>,
    pub notes: String,
    pub file_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoraListing {
    pub categories: Vec<String>,
    pub loras: Vec<LoraDescriptor>,
}

pub fn is_model_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MODEL_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Every model file below `root`, recursively, in walk order.
pub fn model_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_model_file(e.path()))
        .map(|e| e.into_path())
        .collect()
}

/// Every `<stem>.metadata.json` below `root`, whether or not its model is present.
pub fn sidecar_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_type().is_file()
                && e.file_name()
                    .to_string_lossy()
                    .ends_with(promptdeck_metadata::lora::SIDECAR_SUFFIX)
        })
        .map(|e| e.into_path())
        .collect()
}

/// Parent directory relative to `root`, `/`-separated, `root` at the top.
pub fn category_of(root: &Path, file: &Path) -> String {
    let relative = file
        .parent()
        .and_then(|parent| parent.strip_prefix(root).ok())
        .map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default();
    if relative.is_empty() {
        ROOT_CATEGORY.to_string()
    } else {
        relative
    }
}

pub fn list_loras(root: &Path) -> LoraListing {
    let mut loras: Vec<LoraDescriptor> = model_files(root)
        .iter()
        .map(|path| describe(root, path))
        .collect();
    loras.sort_by(|a, b| {
        a.category
            .cmp(&b.category)
            .then_with(|| a.filename.cmp(&b.filename))
    });

    let mut categories: Vec<String> = loras.iter().map(|l| l.category.clone()).collect();
    categories.sort();
    categories.dedup();

    debug!("Listed {} loras in {} categories", loras.len(), categories.len());
    LoraListing { categories, loras }
}

fn describe(root: &Path, path: &Path) -> LoraDescriptor {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let sidecar_path = LoraSidecar::path_for(path);
    let sidecar = if sidecar_path.is_file() {
        match LoraSidecar::read(&sidecar_path) {
            Ok(sidecar) => Some(sidecar),
            Err(err) => {
                warn!("Ignoring sidecar for {}: {err:#}", path.display());
                None
            }
        }
    } else {
        None
    };

    let mut descriptor = LoraDescriptor {
        name: stem.clone(),
        category: category_of(root, path),
        preview_url: find_preview(path, &stem).map(|p| preview_url(&p)),
        file_path: path.display().to_string(),
        filename,
        ..Default::default()
    };

    if let Some(sidecar) = sidecar {
        if !sidecar.model_name.is_empty() {
            descriptor.name = sidecar.model_name.clone();
        }
        descriptor.base_model = sidecar.base_model();
        descriptor.trigger_words = sidecar.trigger_words();
        descriptor.notes = sidecar.notes;
    }

    descriptor
}

fn find_preview(model: &Path, stem: &str) -> Option<PathBuf> {
    PREVIEW_SUFFIXES
        .iter()
        .map(|suffix| model.with_file_name(format!("{stem}{suffix}")))
        .find(|candidate| candidate.is_file())
}

fn preview_url(path: &Path) -> String {
    format!(
        "/prompt_manage/lora/preview?path={}",
        urlencoding::encode(&path.to_string_lossy())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn lists_models_with_sidecars_and_previews() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("style/ink")).unwrap();

        fs::write(root.join("base.safetensors"), b"x").unwrap();
        fs::write(root.join("style/ink/brush.safetensors"), b"x").unwrap();
        fs::write(root.join("style/ink/brush.jpg"), b"x").unwrap();
        fs::write(root.join("style/ink/brush.preview.png"), b"x").unwrap();
        fs::write(root.join("style/ink/brush_preview1.jpg"), b"x").unwrap();
        fs::write(root.join("style/alpha.pt"), b"x").unwrap();
        fs::write(root.join("style/readme.txt"), b"x").unwrap();
        fs::write(
            root.join("style/ink/brush.metadata.json"),
            r#"{"model_name": "Ink Brush", "notes": "soft edges",
                "civitai": {"baseModel": "SDXL 1.0", "trainedWords": ["a","b","c","d","e","f"]}}"#,
        )
        .unwrap();

        let listing = list_loras(root);
        assert_eq!(listing.categories, vec!["root", "style", "style/ink"]);

        let names: Vec<&str> = listing.loras.iter().map(|l| l.filename.as_str()).collect();
        assert_eq!(names, vec!["base.safetensors", "alpha.pt", "brush.safetensors"]);

        let brush = &listing.loras[2];
        assert_eq!(brush.name, "Ink Brush");
        assert_eq!(brush.base_model, "SDXL 1.0");
        assert_eq!(brush.trigger_words.len(), 5);
        assert_eq!(brush.notes, "soft edges");
        let preview = brush.preview_url.as_deref().unwrap();
        assert!(preview.starts_with("/prompt_manage/lora/preview?path="));
        assert!(preview.ends_with("brush.preview.png"));

        let base = &listing.loras[0];
        assert_eq!(base.name, "base");
        assert_eq!(base.category, "root");
        assert!(base.preview_url.is_none());
    }

    #[test]
    fn broken_sidecar_is_treated_as_absent() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("m.ckpt"), b"x").unwrap();
        fs::write(dir.path().join("m.metadata.json"), "{broken").unwrap();

        let listing = list_loras(dir.path());
        assert_eq!(listing.loras.len(), 1);
        assert_eq!(listing.loras[0].name, "m");
    }

    #[test]
    fn finds_sidecars_recursively() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/b/x.metadata.json"), "{}").unwrap();
        fs::write(dir.path().join("a/y.json"), "{}").unwrap();
        let found = sidecar_files(dir.path());
        assert_eq!(found, vec![dir.path().join("a/b/x.metadata.json")]);
        assert_eq!(category_of(dir.path(), &found[0]), "a/b");
    }

    #[test]
    fn missing_root_lists_nothing() {
        let dir = TempDir::new().unwrap();
        let listing = list_loras(&dir.path().join("absent"));
        assert!(listing.loras.is_empty());
        assert!(listing.categories.is_empty());
    }
}
