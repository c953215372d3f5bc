//! Category scanner: turns a directory of reference images into records.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use promptdeck_metadata::GenerationParams;
use promptdeck_storage::{ReferenceRecord, ROOT_CATEGORY};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// Which part of the references tree a request covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// Top-level images plus every immediate subdirectory.
    All,
    /// Top-level images only.
    Root,
    Category(String),
}

impl Scope {
    pub fn parse(category: Option<&str>) -> Self {
        match category.map(str::trim) {
            None | Some("") => Scope::All,
            Some(ROOT_CATEGORY) => Scope::Root,
            Some(name) => Scope::Category(name.to_string()),
        }
    }

    /// Key under which this scope's cache is stored.
    pub fn cache_key(&self) -> &str {
        match self {
            Scope::All => "",
            Scope::Root => ROOT_CATEGORY,
            Scope::Category(name) => name,
        }
    }

    /// Directories to list, each with the category its files belong to.
    /// Unsafe category names resolve to nothing.
    pub fn directories(&self, root: &Path) -> Vec<(PathBuf, String)> {
        match self {
            Scope::Root => vec![(root.to_path_buf(), ROOT_CATEGORY.to_string())],
            Scope::Category(name) if is_safe_category(name) => {
                vec![(root.join(name), name.clone())]
            }
            Scope::Category(_) => Vec::new(),
            Scope::All => {
                let mut dirs = vec![(root.to_path_buf(), ROOT_CATEGORY.to_string())];
                dirs.extend(
                    subdirectories(root)
                        .into_iter()
                        .map(|name| (root.join(&name), name)),
                );
                dirs
            }
        }
    }
}

fn is_safe_category(name: &str) -> bool {
    !name.contains("..") && !name.contains('/') && !name.contains('\\')
}

/// Sorted names of the immediate subdirectories of `root`.
pub fn subdirectories(root: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Image files directly inside `dir`, sorted by name. Missing dirs are empty.
pub fn list_images(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_image(e.path()))
        .map(|e| e.into_path())
        .collect()
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub records: Vec<ReferenceRecord>,
    /// Image files seen, with or without a usable prompt.
    pub file_count: usize,
    pub categories: Vec<String>,
}

/// Extract every image in scope. Files that fail or carry no prompt are skipped.
pub fn scan(root: &Path, scope: &Scope) -> ScanOutcome {
    let started = Instant::now();
    let mut outcome = ScanOutcome::default();

    for (dir, category) in scope.directories(root) {
        let images = list_images(&dir);
        outcome.file_count += images.len();
        let before = outcome.records.len();

        for path in images {
            match promptdeck_metadata::extract(&path) {
                Ok(Some(params)) => outcome.records.push(record_for(&path, &category, params)),
                Ok(None) => debug!("no prompt in {}", path.display()),
                Err(err) => warn!("Skipping {}: {err:#}", path.display()),
            }
        }

        if outcome.records.len() > before {
            outcome.categories.push(category);
        }
    }

    outcome.categories.sort();
    outcome.categories.dedup();

    info!(
        "Scanned {:?}: {} records from {} files in {:?}",
        scope.cache_key(),
        outcome.records.len(),
        outcome.file_count,
        started.elapsed()
    );
    outcome
}

pub fn record_for(path: &Path, category: &str, params: GenerationParams) -> ReferenceRecord {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    ReferenceRecord {
        lora_name: lora_name(&file_name),
        image_url: image_url(path),
        file_name,
        category: category.to_string(),
        prompt: params.prompt,
        negative_prompt: params.negative_prompt,
        width: params.width.unwrap_or(0),
        height: params.height.unwrap_or(0),
        steps: params.steps,
        sampler: params.sampler,
        cfg_scale: params.cfg_scale,
        seed: params.seed,
        model: params.model,
    }
}

/// `hero_3.png` -> `hero`; names without `_` lose only the extension.
pub fn lora_name(file_name: &str) -> String {
    match file_name.rsplit_once('_') {
        Some((base, _)) => base.to_string(),
        None => Path::new(file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

fn image_url(path: &Path) -> String {
    let absolute = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    format!(
        "/api/image?path={}",
        urlencoding::encode(&absolute.to_string_lossy())
    )
}
