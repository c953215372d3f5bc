//! Bulk download jobs: Lora metadata from the catalog, and reference images
//! listed in existing sidecars.
//!
//! One job runs at a time. Cancellation is checked between items, so the
//! item in flight always completes and finished files are kept.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use promptdeck_metadata::lora::SIDECAR_SUFFIX;
use promptdeck_metadata::{CivitaiInfo, ImageSidecar, LoraSidecar};
use promptdeck_scan::loras;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::client::ModelCatalog;

/// Failure identifiers kept in a summary.
pub const MAX_FAILED_ITEMS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Images,
    Metadata,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Images => f.write_str("images"),
            JobKind::Metadata => f.write_str("metadata"),
        }
    }
}

impl FromStr for JobKind {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "images" => Ok(JobKind::Images),
            "metadata" => Ok(JobKind::Metadata),
            other => Err(JobError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum JobError {
    #[error("a {0} job is already running")]
    AlreadyRunning(JobKind),
    #[error("unknown job kind {0:?}, expected images or metadata")]
    UnknownKind(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failed_items: Vec<String>,
}

impl BatchSummary {
    fn record_failure(&mut self, item: String) {
        self.failed += 1;
        if self.failed_items.len() < MAX_FAILED_ITEMS {
            self.failed_items.push(item);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub running: bool,
    pub kind: Option<JobKind>,
    pub progress: usize,
    pub total: usize,
    pub cancelled: bool,
    pub last_summary: Option<BatchSummary>,
}

#[derive(Debug, Clone)]
pub struct JobSettings {
    pub lora_dir: PathBuf,
    pub references_dir: PathBuf,
    pub max_preview_images: usize,
}

#[derive(Clone)]
pub struct DownloadJobs {
    inner: Arc<Shared>,
}

struct Shared {
    catalog: Arc<dyn ModelCatalog>,
    settings: JobSettings,
    status: Mutex<JobStatus>,
    cancel: AtomicBool,
}

impl DownloadJobs {
    pub fn new(catalog: Arc<dyn ModelCatalog>, settings: JobSettings) -> Self {
        Self {
            inner: Arc::new(Shared {
                catalog,
                settings,
                status: Mutex::new(JobStatus::default()),
                cancel: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn a job unless one is already running.
    pub fn start(&self, kind: JobKind) -> Result<JoinHandle<()>, JobError> {
        {
            let mut status = self.inner.lock_status();
            if status.running {
                return Err(JobError::AlreadyRunning(status.kind.unwrap_or(kind)));
            }
            *status = JobStatus {
                running: true,
                kind: Some(kind),
                last_summary: status.last_summary.take(),
                ..Default::default()
            };
            self.inner.cancel.store(false, Ordering::SeqCst);
        }

        let shared = self.inner.clone();
        Ok(tokio::spawn(async move {
            info!("{kind} download job starting");
            let summary = match kind {
                JobKind::Metadata => shared.run_metadata().await,
                JobKind::Images => shared.run_images().await,
            };

            let mut status = shared.lock_status();
            status.running = false;
            status.cancelled = shared.cancel.load(Ordering::SeqCst);
            info!(
                success = summary.success,
                failed = summary.failed,
                skipped = summary.skipped,
                cancelled = status.cancelled,
                "{kind} download job finished"
            );
            status.last_summary = Some(summary);
        }))
    }

    pub fn status(&self) -> JobStatus {
        self.inner.lock_status().clone()
    }

    /// Ask the running job to stop. Returns `false` when nothing is running.
    pub fn cancel(&self) -> bool {
        let running = self.inner.lock_status().running;
        if running {
            self.inner.cancel.store(true, Ordering::SeqCst);
            info!("download job cancellation requested");
        }
        running
    }

    pub fn catalog(&self) -> &Arc<dyn ModelCatalog> {
        &self.inner.catalog
    }
}

impl Shared {
    fn lock_status(&self) -> MutexGuard<'_, JobStatus> {
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn set_total(&self, total: usize) {
        self.lock_status().total = total;
    }

    fn advance(&self) {
        self.lock_status().progress += 1;
    }

    async fn run_metadata(&self) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let root = self.settings.lora_dir.clone();
        let listed = tokio::task::spawn_blocking(move || {
            loras::model_files(&root)
                .into_iter()
                .filter(|path| !LoraSidecar::path_for(path).exists())
                .collect::<Vec<_>>()
        })
        .await;
        let Some(files) = joined(listed, &self.settings.lora_dir, &mut summary) else {
            return summary;
        };

        self.set_total(files.len());
        info!("{} lora files without metadata", files.len());

        for file in files {
            if self.cancelled() {
                break;
            }
            match self.fetch_metadata(&file).await {
                Ok(previews) => {
                    summary.success += 1;
                    debug!("metadata saved for {} ({previews} previews)", file.display());
                }
                Err(err) => {
                    warn!("metadata failed for {}: {err:#}", file.display());
                    summary.record_failure(file.display().to_string());
                }
            }
            self.advance();
        }

        summary
    }

    /// Hash, look up, write the sidecar, then fetch previews. Returns previews saved.
    async fn fetch_metadata(&self, file: &Path) -> Result<usize> {
        let owned = file.to_path_buf();
        let (sha256, size) = tokio::task::spawn_blocking(move || hash_file(&owned)).await??;

        let version = self
            .catalog
            .model_version_by_hash(&sha256)
            .await
            .with_context(|| format!("catalog lookup for {sha256}"))?;
        let info: CivitaiInfo = serde_json::from_value(version)?;

        let sidecar = LoraSidecar::from_catalog(file, &sha256, size, info);
        let sidecar_path = LoraSidecar::path_for(file);
        let sidecar =
            tokio::task::spawn_blocking(move || sidecar.write(&sidecar_path).map(|()| sidecar))
                .await??;

        let mut saved = 0;
        for (index, image) in sidecar
            .images()
            .iter()
            .filter(|image| !image.url.is_empty())
            .take(self.settings.max_preview_images)
            .enumerate()
        {
            let target = preview_path(file, index, &image.url);
            match self.download(&image.url, &target).await {
                Ok(()) => saved += 1,
                Err(err) => warn!("preview {} failed: {err:#}", image.url),
            }
        }
        Ok(saved)
    }

    async fn run_images(&self) -> BatchSummary {
        let lora_root = self.settings.lora_dir.clone();
        let references = self.settings.references_dir.clone();
        let planned =
            tokio::task::spawn_blocking(move || plan_image_downloads(&lora_root, &references))
                .await;
        let mut aborted = BatchSummary::default();
        let Some((items, mut summary)) = joined(planned, &self.settings.lora_dir, &mut aborted)
        else {
            return aborted;
        };

        self.set_total(items.len());
        info!("{} reference images to download", items.len());

        for item in items {
            if self.cancelled() {
                break;
            }
            match self.download_reference(&item).await {
                Ok(()) => summary.success += 1,
                Err(err) => {
                    warn!("download {} failed: {err:#}", item.url);
                    summary.record_failure(item.url.clone());
                }
            }
            self.advance();
        }

        summary
    }

    async fn download_reference(&self, item: &ImageDownload) -> Result<()> {
        if let Some(parent) = item.target.parent() {
            fs::create_dir_all(parent).await?;
        }
        self.download(&item.url, &item.target).await?;

        let sidecar = ImageSidecar {
            extracted_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            ..item.sidecar.clone()
        };
        let path = ImageSidecar::path_for(&item.target);
        tokio::task::spawn_blocking(move || sidecar.write(&path)).await??;
        Ok(())
    }

    async fn download(&self, url: &str, target: &Path) -> Result<()> {
        let bytes = self.catalog.fetch_bytes(url).await?;
        if bytes.is_empty() {
            return Err(anyhow!("empty response body"));
        }
        fs::write(target, bytes)
            .await
            .with_context(|| format!("writing {}", target.display()))
    }
}

/// Result of a blocking directory pass. A panicked pass counts as one
/// failed item named after the directory, and the job ends there.
fn joined<T>(result: Result<T, JoinError>, dir: &Path, summary: &mut BatchSummary) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            error!("scanning {} aborted: {err}", dir.display());
            summary.record_failure(dir.display().to_string());
            None
        }
    }
}

#[derive(Debug, Clone)]
struct ImageDownload {
    url: String,
    target: PathBuf,
    sidecar: ImageSidecar,
}

/// Walk every Lora sidecar and list catalog images worth downloading.
fn plan_image_downloads(lora_root: &Path, references: &Path) -> (Vec<ImageDownload>, BatchSummary) {
    let mut items = Vec::new();
    let mut summary = BatchSummary::default();

    for sidecar_path in loras::sidecar_files(lora_root) {
        let sidecar = match LoraSidecar::read(&sidecar_path) {
            Ok(sidecar) => sidecar,
            Err(err) => {
                warn!("skipping {}: {err:#}", sidecar_path.display());
                continue;
            }
        };

        let category = loras::category_of(lora_root, &sidecar_path);
        let lora_name = sidecar.display_name().to_string();
        let mut safe_name = safe_file_name(&lora_name);
        if safe_name.is_empty() {
            let file_name = sidecar_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            safe_name = file_name.trim_end_matches(SIDECAR_SUFFIX).to_string();
        }

        for (index, image) in sidecar.images().iter().enumerate() {
            let Some(meta) = image.meta.as_ref() else {
                continue;
            };
            if meta.prompt.trim().is_empty() || image.url.is_empty() {
                summary.skipped += 1;
                continue;
            }

            let target = references
                .join(&category)
                .join(format!("{safe_name}_{index}.{}", guess_extension(&image.url)));
            if target.exists() {
                summary.skipped += 1;
                continue;
            }

            items.push(ImageDownload {
                url: image.url.clone(),
                target,
                sidecar: ImageSidecar {
                    prompt: meta.prompt.clone(),
                    negative_prompt: meta.negative_prompt.clone(),
                    steps: meta.steps.clone(),
                    sampler: meta.sampler.clone(),
                    cfg_scale: meta.cfg_scale.clone(),
                    seed: meta.seed.clone(),
                    width: image.width,
                    height: image.height,
                    model: meta.model.clone(),
                    lora_name: lora_name.clone(),
                    lora_category: category.clone(),
                    extracted_at: String::new(),
                },
            });
        }
    }

    (items, summary)
}

fn hash_file(path: &Path) -> Result<(String, u64)> {
    let mut file =
        std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
        size += read as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}

/// `<stem>.<ext>` for the first preview, `<stem>_preview<i>.<ext>` after that.
fn preview_path(model: &Path, index: usize, url: &str) -> PathBuf {
    let stem = model
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = guess_extension(url);
    let name = if index == 0 {
        format!("{stem}.{ext}")
    } else {
        format!("{stem}_preview{index}.{ext}")
    };
    model.with_file_name(name)
}

fn guess_extension(url: &str) -> &'static str {
    let lower = url.to_ascii_lowercase();
    if lower.contains("jpg") || lower.contains("jpeg") {
        "jpg"
    } else if lower.contains("png") {
        "png"
    } else if lower.contains("gif") {
        "gif"
    } else if lower.contains("webp") {
        "webp"
    } else {
        "jpg"
    }
}

fn safe_file_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect::<String>()
        .trim()
        .to_string()
}
