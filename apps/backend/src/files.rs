//! Serving files from a fixed root without letting requests escape it.

use std::path::{Component, Path, PathBuf};

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use tracing::{debug, warn};

use crate::error::AppError;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];
pub const PREVIEW_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "mp4", "webm"];

/// Resolve `raw` under `root`. Relative paths are taken relative to the root.
///
/// Escapes, lexical or through symlinks, are `Forbidden`; missing files are
/// `NotFound`; extensions outside `allowed` are `Forbidden`.
pub fn resolve(root: &Path, raw: Option<&str>, allowed: &[&str]) -> Result<PathBuf, AppError> {
    let raw = raw
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing path parameter".into()))?;

    let absolute_root = normalize(&absolutize(root)?);
    let canonical_root = root.canonicalize().ok();

    let requested = Path::new(raw);
    let candidate = if requested.is_absolute() {
        normalize(requested)
    } else {
        normalize(&absolute_root.join(requested))
    };

    let inside = |path: &Path| {
        path.starts_with(&absolute_root)
            || canonical_root.as_deref().is_some_and(|r| path.starts_with(r))
    };

    if !inside(&candidate) {
        warn!("Rejected path outside root: {raw}");
        return Err(AppError::Forbidden("Access denied".into()));
    }

    let resolved = candidate
        .canonicalize()
        .map_err(|_| AppError::NotFound("File not found".into()))?;
    if !canonical_root.as_deref().is_some_and(|r| resolved.starts_with(r)) {
        warn!("Rejected symlink escape: {raw}");
        return Err(AppError::Forbidden("Access denied".into()));
    }
    if !resolved.is_file() {
        return Err(AppError::NotFound("File not found".into()));
    }

    let ext = extension(&resolved);
    if !allowed.contains(&ext.as_str()) {
        return Err(AppError::Forbidden(format!("File type not allowed: {ext}")));
    }

    Ok(resolved)
}

/// Read a resolved file into a response with an extension-derived content type.
pub async fn serve(path: &Path) -> Result<Response, AppError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|_| AppError::NotFound("File not found".into()))?;
    debug!("Serving {} ({} bytes)", path.display(), bytes.len());

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type(&extension(path)))
        .header(header::CONTENT_LENGTH, bytes.len())
        .body(Body::from(bytes))
        .map_err(|e| AppError::Internal(e.into()))
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

pub fn content_type(ext: &str) -> &'static str {
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

fn absolutize(path: &Path) -> Result<PathBuf, AppError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| AppError::Internal(e.into()))?;
    Ok(cwd.join(path))
}

/// Collapse `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
