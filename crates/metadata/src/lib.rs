//! Generation metadata harvested from reference images.
//!
//! [`extract`] tries, in order: a JSON sidecar next to the image, a UI
//! workflow graph, an API prompt graph, then the legacy flat parameter
//! string. Anything still missing is filled from flat text keys and the
//! image header.

use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

mod exif_text;
pub mod lenient;
pub mod lora;
mod parameters;
mod png_text;
mod sidecar;
mod workflow;

pub use lora::{CatalogImage, CivitaiInfo, ImageMeta, LoraSidecar};
pub use sidecar::ImageSidecar;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub steps: String,
    pub sampler: String,
    pub cfg_scale: String,
    pub seed: String,
    pub model: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Extract generation parameters for one image.
///
/// `Ok(None)` means the file was readable but carried no prompt.
pub fn extract(path: &Path) -> Result<Option<GenerationParams>> {
    let sidecar_path = ImageSidecar::path_for(path);
    if sidecar_path.is_file() {
        match ImageSidecar::read(&sidecar_path) {
            Ok(sidecar) => {
                let params = sidecar.params();
                return Ok((!params.prompt.is_empty()).then_some(params));
            }
            Err(err) => debug!("ignoring sidecar {}: {err:#}", sidecar_path.display()),
        }
    }

    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let text = embedded_text(&bytes);
    let mut params = params_from_text(&text);

    if params.prompt.trim().is_empty() {
        return Ok(None);
    }
    params.prompt = params.prompt.trim().to_string();

    if params.width.is_none() || params.height.is_none() {
        match image_dimensions(&bytes) {
            Ok((width, height)) => {
                params.width = params.width.or(Some(width));
                params.height = params.height.or(Some(height));
            }
            Err(err) => debug!("no dimensions for {}: {err:#}", path.display()),
        }
    }

    Ok(Some(params))
}

/// Text key/value pairs embedded in the file header.
pub fn embedded_text(bytes: &[u8]) -> HashMap<String, String> {
    if png_text::is_png(bytes) {
        png_text::text_chunks(bytes)
    } else {
        exif_text::text_fields(bytes)
    }
}

/// Resolve parameters from embedded text keys.
pub fn params_from_text(text: &HashMap<String, String>) -> GenerationParams {
    let prompt_key = text.get("prompt");

    let mut params = text
        .get("workflow")
        .and_then(|raw| workflow::parse_ui_workflow(raw))
        .filter(|p| !p.prompt.is_empty())
        .or_else(|| {
            prompt_key
                .and_then(|raw| workflow::parse_api_prompt(raw))
                .filter(|p| !p.prompt.is_empty())
        })
        .or_else(|| text.get("parameters").map(|raw| parameters::parse(raw)))
        .or_else(|| {
            prompt_key
                .filter(|raw| !raw.trim_start().starts_with('{'))
                .map(|raw| parameters::parse(raw))
        })
        .unwrap_or_default();

    fill_from_flat_keys(&mut params, text);
    params
}

/// Keys written one-per-chunk by the reference downloader.
fn fill_from_flat_keys(params: &mut GenerationParams, text: &HashMap<String, String>) {
    let fields: [(&str, &mut String); 6] = [
        ("negative_prompt", &mut params.negative_prompt),
        ("steps", &mut params.steps),
        ("sampler", &mut params.sampler),
        ("cfg_scale", &mut params.cfg_scale),
        ("seed", &mut params.seed),
        ("model", &mut params.model),
    ];
    for (key, field) in fields {
        if field.is_empty() {
            if let Some(value) = text.get(key) {
                *field = value.trim().to_string();
            }
        }
    }

    if params.width.is_none() {
        params.width = text.get("width").and_then(|v| v.trim().parse().ok()).filter(|v| *v > 0);
    }
    if params.height.is_none() {
        params.height = text.get("height").and_then(|v| v.trim().parse().ok()).filter(|v| *v > 0);
    }
}

fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
    let reader = image::io::Reader::new(Cursor::new(bytes)).with_guessed_format()?;
    Ok(reader.into_dimensions()?)
}
