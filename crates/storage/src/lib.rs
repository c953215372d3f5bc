//! File-backed persistence: the prompt collection and the per-category
//! reference cache.
//!
//! Everything lives in plain JSON files; async access goes through tokio
//! locks so concurrent requests never interleave partial writes.

use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;

pub mod cache;
pub mod prompts;

pub use cache::{CacheManager, CategoryCache};
pub use prompts::{PromptEntry, PromptStore};

/// Category assigned to images directly under the references root.
pub const ROOT_CATEGORY: &str = "root";

/// One harvested reference image, as served to clients and stored in the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceRecord {
    pub file_name: String,
    pub category: String,
    pub lora_name: String,
    pub image_url: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: String,
    pub sampler: String,
    pub cfg_scale: String,
    pub seed: String,
    pub model: String,
}

/// Pretty JSON with four-space indentation and non-ASCII text kept verbatim.
pub(crate) fn to_pretty_json<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    Ok(out)
}
