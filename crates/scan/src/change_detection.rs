//! Decides whether a cached category is still usable.
//!
//! Only the number of image files in scope is compared. Replacing a file with
//! another of the same name keeps the count and therefore keeps the cache.

use std::path::Path;

use promptdeck_storage::CategoryCache;
use tracing::trace;

use crate::scanner::{list_images, Scope};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDecision {
    Missing,
    Fresh,
    Stale { cached: usize, current: usize },
}

/// Count image files in scope without reading any of them.
pub fn count_images(root: &Path, scope: &Scope) -> usize {
    scope
        .directories(root)
        .iter()
        .map(|(dir, _)| list_images(dir).len())
        .sum()
}

pub fn evaluate(cache: Option<&CategoryCache>, current: usize) -> CacheDecision {
    let Some(cache) = cache else {
        return CacheDecision::Missing;
    };

    trace!(cached = cache.file_count, current, "cache file counts compared");

    if cache.file_count == current {
        CacheDecision::Fresh
    } else {
        CacheDecision::Stale {
            cached: cache.file_count,
            current,
        }
    }
}
