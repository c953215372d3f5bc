//! Reference image library: scanning, cache validation, search and paging.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use promptdeck_storage::{CacheManager, CategoryCache, ROOT_CATEGORY};
use tracing::{debug, info};

pub mod change_detection;
pub mod filter;
pub mod loras;
pub mod scanner;

pub use change_detection::CacheDecision;
pub use filter::{ReferencePage, ReferenceQuery, SearchFilter};
pub use loras::{LoraDescriptor, LoraListing};
pub use scanner::Scope;

/// Reference images under one root directory, cached per scope.
pub struct ReferenceLibrary {
    root: PathBuf,
    cache: Arc<CacheManager>,
}

impl ReferenceLibrary {
    pub fn new(root: impl Into<PathBuf>, cache: Arc<CacheManager>) -> Self {
        Self {
            root: root.into(),
            cache,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Subdirectory names plus `root`, sorted.
    pub fn categories(&self) -> Vec<String> {
        if !self.root.is_dir() {
            return Vec::new();
        }
        let mut categories = scanner::subdirectories(&self.root);
        categories.push(ROOT_CATEGORY.to_string());
        categories.sort();
        categories.dedup();
        categories
    }

    pub async fn query(&self, query: &ReferenceQuery) -> Result<ReferencePage> {
        let started = Instant::now();
        if !self.root.is_dir() {
            return Ok(ReferencePage::empty(query.offset, query.limit));
        }

        let scope = Scope::parse(query.category.as_deref());
        let dataset = self.dataset(&scope).await?;

        let filter = SearchFilter::new(query.search.as_deref());
        let page = filter::paginate(
            &dataset.data,
            &filter,
            query.offset,
            query.limit,
            dataset.categories,
        );

        info!(
            "Served {} of {} references in {:?}",
            page.references.len(),
            page.total,
            started.elapsed()
        );
        Ok(page)
    }

    /// Cached records for `scope`, rescanning when the file count moved.
    async fn dataset(&self, scope: &Scope) -> Result<CategoryCache> {
        let key = scope.cache_key().to_string();
        let cached = self.cache.get(&key).await;

        let root = self.root.clone();
        let counted_scope = scope.clone();
        let current = tokio::task::spawn_blocking(move || {
            change_detection::count_images(&root, &counted_scope)
        })
        .await?;

        match change_detection::evaluate(cached.as_ref(), current) {
            CacheDecision::Fresh => {
                debug!("Cache hit for {key:?}");
                if let Some(cache) = cached {
                    return Ok(cache);
                }
            }
            CacheDecision::Stale { cached, current } => {
                debug!("Cache for {key:?} is stale ({cached} -> {current} files)");
            }
            CacheDecision::Missing => debug!("No cache for {key:?}"),
        }

        let root = self.root.clone();
        let scan_scope = scope.clone();
        let outcome = tokio::task::spawn_blocking(move || scanner::scan(&root, &scan_scope)).await?;

        let fresh = CategoryCache::new(outcome.records, outcome.file_count, outcome.categories);
        self.cache.put(&key, fresh.clone()).await;
        Ok(fresh)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::reference;
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        refs: TempDir,
        cache_dir: TempDir,
        library: ReferenceLibrary,
    }

    fn fixture() -> Fixture {
        let refs = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let library = ReferenceLibrary::new(
            refs.path(),
            Arc::new(CacheManager::new(cache_dir.path())),
        );
        Fixture {
            refs,
            cache_dir,
            library,
        }
    }

    fn all() -> ReferenceQuery {
        ReferenceQuery::default()
    }

    #[tokio::test]
    async fn unchanged_count_returns_identical_dataset() {
        let f = fixture();
        reference(&f.refs.path().join("style"), "ink_0.png", "ink wash");
        reference(f.refs.path(), "top_0.png", "top");

        let first = f.library.query(&all()).await.unwrap();
        let second = f.library.query(&all()).await.unwrap();
        let third = f.library.query(&all()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second, third);
        assert_eq!(first.total, 2);
        assert_eq!(first.categories, vec!["root", "style"]);
        assert!(f.cache_dir.path().join("references_.json").exists());
    }

    #[tokio::test]
    async fn in_place_edit_is_not_detected() {
        let f = fixture();
        let style = f.refs.path().join("style");
        reference(&style, "ink_0.png", "before edit");

        let query = ReferenceQuery {
            category: Some("style".into()),
            ..all()
        };
        let before = f.library.query(&query).await.unwrap();
        assert_eq!(before.references[0].prompt, "before edit");

        // Same file name, same count: the cached record wins.
        reference(&style, "ink_0.png", "after edit");
        let after = f.library.query(&query).await.unwrap();
        assert_eq!(after.references[0].prompt, "before edit");

        // A new file changes the count and forces a rescan.
        reference(&style, "ink_1.png", "second");
        let rescanned = f.library.query(&query).await.unwrap();
        assert_eq!(rescanned.total, 2);
        assert_eq!(rescanned.references[0].prompt, "after edit");
    }

    #[tokio::test]
    async fn search_and_paging_through_library() {
        let f = fixture();
        for i in 0..7 {
            let prompt = if i < 3 { "Golden Hour" } else { "night" };
            reference(f.refs.path(), &format!("sun_{i}.png"), prompt);
        }

        let page = f
            .library
            .query(&ReferenceQuery {
                search: Some("golden".into()),
                limit: 2,
                ..all()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.references.len(), 2);
        assert!(page.has_more);
    }

    #[tokio::test]
    async fn missing_root_is_empty_page() {
        let cache_dir = TempDir::new().unwrap();
        let library = ReferenceLibrary::new(
            cache_dir.path().join("nope"),
            Arc::new(CacheManager::new(cache_dir.path())),
        );
        let page = library.query(&all()).await.unwrap();
        assert_eq!(page.total, 0);
        assert_eq!(page.limit, 200);
        assert!(library.categories().is_empty());
    }

    #[tokio::test]
    async fn similar_category_names_keep_separate_caches() {
        let f = fixture();
        reference(&f.refs.path().join("a.b"), "dot_0.png", "from a.b");
        reference(&f.refs.path().join("ab"), "plain_0.png", "from ab");
        reference(&f.refs.path().join("all"), "named_0.png", "from all");

        let by_category = |name: &str| ReferenceQuery {
            category: Some(name.into()),
            ..all()
        };
        f.library.query(&by_category("a.b")).await.unwrap();
        f.library.query(&all()).await.unwrap();

        // Restart: only the disk copies remain.
        let library = ReferenceLibrary::new(
            f.refs.path(),
            Arc::new(CacheManager::new(f.cache_dir.path())),
        );
        let ab = library.query(&by_category("ab")).await.unwrap();
        assert_eq!(ab.references[0].file_name, "plain_0.png");
        assert_eq!(ab.references[0].prompt, "from ab");

        let named = library.query(&by_category("all")).await.unwrap();
        assert_eq!(named.total, 1);
        assert_eq!(named.references[0].prompt, "from all");
    }

    #[tokio::test]
    async fn categories_include_root() {
        let f = fixture();
        std::fs::create_dir_all(f.refs.path().join("b")).unwrap();
        std::fs::create_dir_all(f.refs.path().join("a")).unwrap();
        assert_eq!(f.library.categories(), vec!["a", "b", "root"]);
    }
}
