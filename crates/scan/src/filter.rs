//! Search and pagination over cached records.

use promptdeck_storage::ReferenceRecord;
use serde::Serialize;

pub const DEFAULT_LIMIT: usize = 200;

/// Case-insensitive substring match on Lora name or prompt. The query is
/// used verbatim; only an empty string disables filtering.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    needle: Option<String>,
}

impl SearchFilter {
    pub fn new(search: Option<&str>) -> Self {
        Self {
            needle: search.filter(|s| !s.is_empty()).map(str::to_lowercase),
        }
    }

    pub fn matches(&self, record: &ReferenceRecord) -> bool {
        match &self.needle {
            None => true,
            Some(needle) => {
                record.lora_name.to_lowercase().contains(needle)
                    || record.prompt.to_lowercase().contains(needle)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceQuery {
    pub category: Option<String>,
    pub search: Option<String>,
    pub offset: usize,
    pub limit: usize,
}

impl Default for ReferenceQuery {
    fn default() -> Self {
        Self {
            category: None,
            search: None,
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl ReferenceQuery {
    /// Build from raw query-string values. Unparsable numbers use the defaults.
    pub fn from_raw(
        category: Option<String>,
        search: Option<String>,
        offset: Option<&str>,
        limit: Option<&str>,
    ) -> Self {
        let defaults = Self::default();
        Self {
            category,
            search,
            offset: offset
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.offset),
            limit: limit
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.limit),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReferencePage {
    pub categories: Vec<String>,
    pub references: Vec<ReferenceRecord>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
}

impl ReferencePage {
    pub fn empty(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit,
            ..Default::default()
        }
    }
}

/// Filter `records`, then slice `[offset, offset + limit)` out of the matches.
pub fn paginate(
    records: &[ReferenceRecord],
    filter: &SearchFilter,
    offset: usize,
    limit: usize,
    categories: Vec<String>,
) -> ReferencePage {
    let matched: Vec<&ReferenceRecord> = records.iter().filter(|r| filter.matches(r)).collect();
    let total = matched.len();
    let end = offset.saturating_add(limit).min(total);
    let references = matched
        .get(offset..end)
        .unwrap_or_default()
        .iter()
        .map(|r| (*r).clone())
        .collect();

    ReferencePage {
        categories,
        references,
        total,
        offset,
        limit,
        has_more: offset.saturating_add(limit) < total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(n: usize) -> Vec<ReferenceRecord> {
        (0..n)
            .map(|i| ReferenceRecord {
                file_name: format!("lora{i}_0.png"),
                lora_name: format!("lora{i}"),
                prompt: if i % 2 == 0 { "A Red Fox".into() } else { "blue sky".into() },
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn pages_cover_everything_exactly_once() {
        let all = records(23);
        let filter = SearchFilter::default();
        let limit = 5;
        let mut seen = Vec::new();
        let mut offset = 0;
        loop {
            let page = paginate(&all, &filter, offset, limit, Vec::new());
            assert!(page.references.len() <= limit);
            assert_eq!(page.total, 23);
            seen.extend(page.references.into_iter().map(|r| r.file_name));
            if !page.has_more {
                break;
            }
            offset += limit;
        }
        let expected: Vec<String> = all.into_iter().map(|r| r.file_name).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn offset_past_end_is_empty() {
        let page = paginate(&records(3), &SearchFilter::default(), 10, 5, Vec::new());
        assert!(page.references.is_empty());
        assert_eq!(page.total, 3);
        assert!(!page.has_more);
    }

    #[test]
    fn search_is_case_insensitive_and_counts_matches() {
        let all = records(10);
        for needle in ["red fox", "RED FOX", "rEd"] {
            let page = paginate(&all, &SearchFilter::new(Some(needle)), 0, 200, Vec::new());
            assert_eq!(page.total, 5);
            assert!(page.references.iter().all(|r| r.prompt == "A Red Fox"));
        }

        let by_name = paginate(&all, &SearchFilter::new(Some("LORA3")), 0, 200, Vec::new());
        assert_eq!(by_name.total, 1);
    }

    #[test]
    fn only_empty_search_matches_everything() {
        let record = ReferenceRecord::default();
        assert!(SearchFilter::new(None).matches(&record));
        assert!(SearchFilter::new(Some("")).matches(&record));
        assert!(!SearchFilter::new(Some("   ")).matches(&record));
    }

    #[test]
    fn whitespace_in_search_is_significant() {
        let foxglove = ReferenceRecord {
            lora_name: "garden".into(),
            prompt: "Foxglove in bloom".into(),
            ..Default::default()
        };
        assert!(SearchFilter::new(Some("fox")).matches(&foxglove));
        assert!(!SearchFilter::new(Some(" fox")).matches(&foxglove));
        assert!(!SearchFilter::new(Some("  ")).matches(&foxglove));
        assert!(SearchFilter::new(Some(" in ")).matches(&foxglove));
    }

    #[test]
    fn raw_query_falls_back_to_defaults() {
        let query = ReferenceQuery::from_raw(None, None, Some("abc"), Some("-4"));
        assert_eq!(query.offset, 0);
        assert_eq!(query.limit, DEFAULT_LIMIT);

        let query = ReferenceQuery::from_raw(Some("style".into()), None, Some("20"), Some("10"));
        assert_eq!(query.offset, 20);
        assert_eq!(query.limit, 10);
    }
}
