use serde::Serialize;

use super::normalizer::Feed;
use super::source::{FeedOutcome, FeedSource, SourceLoader, Window};
use crate::storage::DatabaseError;

/// One page of a cross-source walk.
///
/// `next_start` is the index of the first source not yet visited, or `None`
/// once the list is exhausted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkPage {
    pub data: Vec<Feed>,
    pub next_start: Option<usize>,
}

impl WalkPage {
    pub fn exhausted() -> Self {
        Self {
            data: Vec::new(),
            next_start: None,
        }
    }
}

/// Budget for one walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkLimits {
    /// Upper bound on items gathered across all sources
    pub content_quota: usize,
    /// Items requested from each source
    pub per_source_limit: usize,
}

/// Walk `sources` from `start`, gathering feeds until the quota would overflow.
///
/// Sources are loaded one at a time, in order, each at most once. A source
/// is only loaded when a full `per_source_limit` still fits in the quota.
/// Unavailable sources are skipped. A `start` that is `None` or past the end
/// yields an empty, exhausted page. A store failure aborts the walk.
pub async fn walk<L: SourceLoader>(
    loader: &L,
    sources: &[FeedSource],
    start: Option<usize>,
    limits: WalkLimits,
) -> Result<WalkPage, DatabaseError> {
    let Some(start) = start.filter(|&s| s < sources.len()) else {
        tracing::debug!(start = ?start, sources = sources.len(), "Walk start outside source list");
        return Ok(WalkPage::exhausted());
    };

    let window = Window {
        skip: 0,
        limit: limits.per_source_limit,
    };
    let mut total = 0usize;
    let mut data = Vec::new();
    let mut cursor = start;

    while cursor < sources.len() {
        if total.saturating_add(limits.per_source_limit) > limits.content_quota {
            break;
        }

        let source = &sources[cursor];
        cursor += 1;
        match loader.load(source, window).await? {
            FeedOutcome::Available(feed) => {
                total += feed.items.len();
                data.push(feed);
            }
            FeedOutcome::Unavailable { reason } => {
                tracing::warn!(source = %source, index = cursor - 1, reason = %reason, "Skipping unavailable source");
            }
        }
    }

    let next_start = (cursor < sources.len()).then_some(cursor);
    tracing::info!(
        start = start,
        feeds = data.len(),
        items = total,
        next = ?next_start,
        "Walked feed sources"
    );
    Ok(WalkPage { data, next_start })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::normalizer::{normalize, NormalizeOptions};
    use crate::feed::parser::{RawFeed, RawItem};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::sync::Mutex;

    /// In-memory loader: each URL maps to a feed size, `None` means unavailable.
    struct StubLoader {
        feeds: Vec<(String, Option<usize>)>,
        calls: Mutex<Vec<String>>,
        /// Index of the source whose load fails with a store error
        broken_store_at: Option<usize>,
    }

    impl StubLoader {
        fn new(sizes: &[Option<usize>]) -> Self {
            Self {
                feeds: sizes
                    .iter()
                    .enumerate()
                    .map(|(i, size)| (format!("https://s{i}.example.com"), *size))
                    .collect(),
                calls: Mutex::new(Vec::new()),
                broken_store_at: None,
            }
        }

        fn sources(&self) -> Vec<FeedSource> {
            self.feeds.iter().map(|(url, _)| FeedSource::url(url.clone())).collect()
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl SourceLoader for StubLoader {
        async fn load(&self, source: &FeedSource, window: Window) -> Result<FeedOutcome, DatabaseError> {
            let url = source.to_string();
            self.calls.lock().unwrap().push(url.clone());
            if let Some(i) = self.broken_store_at {
                if self.feeds[i].0 == url {
                    return Err(DatabaseError::Other(sqlx::Error::PoolClosed));
                }
            }

            match self.feeds.iter().find(|(u, _)| *u == url).and_then(|(_, size)| *size) {
                Some(size) => {
                    let raw = RawFeed {
                        title: Some(url.clone()),
                        items: (0..size)
                            .map(|n| RawItem {
                                link: Some(format!("{url}/{n}")),
                                ..RawItem::default()
                            })
                            .collect(),
                        ..RawFeed::default()
                    };
                    Ok(FeedOutcome::Available(normalize(
                        &raw,
                        &NormalizeOptions::window(window.skip, window.limit),
                    )))
                }
                None => Ok(FeedOutcome::unavailable("down")),
            }
        }
    }

    fn limits(content_quota: usize, per_source_limit: usize) -> WalkLimits {
        WalkLimits {
            content_quota,
            per_source_limit,
        }
    }

    #[tokio::test]
    async fn test_three_sources_fill_quota_exactly() {
        let loader = StubLoader::new(&[Some(9), Some(9), Some(9)]);
        let page = walk(&loader, &loader.sources(), Some(0), limits(15, 5)).await.unwrap();
        assert_eq!(page.data.len(), 3);
        assert_eq!(loader.calls().len(), 3);
        assert_eq!(page.next_start, None);

        let loader = StubLoader::new(&[Some(9), Some(9), Some(9), Some(9)]);
        let page = walk(&loader, &loader.sources(), Some(0), limits(15, 5)).await.unwrap();
        assert_eq!(page.data.len(), 3);
        assert_eq!(page.next_start, Some(3));
    }

    #[tokio::test]
    async fn test_unavailable_source_skipped() {
        let loader = StubLoader::new(&[Some(5), None, Some(5), Some(5)]);
        let page = walk(&loader, &loader.sources(), Some(0), limits(10, 5)).await.unwrap();
        let titles: Vec<_> = page.data.iter().map(|f| f.title.as_str()).collect();
        assert_eq!(titles, vec!["https://s0.example.com", "https://s2.example.com"]);
        assert_eq!(page.next_start, Some(3));
        assert_eq!(loader.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_last_source_ends_walk() {
        let loader = StubLoader::new(&[Some(2), None]);
        let page = walk(&loader, &loader.sources(), Some(0), limits(15, 5)).await.unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.next_start, None);
    }

    #[tokio::test]
    async fn test_short_feeds_leave_room_for_more() {
        let loader = StubLoader::new(&[Some(1), Some(1), Some(1), Some(1)]);
        let page = walk(&loader, &loader.sources(), Some(0), limits(7, 5)).await.unwrap();
        // 0 + 5 <= 7, 1 + 5 <= 7, 2 + 5 <= 7, then 3 + 5 > 7
        assert_eq!(page.data.len(), 3);
        assert_eq!(page.next_start, Some(3));
    }

    #[tokio::test]
    async fn test_start_outside_list_is_terminal() {
        let loader = StubLoader::new(&[Some(5), Some(5)]);
        for start in [Some(2), Some(99), None] {
            for quota in [0, 15] {
                let page = walk(&loader, &loader.sources(), start, limits(quota, 5)).await.unwrap();
                assert_eq!(page, WalkPage::exhausted());
            }
        }
        assert!(loader.calls().is_empty());
    }

    #[tokio::test]
    async fn test_zero_quota_fetches_nothing() {
        let loader = StubLoader::new(&[Some(5)]);
        let page = walk(&loader, &loader.sources(), Some(0), limits(0, 5)).await.unwrap();
        assert!(page.data.is_empty());
        assert_eq!(page.next_start, Some(0));
        assert!(loader.calls().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_aborts_walk() {
        let mut loader = StubLoader::new(&[None, Some(5), Some(5)]);
        loader.broken_store_at = Some(1);
        let result = walk(&loader, &loader.sources(), Some(0), limits(15, 5)).await;
        assert!(matches!(result, Err(DatabaseError::Other(_))));
        // Nothing after the failing source is loaded
        assert_eq!(loader.calls().len(), 2);
    }

    #[test]
    fn test_page_serializes_next_start() {
        let value = serde_json::to_value(WalkPage::exhausted()).unwrap();
        assert_eq!(value, serde_json::json!({"data": [], "nextStart": null}));
    }

    proptest! {
        #[test]
        fn prop_replay_never_repeats_a_source(
            sizes in proptest::collection::vec(proptest::option::weighted(0.8, 0usize..8), 0..12),
            quota in 1usize..30,
            per_source in 1usize..6,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let loader = StubLoader::new(&sizes);
            let sources = loader.sources();

            let mut start = Some(0);
            let mut pages = 0;
            while let Some(s) = start {
                let page = runtime.block_on(walk(&loader, &sources, Some(s), limits(quota, per_source))).unwrap();
                let gathered: usize = page.data.iter().map(|f| f.items.len()).sum();
                prop_assert!(gathered <= quota);
                if let Some(next) = page.next_start {
                    prop_assert!(next > s || (per_source > quota && next == s));
                }
                if page.next_start == Some(s) {
                    break;
                }
                start = page.next_start;
                pages += 1;
                prop_assert!(pages <= sources.len());
            }

            let calls = loader.calls();
            let mut unique = calls.clone();
            unique.sort();
            unique.dedup();
            prop_assert_eq!(calls.len(), unique.len());
        }
    }
}
