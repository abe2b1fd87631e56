//! Read paths of the engine.
//!
//! [`AggregationService`] answers the two read patterns: paging through a
//! stored collection ([`QueryShaper`] only) and paging across live feed
//! sources ([`walk`] plus normalization), optionally marking items the caller
//! has saved.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::Config;
use crate::feed::{
    walk, Feed, FeedLoader, FeedOutcome, FeedSource, FetchSettings, SourceLoader, WalkLimits, WalkPage,
    Window,
};
use crate::query::{Filter, PaginationCursor, QueryShaper, SearchQuery};
use crate::storage::{
    saved_item_filter, Database, DatabaseError, CATEGORIES, GLOBAL_FEEDS, SAVED_ITEMS, SUBSCRIPTIONS,
};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ServiceError {
    /// The document store failed; fatal for the request
    #[error(transparent)]
    Store(#[from] DatabaseError),

    /// A single requested feed could not be loaded
    #[error("Feed {feed} is unavailable: {reason}")]
    SourceUnavailable { feed: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),
}

// ============================================================================
// Collection Views
// ============================================================================

/// How a stored collection is searched and ordered by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionView {
    pub collection: &'static str,
    /// Fields the free-text `q` parameter searches
    pub text_fields: &'static [&'static str],
    pub default_sort: Option<&'static str>,
}

pub const CATEGORY_VIEW: CollectionView = CollectionView {
    collection: CATEGORIES,
    text_fields: &["name"],
    default_sort: Some("name"),
};

pub const GLOBAL_FEED_VIEW: CollectionView = CollectionView {
    collection: GLOBAL_FEEDS,
    text_fields: &["title", "url"],
    default_sort: Some("title"),
};

pub const SUBSCRIPTION_VIEW: CollectionView = CollectionView {
    collection: SUBSCRIPTIONS,
    text_fields: &["title", "url"],
    default_sort: Some("-isPinned,title"),
};

pub const SAVED_ITEM_VIEW: CollectionView = CollectionView {
    collection: SAVED_ITEMS,
    text_fields: &["data.title", "data.contentSnippet", "fallbackFeedTitle"],
    default_sort: Some("-dateAdded"),
};

/// One page of stored documents plus its cursor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub document_info: PaginationCursor,
}

// ============================================================================
// Service
// ============================================================================

pub struct AggregationService<L = FeedLoader> {
    db: Database,
    loader: L,
    limits: WalkLimits,
}

impl AggregationService<FeedLoader> {
    /// Service backed by live HTTP fetches, configured from `config`.
    pub fn from_config(db: Database, client: reqwest::Client, config: &Config) -> Self {
        let loader = FeedLoader::new(client, db.clone(), FetchSettings::from(config));
        Self::new(db, loader, config.walk_limits())
    }
}

impl<L: SourceLoader> AggregationService<L> {
    pub fn new(db: Database, loader: L, limits: WalkLimits) -> Self {
        Self { db, loader, limits }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Page through a stored collection.
    ///
    /// `base` is the caller's scope (e.g. an owner filter); the query's `q`
    /// narrows it further. The cursor is computed from a second read with
    /// the identical filter.
    pub async fn paginate_collection(
        &self,
        view: CollectionView,
        base: Filter,
        query: &SearchQuery,
    ) -> Result<Page<Value>, ServiceError> {
        let shaper = QueryShaper::new(base, query)
            .search_text(view.text_fields)
            .sort(view.default_sort)
            .project(None)
            .paginate();

        let items = self.db.aggregate(view.collection, &shaper.pipeline()).await?;
        let document_info = shaper
            .pagination_cursor(&self.db, view.collection, items.len())
            .await?;
        Ok(Page { items, document_info })
    }

    /// Page through `owner`'s saved items, honouring `url_id`, `src_link`
    /// and `old_feed`.
    pub async fn saved_items(&self, owner: &str, query: &SearchQuery) -> Result<Page<Value>, ServiceError> {
        self.paginate_collection(SAVED_ITEM_VIEW, saved_item_filter(owner, query), query)
            .await
    }

    /// Walk `sources` from the query's `startIndex`.
    ///
    /// An explicit `limit` sets the per-source item count; otherwise the
    /// configured one is used. With an `owner`, items they saved are marked.
    pub async fn walk_sources(
        &self,
        sources: &[FeedSource],
        query: &SearchQuery,
        owner: Option<&str>,
    ) -> Result<WalkPage, ServiceError> {
        let limits = WalkLimits {
            per_source_limit: self.per_source_limit(query),
            ..self.limits
        };

        let mut page = walk(&self.loader, sources, query.resolved_start_index(), limits).await?;
        if let Some(owner) = owner {
            self.mark_saved(owner, &mut page.data).await?;
        }
        Ok(page)
    }

    /// Walk `owner`'s subscriptions, pinned first, then by title.
    pub async fn walk_subscriptions(&self, owner: &str, query: &SearchQuery) -> Result<WalkPage, ServiceError> {
        let sources: Vec<FeedSource> = self
            .db
            .subscriptions_for(owner)
            .await?
            .iter()
            .map(FeedSource::from)
            .collect();
        self.walk_sources(&sources, query, Some(owner)).await
    }

    /// Load one source with the query's `skip`/`limit`.
    ///
    /// Unlike a walk, an unavailable source is an error here, distinct from
    /// a feed that simply has no items.
    pub async fn feed_detail(
        &self,
        source: &FeedSource,
        query: &SearchQuery,
        owner: Option<&str>,
    ) -> Result<Feed, ServiceError> {
        let window = Window {
            skip: usize::try_from(query.resolved_skip()).unwrap_or(usize::MAX),
            limit: usize::try_from(query.resolved_limit()).unwrap_or(usize::MAX),
        };

        let mut feed = match self.loader.load(source, window).await? {
            FeedOutcome::Available(feed) => feed,
            FeedOutcome::Unavailable { reason } => {
                return Err(ServiceError::SourceUnavailable {
                    feed: source.to_string(),
                    reason,
                });
            }
        };

        if let Some(owner) = owner {
            self.mark_saved(owner, std::slice::from_mut(&mut feed)).await?;
        }
        Ok(feed)
    }

    /// [`feed_detail`](Self::feed_detail) for one of `owner`'s subscriptions.
    pub async fn subscription_detail(
        &self,
        owner: &str,
        id: &str,
        query: &SearchQuery,
    ) -> Result<Feed, ServiceError> {
        let sub = self
            .db
            .subscription(owner, id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("subscription {id}")))?;
        self.feed_detail(&FeedSource::from(&sub), query, Some(owner)).await
    }

    fn per_source_limit(&self, query: &SearchQuery) -> usize {
        if query.limit.is_some() {
            usize::try_from(query.resolved_limit()).unwrap_or(usize::MAX)
        } else {
            self.limits.per_source_limit
        }
    }

    /// Set `is_saved` on every item whose `source_link` `owner` has saved.
    async fn mark_saved(&self, owner: &str, feeds: &mut [Feed]) -> Result<(), DatabaseError> {
        let links: Vec<String> = feeds
            .iter()
            .flat_map(|f| f.items.iter().map(|i| i.source_link.clone()))
            .collect();
        let saved = self.db.saved_links(owner, &links).await?;
        if saved.is_empty() {
            return Ok(());
        }

        for item in feeds.iter_mut().flat_map(|f| f.items.iter_mut()) {
            item.is_saved = saved.contains(&item.source_link);
        }
        Ok(())
    }
}
