use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

use super::fetcher::{fetch_raw_feed, FetchSettings};
use super::normalizer::{normalize, Feed, NormalizeOptions};
use super::parser::{parse_raw_document, RawFeed};
use crate::storage::{Database, DatabaseError, FeedSubscription, RAW_FEEDS};

// ============================================================================
// Source Descriptors
// ============================================================================

/// One entry of a walkable source list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedSource {
    /// An external RSS/Atom endpoint
    Url { url: String },
    /// A stored subscription: fetched live, identified and titled by the subscription
    Subscription { id: String, url: String, title: String },
    /// A raw feed document cached in the store
    Document { id: String },
}

impl FeedSource {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url { url: url.into() }
    }

    pub fn document(id: impl Into<String>) -> Self {
        Self::Document { id: id.into() }
    }
}

impl From<&FeedSubscription> for FeedSource {
    fn from(sub: &FeedSubscription) -> Self {
        Self::Subscription {
            id: sub.id.clone(),
            url: sub.url.clone(),
            title: sub.title.clone(),
        }
    }
}

impl fmt::Display for FeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url { url } | Self::Subscription { url, .. } => f.write_str(url),
            Self::Document { id } => write!(f, "document:{id}"),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Result of loading one source.
///
/// Per-source failures are `Unavailable`. Only a failing store escapes as an
/// error from [`SourceLoader::load`].
#[derive(Debug, Clone, PartialEq)]
pub enum FeedOutcome {
    Available(Feed),
    Unavailable { reason: String },
}

impl FeedOutcome {
    pub fn unavailable(reason: impl fmt::Display) -> Self {
        Self::Unavailable {
            reason: reason.to_string(),
        }
    }
}

/// Item window requested from a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub skip: usize,
    pub limit: usize,
}

/// Fetches and normalizes one source.
pub trait SourceLoader {
    fn load(
        &self,
        source: &FeedSource,
        window: Window,
    ) -> impl Future<Output = Result<FeedOutcome, DatabaseError>> + Send;
}

/// Why no raw feed could be produced for a source.
enum RawFeedError {
    /// The source itself failed; the caller skips it
    Unavailable(String),
    Store(DatabaseError),
}

/// Loads live URLs over HTTP and stored documents from the database.
#[derive(Clone)]
pub struct FeedLoader {
    client: reqwest::Client,
    db: Database,
    settings: FetchSettings,
}

impl FeedLoader {
    pub fn new(client: reqwest::Client, db: Database, settings: FetchSettings) -> Self {
        Self { client, db, settings }
    }

    async fn raw_feed(&self, source: &FeedSource) -> Result<RawFeed, RawFeedError> {
        match source {
            FeedSource::Url { url } | FeedSource::Subscription { url, .. } => {
                fetch_raw_feed(&self.client, url, &self.settings)
                    .await
                    .map_err(|e| RawFeedError::Unavailable(e.to_string()))
            }
            FeedSource::Document { id } => {
                let doc = self
                    .db
                    .get_document(RAW_FEEDS, id)
                    .await
                    .map_err(RawFeedError::Store)?
                    .ok_or_else(|| RawFeedError::Unavailable(format!("no stored feed document {id}")))?;
                parse_raw_document(doc).map_err(|e| RawFeedError::Unavailable(e.to_string()))
            }
        }
    }
}

impl SourceLoader for FeedLoader {
    async fn load(&self, source: &FeedSource, window: Window) -> Result<FeedOutcome, DatabaseError> {
        let raw = match self.raw_feed(source).await {
            Ok(raw) => raw,
            Err(RawFeedError::Unavailable(reason)) => {
                tracing::warn!(source = %source, error = %reason, "Feed source unavailable");
                return Ok(FeedOutcome::Unavailable { reason });
            }
            Err(RawFeedError::Store(e)) => {
                tracing::error!(source = %source, error = %e, "Store failed while loading source");
                return Err(e);
            }
        };

        let mut opts = NormalizeOptions::window(window.skip, window.limit);
        match source {
            FeedSource::Subscription { id, title, .. } => {
                opts = opts.with_source_id(id.clone()).with_title(title.clone());
            }
            FeedSource::Document { id } => {
                opts = opts.with_source_id(id.clone());
            }
            FeedSource::Url { .. } => {}
        }

        let feed = normalize(&raw, &opts);
        tracing::debug!(source = %source, items = feed.total_items, "Loaded feed source");
        Ok(FeedOutcome::Available(feed))
    }
}
