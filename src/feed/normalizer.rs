use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::image::resolve_image;
use super::parser::{RawFeed, RawItem};
use crate::util::strip_markup;

/// Title used when neither the source nor the caller supplies one.
pub const UNTITLED: &str = "Untitled";

// ============================================================================
// Canonical Types
// ============================================================================

/// One source's items after normalization.
///
/// Built fresh on every call; never persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feed {
    pub id: String,
    pub title: String,
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Number of items after skip/limit
    pub total_items: usize,
    pub items: Vec<FeedItem>,
}

/// A canonical feed item.
///
/// `source_link` is the only identity that survives a re-fetch; `url_id` is
/// minted per normalization and only good for the response it appears in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    /// Zero-based position in the source's item list
    pub id: usize,
    pub url_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub content_snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pub_date: Option<DateTime<Utc>>,
    pub source_link: String,
    #[serde(default)]
    pub is_saved: bool,
}

/// Window and identity parameters for [`normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeOptions {
    pub skip: usize,
    pub limit: usize,
    /// Becomes `Feed::id`; a fresh UUID otherwise
    pub source_id: Option<String>,
    /// Replaces the source's own title
    pub override_title: Option<String>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: usize::MAX,
            source_id: None,
            override_title: None,
        }
    }
}

impl NormalizeOptions {
    pub fn window(skip: usize, limit: usize) -> Self {
        Self {
            skip,
            limit,
            ..Self::default()
        }
    }

    pub fn with_source_id(mut self, id: impl Into<String>) -> Self {
        self.source_id = Some(id.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.override_title = Some(title.into());
        self
    }
}

// ============================================================================
// Normalization
// ============================================================================

/// Convert a raw feed into a canonical [`Feed`].
///
/// Items get their position id first; then items before `skip` and items
/// without a link are dropped, and the first `limit` of the rest are kept.
pub fn normalize(raw: &RawFeed, opts: &NormalizeOptions) -> Feed {
    let mut linkless = 0usize;
    let items: Vec<FeedItem> = raw
        .items
        .iter()
        .enumerate()
        .skip(opts.skip)
        .filter_map(|(id, item)| {
            let normalized = normalize_item(raw, item, id);
            if normalized.is_none() {
                linkless += 1;
            }
            normalized
        })
        .take(opts.limit)
        .collect();

    if linkless > 0 {
        tracing::debug!(
            feed = raw.link.as_deref().unwrap_or(""),
            dropped = linkless,
            "Dropped items without a link"
        );
    }

    let title = opts
        .override_title
        .clone()
        .or_else(|| non_empty(raw.title.as_deref()))
        .unwrap_or_else(|| UNTITLED.to_string());

    Feed {
        id: opts
            .source_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        title,
        link: raw.link.clone(),
        description: raw.description.clone(),
        total_items: items.len(),
        items,
    }
}

fn normalize_item(feed: &RawFeed, item: &RawItem, id: usize) -> Option<FeedItem> {
    let source_link = non_empty(item.link.as_deref())?;

    let content_snippet = non_empty(item.content_snippet.as_deref())
        .or_else(|| {
            [&item.description, &item.content_encoded, &item.content]
                .into_iter()
                .flatten()
                .map(|markup| strip_markup(markup))
                .find(|text| !text.is_empty())
        })
        .unwrap_or_default();

    Some(FeedItem {
        id,
        url_id: Uuid::new_v4(),
        title: non_empty(item.title.as_deref()).unwrap_or_else(|| UNTITLED.to_string()),
        content_snippet,
        content: item.content_encoded.clone().or_else(|| item.content.clone()),
        image_url: resolve_image(feed, item),
        author: non_empty(item.author.as_deref()),
        pub_date: item.pub_date.as_deref().and_then(parse_date),
        source_link,
        is_saved: false,
    })
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// RFC 3339 first, then RFC 2822 (RSS `pubDate`).
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .map(|d| d.with_timezone(&Utc))
        .inspect_err(|e| tracing::trace!(date = raw, error = %e, "Unparseable item date"))
        .ok()
}
