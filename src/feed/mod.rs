//! Feed ingestion: fetching, parsing, normalization and cross-source walks.
//!
//! - [`parser`] - raw feeds from RSS/Atom bytes (`feed-rs`) or stored JSON documents
//! - [`image`] - ordered fallback search for an item's representative image
//! - [`normalizer`] - raw feed to canonical [`Feed`] / [`FeedItem`]
//! - [`fetcher`] - single-attempt HTTP fetch with timeout and size cap
//! - [`source`] - source descriptors and the [`SourceLoader`] seam
//! - [`walker`] - quota-bounded traversal of a source list
//!
//! # Example
//!
//! ```ignore
//! let loader = FeedLoader::new(build_client()?, db, FetchSettings::default());
//! let sources = vec![FeedSource::url("https://example.com/rss")];
//! let limits = WalkLimits { content_quota: 15, per_source_limit: 5 };
//! let page = walk(&loader, &sources, Some(0), limits).await?;
//! ```

pub mod fetcher;
pub mod image;
pub mod normalizer;
pub mod parser;
pub mod source;
pub mod walker;

pub use fetcher::{build_client, fetch_raw_feed, FetchError, FetchSettings};
pub use image::resolve_image;
pub use normalizer::{normalize, Feed, FeedItem, NormalizeOptions};
pub use parser::{parse_feed, parse_raw_document, RawFeed, RawItem};
pub use source::{FeedLoader, FeedOutcome, FeedSource, SourceLoader, Window};
pub use walker::{walk, WalkLimits, WalkPage};
