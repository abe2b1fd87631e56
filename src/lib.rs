//! Feed aggregation and pagination engine.
//!
//! - [`query`] shapes client search parameters into store pipelines and cursors
//! - [`feed`] fetches, normalizes and walks heterogeneous feed sources
//! - [`storage`] is the SQLite JSON document store and the typed catalog
//! - [`service`] composes them into the read paths callers use

pub mod config;
pub mod feed;
pub mod query;
pub mod service;
pub mod storage;
pub mod util;

pub use config::{Config, ConfigError};
pub use service::{AggregationService, Page, ServiceError};
