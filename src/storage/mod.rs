//! SQLite-backed document store.
//!
//! - [`Database`] owns the connection pool and the `documents` table
//! - `documents` runs generic CRUD and read pipelines
//! - `catalog` layers the typed entities (categories, feeds, subscriptions,
//!   saved items) on top

mod catalog;
mod documents;
mod schema;
mod types;

pub use catalog::saved_item_filter;
pub use schema::Database;
pub use types::{
    Category, DatabaseError, FeedSubscription, GlobalFeed, NewSubscription, SavedItem, CATEGORIES,
    GLOBAL_FEEDS, RAW_FEEDS, SAVED_ITEMS, SUBSCRIPTIONS,
};
