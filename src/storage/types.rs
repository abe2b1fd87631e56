use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::feed::FeedItem;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("The feedloom database is locked by another process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Stages appear in an order the SQLite adapter cannot express
    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    /// A custom stage the adapter does not know
    #[error("Unsupported pipeline stage: {0}")]
    UnsupportedStage(String),

    /// A document failed entity validation before being written
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Stored body could not be (de)serialized
    #[error("Malformed document: {0}")]
    Document(#[from] serde_json::Error),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Collections
// ============================================================================

pub const CATEGORIES: &str = "categories";
pub const GLOBAL_FEEDS: &str = "feeds";
pub const SUBSCRIPTIONS: &str = "subscriptions";
pub const SAVED_ITEMS: &str = "saved_items";
/// Raw feed documents cached for replay as walk sources
pub const RAW_FEEDS: &str = "raw_feeds";

// ============================================================================
// Catalog Entities
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
}

/// A feed curated for every user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalFeed {
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub category: Vec<String>,
    #[serde(default)]
    pub is_global: bool,
}

/// A user-created feed subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSubscription {
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub category: Vec<String>,
    #[serde(default)]
    pub is_pinned: bool,
    pub owner: String,
}

/// Input for [`Database::subscribe`](super::Database::subscribe).
#[derive(Debug, Clone, Default)]
pub struct NewSubscription {
    pub url: String,
    pub title: String,
    pub category: Vec<String>,
    pub is_pinned: bool,
}

/// A feed item a user saved for later.
///
/// `feed` becomes `None` once the originating subscription is deleted;
/// `fallback_feed_title` keeps the item displayable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedItem {
    pub id: String,
    pub data: FeedItem,
    pub feed: Option<String>,
    pub fallback_feed_title: String,
    pub date_added: DateTime<Utc>,
    pub owner: String,
}
