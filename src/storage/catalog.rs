use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::collections::HashSet;

use super::documents::{delete_document_in, set_field_where_in};
use super::schema::Database;
use super::types::{
    Category, DatabaseError, FeedSubscription, GlobalFeed, NewSubscription, SavedItem, CATEGORIES,
    GLOBAL_FEEDS, RAW_FEEDS, SAVED_ITEMS, SUBSCRIPTIONS,
};
use crate::feed::{FeedItem, RawFeed};
use crate::query::{Filter, Pipeline, SearchQuery, SortKey, Stage};
use crate::util::{require_https, strip_control_chars};

/// Shortest accepted category name or subscription title.
const MIN_NAME_LEN: usize = 3;

fn decode<T: DeserializeOwned>(doc: Value) -> Result<T, DatabaseError> {
    Ok(serde_json::from_value(doc)?)
}

/// Strip control characters and trim, then enforce the minimum length.
fn clean_name(kind: &str, raw: &str) -> Result<String, DatabaseError> {
    let cleaned = strip_control_chars(raw);
    let trimmed = cleaned.trim();
    if trimmed.chars().count() < MIN_NAME_LEN {
        return Err(DatabaseError::Validation(format!(
            "{kind} must be at least {MIN_NAME_LEN} characters"
        )));
    }
    Ok(trimmed.to_owned())
}

fn https_url(raw: &str) -> Result<String, DatabaseError> {
    require_https(raw.trim())
        .map(|u| u.to_string())
        .map_err(|e| DatabaseError::Validation(format!("feed url: {e}")))
}

/// Match filter for one owner's saved items, narrowed by the domain
/// parameters of `query` (`url_id`, `src_link`, `old_feed`).
pub fn saved_item_filter(owner: &str, query: &SearchQuery) -> Filter {
    let mut filter = Filter::eq("owner", owner);
    if let Some(url_id) = query.url_id.as_deref().filter(|s| !s.trim().is_empty()) {
        filter = filter.and(Filter::eq("data.urlId", url_id.trim()));
    }
    if let Some(link) = query.src_link.as_deref().filter(|s| !s.trim().is_empty()) {
        filter = filter.and(Filter::eq("data.sourceLink", link.trim()));
    }
    if query.wants_old_feeds() {
        filter = filter.and(Filter::is_null("feed"));
    }
    filter
}

impl Database {
    // ========================================================================
    // Category Operations
    // ========================================================================

    pub async fn create_category(&self, name: &str) -> Result<Category, DatabaseError> {
        let name = clean_name("Category name", name)?;
        let doc = self.insert_document(CATEGORIES, json!({ "name": name })).await?;
        decode(doc)
    }

    /// Rename a category. Returns `None` if it does not exist.
    pub async fn rename_category(&self, id: &str, name: &str) -> Result<Option<Category>, DatabaseError> {
        let name = clean_name("Category name", name)?;
        let mut patch = Map::new();
        patch.insert("name".into(), Value::String(name));
        self.update_document(CATEGORIES, id, patch)
            .await?
            .map(decode)
            .transpose()
    }

    pub async fn delete_category(&self, id: &str) -> Result<bool, DatabaseError> {
        self.delete_document(CATEGORIES, id).await
    }

    // ========================================================================
    // Global Feeds
    // ========================================================================

    pub async fn create_global_feed(
        &self,
        url: &str,
        title: &str,
        category: Vec<String>,
    ) -> Result<GlobalFeed, DatabaseError> {
        let doc = json!({
            "url": https_url(url)?,
            "title": clean_name("Feed title", title)?,
            "category": category,
            "isGlobal": true,
        });
        decode(self.insert_document(GLOBAL_FEEDS, doc).await?)
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    pub async fn subscribe(&self, owner: &str, new: NewSubscription) -> Result<FeedSubscription, DatabaseError> {
        let doc = json!({
            "url": https_url(&new.url)?,
            "title": clean_name("Feed title", &new.title)?,
            "category": new.category,
            "isPinned": new.is_pinned,
            "owner": owner,
        });
        let sub: FeedSubscription = decode(self.insert_document(SUBSCRIPTIONS, doc).await?)?;
        tracing::info!(owner = %owner, id = %sub.id, url = %sub.url, "Created subscription");
        Ok(sub)
    }

    /// One of `owner`'s subscriptions.
    pub async fn subscription(&self, owner: &str, id: &str) -> Result<Option<FeedSubscription>, DatabaseError> {
        match self.get_document(SUBSCRIPTIONS, id).await? {
            Some(doc) if doc.get("owner").and_then(Value::as_str) == Some(owner) => decode(doc).map(Some),
            _ => Ok(None),
        }
    }

    /// All of `owner`'s subscriptions, pinned first, then by title.
    pub async fn subscriptions_for(&self, owner: &str) -> Result<Vec<FeedSubscription>, DatabaseError> {
        let pipeline = Pipeline::new()
            .with(Stage::Match(Filter::eq("owner", owner)))
            .with(Stage::Sort(vec![SortKey::desc("isPinned"), SortKey::asc("title")]));
        self.aggregate(SUBSCRIPTIONS, &pipeline)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    /// Delete a subscription; items saved from it become "old feed" items.
    ///
    /// Returns `false` if the subscription does not exist or is not `owner`'s.
    pub async fn unsubscribe(&self, owner: &str, id: &str) -> Result<bool, DatabaseError> {
        if self.subscription(owner, id).await?.is_none() {
            return Ok(false);
        }

        // Delete and detach together, or saved items would point at a missing feed
        let mut tx = self.pool.begin().await?;
        delete_document_in(&mut *tx, SUBSCRIPTIONS, id).await?;
        let orphaned = Filter::eq("owner", owner).and(Filter::eq("feed", id));
        let detached = set_field_where_in(&mut *tx, SAVED_ITEMS, &orphaned, "feed", &Value::Null).await?;
        tx.commit().await?;

        tracing::info!(owner = %owner, id = %id, detached = detached, "Deleted subscription");
        Ok(true)
    }

    // ========================================================================
    // Saved Items
    // ========================================================================

    /// Save an item for `owner`.
    ///
    /// Items are de-duplicated on `sourceLink`: saving a link twice returns
    /// the existing record.
    pub async fn save_item(
        &self,
        owner: &str,
        item: &FeedItem,
        feed: Option<&str>,
        fallback_feed_title: &str,
    ) -> Result<SavedItem, DatabaseError> {
        let existing = Pipeline::new()
            .with(Stage::Match(
                Filter::eq("owner", owner).and(Filter::eq("data.sourceLink", item.source_link.as_str())),
            ))
            .with(Stage::Limit(1));
        if let Some(doc) = self.aggregate(SAVED_ITEMS, &existing).await?.into_iter().next() {
            tracing::debug!(owner = %owner, link = %item.source_link, "Item already saved");
            return decode(doc);
        }

        let data = FeedItem {
            is_saved: true,
            ..item.clone()
        };
        let doc = json!({
            "data": serde_json::to_value(&data)?,
            "feed": feed,
            "fallbackFeedTitle": fallback_feed_title,
            "dateAdded": serde_json::to_value(Utc::now())?,
            "owner": owner,
        });
        decode(self.insert_document(SAVED_ITEMS, doc).await?)
    }

    /// Remove one of `owner`'s saved items.
    pub async fn unsave_item(&self, owner: &str, id: &str) -> Result<bool, DatabaseError> {
        match self.get_document(SAVED_ITEMS, id).await? {
            Some(doc) if doc.get("owner").and_then(Value::as_str) == Some(owner) => {
                self.delete_document(SAVED_ITEMS, id).await
            }
            _ => Ok(false),
        }
    }

    /// Which of `links` `owner` has saved. One store round trip.
    pub async fn saved_links(&self, owner: &str, links: &[String]) -> Result<HashSet<String>, DatabaseError> {
        if links.is_empty() {
            return Ok(HashSet::new());
        }

        let filter = Filter::eq("owner", owner).and(Filter::one_of("data.sourceLink", links.iter().cloned()));
        let rows = self
            .aggregate(SAVED_ITEMS, &Pipeline::new().with(Stage::Match(filter)))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|doc| doc.pointer("/data/sourceLink").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    // ========================================================================
    // Raw Feed Documents
    // ========================================================================

    /// Store a raw feed so it can be walked as a `Document` source.
    pub async fn cache_raw_feed(&self, raw: &RawFeed) -> Result<String, DatabaseError> {
        let doc = self.insert_document(RAW_FEEDS, serde_json::to_value(raw)?).await?;
        Ok(doc
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn item(link: &str) -> FeedItem {
        FeedItem {
            id: 0,
            url_id: Uuid::new_v4(),
            title: "Saved".into(),
            content_snippet: String::new(),
            content: None,
            image_url: None,
            author: None,
            pub_date: None,
            source_link: link.into(),
            is_saved: false,
        }
    }

    fn new_sub(url: &str, title: &str, is_pinned: bool) -> NewSubscription {
        NewSubscription {
            url: url.into(),
            title: title.into(),
            category: vec![],
            is_pinned,
        }
    }

    #[tokio::test]
    async fn test_category_crud() {
        let db = test_db().await;
        let cat = db.create_category("  Tech\x07 ").await.unwrap();
        assert_eq!(cat.name, "Tech");

        let renamed = db.rename_category(&cat.id, "Science").await.unwrap().unwrap();
        assert_eq!(renamed.name, "Science");
        assert!(db.rename_category("missing", "Whatever").await.unwrap().is_none());

        assert!(matches!(db.create_category("ab").await, Err(DatabaseError::Validation(_))));
        assert!(db.delete_category(&cat.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_global_feed_requires_https() {
        let db = test_db().await;
        let feed = db
            .create_global_feed("https://news.example.com/rss", "News", vec!["tech".into()])
            .await
            .unwrap();
        assert!(feed.is_global);
        assert_eq!(feed.category, vec!["tech".to_string()]);

        let result = db.create_global_feed("http://news.example.com/rss", "News", vec![]).await;
        assert!(matches!(result, Err(DatabaseError::Validation(_))));
    }

    #[tokio::test]
    async fn test_subscriptions_sorted_pinned_first() {
        let db = test_db().await;
        db.subscribe("u1", new_sub("https://b.example.com", "Bravo", false)).await.unwrap();
        db.subscribe("u1", new_sub("https://z.example.com", "Zulu", true)).await.unwrap();
        db.subscribe("u1", new_sub("https://a.example.com", "Alpha", false)).await.unwrap();
        db.subscribe("u2", new_sub("https://o.example.com", "Other", true)).await.unwrap();

        let titles: Vec<String> = db
            .subscriptions_for("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.title)
            .collect();
        assert_eq!(titles, vec!["Zulu", "Alpha", "Bravo"]);
    }

    #[tokio::test]
    async fn test_subscribe_validation() {
        let db = test_db().await;
        assert!(db.subscribe("u", new_sub("http://insecure.example.com", "Title", false)).await.is_err());
        assert!(db.subscribe("u", new_sub("https://ok.example.com", "no", false)).await.is_err());
    }

    #[tokio::test]
    async fn test_save_item_dedupes_on_source_link() {
        let db = test_db().await;
        let first = db.save_item("u1", &item("https://x.example.com/1"), None, "X").await.unwrap();
        let again = db.save_item("u1", &item("https://x.example.com/1"), None, "X").await.unwrap();
        assert_eq!(first.id, again.id);
        assert!(first.data.is_saved);

        let other_owner = db.save_item("u2", &item("https://x.example.com/1"), None, "X").await.unwrap();
        assert_ne!(first.id, other_owner.id);
    }

    #[tokio::test]
    async fn test_saved_links_scoped_to_owner() {
        let db = test_db().await;
        db.save_item("u1", &item("https://x.example.com/1"), None, "X").await.unwrap();
        db.save_item("u2", &item("https://x.example.com/2"), None, "X").await.unwrap();

        let links = vec![
            "https://x.example.com/1".to_string(),
            "https://x.example.com/2".to_string(),
            "https://x.example.com/3".to_string(),
        ];
        let saved = db.saved_links("u1", &links).await.unwrap();
        assert_eq!(saved, HashSet::from(["https://x.example.com/1".to_string()]));
        assert!(db.saved_links("u1", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_detaches_saved_items() {
        let db = test_db().await;
        let sub = db.subscribe("u1", new_sub("https://f.example.com", "Feed", false)).await.unwrap();
        let saved = db
            .save_item("u1", &item("https://f.example.com/1"), Some(sub.id.as_str()), &sub.title)
            .await
            .unwrap();
        assert_eq!(saved.feed.as_deref(), Some(sub.id.as_str()));

        assert!(!db.unsubscribe("intruder", &sub.id).await.unwrap());
        assert!(db.unsubscribe("u1", &sub.id).await.unwrap());

        let doc = db.get_document(SAVED_ITEMS, &saved.id).await.unwrap().unwrap();
        let detached: SavedItem = decode(doc).unwrap();
        assert_eq!(detached.feed, None);
        assert_eq!(detached.fallback_feed_title, "Feed");
    }

    #[tokio::test]
    async fn test_failed_detach_keeps_subscription() {
        let db = test_db().await;
        let sub = db.subscribe("u1", new_sub("https://f.example.com", "Feed", false)).await.unwrap();
        let saved = db
            .save_item("u1", &item("https://f.example.com/1"), Some(sub.id.as_str()), &sub.title)
            .await
            .unwrap();

        sqlx::query(
            "CREATE TRIGGER reject_saved_updates BEFORE UPDATE ON documents \
             WHEN OLD.collection = 'saved_items' BEGIN SELECT RAISE(ABORT, 'detach rejected'); END",
        )
        .execute(&db.pool)
        .await
        .unwrap();

        assert!(db.unsubscribe("u1", &sub.id).await.is_err());
        assert!(db.subscription("u1", &sub.id).await.unwrap().is_some());
        let doc = db.get_document(SAVED_ITEMS, &saved.id).await.unwrap().unwrap();
        assert_eq!(doc["feed"], json!(sub.id));
    }

    #[tokio::test]
    async fn test_unsave_item_checks_owner() {
        let db = test_db().await;
        let saved = db.save_item("u1", &item("https://x.example.com/1"), None, "X").await.unwrap();
        assert!(!db.unsave_item("u2", &saved.id).await.unwrap());
        assert!(db.unsave_item("u1", &saved.id).await.unwrap());
    }

    #[test]
    fn test_saved_item_filter() {
        let query = SearchQuery::from_pairs([("src_link", "https://x/1"), ("old_feed", "true")]);
        assert_eq!(
            saved_item_filter("u1", &query),
            Filter::And(vec![
                Filter::eq("owner", "u1"),
                Filter::eq("data.sourceLink", "https://x/1"),
                Filter::is_null("feed"),
            ])
        );
        assert_eq!(saved_item_filter("u1", &SearchQuery::default()), Filter::eq("owner", "u1"));
    }
}
