use serde::Serialize;

use super::params::{parse_field_list, SearchQuery};
use super::pipeline::{Filter, Pipeline, Projection, SortKey, Stage};
use crate::storage::{Database, DatabaseError};

/// Internal version field hidden by the default projection.
pub const VERSION_FIELD: &str = "_version";

/// Field name of the single document produced by the count pipeline.
const COUNT_FIELD: &str = "totalRecords";

/// Pagination metadata returned next to a page of stored documents.
///
/// `next` is `None` exactly when `skip + limit >= total_records`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationCursor {
    pub total_records: u64,
    pub page_limit: u64,
    pub next: Option<u64>,
}

impl PaginationCursor {
    pub fn compute(skip: u64, limit: u64, total_records: u64) -> Self {
        let end = skip.saturating_add(limit);
        Self {
            total_records,
            page_limit: limit,
            next: (end < total_records).then_some(end),
        }
    }
}

/// Turns a [`SearchQuery`] into store pipelines.
///
/// The match filter is held separately from the other stages and prepended
/// to every pipeline the shaper emits, so the data read and the count read
/// always share the identical predicate.
///
/// ```ignore
/// let shaper = QueryShaper::new(Filter::All, &query)
///     .search_text(&["name"])
///     .sort(Some("name"))
///     .project(None)
///     .paginate();
/// let rows = db.aggregate("categories", &shaper.pipeline()).await?;
/// let cursor = shaper.pagination_cursor(&db, "categories", rows.len()).await?;
/// ```
#[derive(Debug, Clone)]
pub struct QueryShaper<'q> {
    query: &'q SearchQuery,
    filter: Filter,
    stages: Vec<Stage>,
}

impl<'q> QueryShaper<'q> {
    pub fn new(filter: Filter, query: &'q SearchQuery) -> Self {
        Self {
            query,
            filter,
            stages: Vec::new(),
        }
    }

    /// Narrow the match filter further. Applies to data and count alike.
    pub fn filter(mut self, extra: Filter) -> Self {
        self.filter = std::mem::replace(&mut self.filter, Filter::All).and(extra);
        self
    }

    /// Fold the free-text `q` parameter into the match filter.
    pub fn search_text(self, fields: &[&str]) -> Self {
        let query = self.query;
        match query.text() {
            Some(needle) if !fields.is_empty() => self.filter(Filter::contains(fields, needle)),
            _ => self,
        }
    }

    /// Add a sort stage from `sort`, then `sortBy`, then `default_field`.
    ///
    /// Tokens are applied in listed order (the first is the primary key);
    /// a leading `-` sorts descending. Unknown fields are passed through and
    /// sort as absent values. With no source at all, no stage is added.
    pub fn sort(mut self, default_field: Option<&str>) -> Self {
        let raw = [self.query.sort.as_deref(), self.query.sort_by.as_deref(), default_field]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty());

        let keys: Vec<SortKey> = raw
            .map(parse_field_list)
            .unwrap_or_default()
            .into_iter()
            .map(|(field, descending)| {
                if descending {
                    SortKey::desc(field)
                } else {
                    SortKey::asc(field)
                }
            })
            .collect();

        if !keys.is_empty() {
            self.stages.push(Stage::Sort(keys));
        }
        self
    }

    /// Add a projection stage.
    ///
    /// With `project` present, the first token decides between inclusion and
    /// exclusion; tokens of the other kind are dropped. Inclusion always keeps
    /// `id`. Without `project`, `default_exclude` (or the internal version
    /// field) is hidden.
    pub fn project(mut self, default_exclude: Option<&str>) -> Self {
        let tokens = self
            .query
            .project
            .as_deref()
            .map(parse_field_list)
            .unwrap_or_default();

        let projection = match tokens.first() {
            None => {
                let fields = default_exclude
                    .map(parse_field_list)
                    .map(|list| list.into_iter().map(|(f, _)| f).collect())
                    .unwrap_or_else(|| vec![VERSION_FIELD.to_string()]);
                Projection::Exclude(fields)
            }
            Some(&(_, exclude_mode)) => {
                let (kept, dropped): (Vec<_>, Vec<_>) =
                    tokens.into_iter().partition(|(_, negated)| *negated == exclude_mode);
                if !dropped.is_empty() {
                    tracing::warn!(
                        dropped = dropped.len(),
                        "Projection mixes inclusion and exclusion, ignoring conflicting fields"
                    );
                }
                let mut fields: Vec<String> = kept.into_iter().map(|(f, _)| f).collect();
                if exclude_mode {
                    Projection::Exclude(fields)
                } else {
                    if !fields.iter().any(|f| f == "id") {
                        fields.insert(0, "id".to_string());
                    }
                    Projection::Include(fields)
                }
            }
        };

        self.stages.push(Stage::Project(projection));
        self
    }

    pub fn skip(mut self) -> Self {
        self.stages.push(Stage::Skip(self.query.resolved_skip()));
        self
    }

    pub fn limit(mut self) -> Self {
        self.stages.push(Stage::Limit(self.query.resolved_limit()));
        self
    }

    /// Shorthand for `.skip().limit()`.
    pub fn paginate(self) -> Self {
        self.skip().limit()
    }

    pub fn match_filter(&self) -> &Filter {
        &self.filter
    }

    /// The data pipeline: match, then every stage added so far.
    pub fn pipeline(&self) -> Pipeline {
        let mut pipeline = Pipeline::new().with(Stage::Match(self.filter.clone()));
        for stage in &self.stages {
            pipeline.push(stage.clone());
        }
        pipeline
    }

    /// The count pipeline: the same match, then a count.
    pub fn count_pipeline(&self) -> Pipeline {
        Pipeline::new()
            .with(Stage::Match(self.filter.clone()))
            .with(Stage::Count(COUNT_FIELD.to_string()))
    }

    /// Compute the cursor for a page of `matched_count` returned documents.
    ///
    /// Issues a second read (the count pipeline). The two reads are not
    /// transactionally consistent; a concurrent write in between can yield a
    /// stale cursor.
    pub async fn pagination_cursor(
        &self,
        db: &Database,
        collection: &str,
        matched_count: usize,
    ) -> Result<PaginationCursor, DatabaseError> {
        let rows = db.aggregate(collection, &self.count_pipeline()).await?;
        let total_records = rows
            .first()
            .and_then(|row| row.get(COUNT_FIELD))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        let cursor = PaginationCursor::compute(
            self.query.resolved_skip(),
            self.query.resolved_limit(),
            total_records,
        );
        tracing::debug!(
            collection = %collection,
            matched = matched_count,
            total = total_records,
            next = ?cursor.next,
            "Computed pagination cursor"
        );
        Ok(cursor)
    }
}
