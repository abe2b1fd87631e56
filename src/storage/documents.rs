use serde_json::{Map, Value};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::schema::Database;
use super::types::DatabaseError;
use crate::query::{Filter, Pipeline, Projection, SortDirection, SortKey, Stage, VERSION_FIELD};

impl Database {
    // ========================================================================
    // Document Operations
    // ========================================================================

    /// Insert a JSON object into `collection` and return the stored body.
    ///
    /// A string `id` in the body is kept; otherwise a UUID is assigned.
    /// The internal version field starts at 0.
    pub async fn insert_document(&self, collection: &str, body: Value) -> Result<Value, DatabaseError> {
        let Value::Object(mut body) = body else {
            return Err(DatabaseError::Validation("document body must be a JSON object".into()));
        };

        let id = match body.get("id").and_then(Value::as_str) {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        };
        body.insert("id".into(), Value::String(id.clone()));
        body.insert(VERSION_FIELD.into(), Value::from(0));

        let body = Value::Object(body);
        let text = serde_json::to_string(&body)?;
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO documents (collection, id, body, folded, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(collection)
        .bind(&id)
        .bind(&text)
        .bind(fold_case(&text))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::debug!(collection = %collection, id = %id, "Inserted document");
        Ok(body)
    }

    pub async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Value>, DatabaseError> {
        let body: Option<String> =
            sqlx::query_scalar("SELECT body FROM documents WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        body.map(|b| serde_json::from_str(&b)).transpose().map_err(Into::into)
    }

    /// Merge `patch` into an existing document (top-level keys overwrite).
    ///
    /// `id` and the version field cannot be patched; the version is bumped.
    /// Returns `None` when the document does not exist.
    pub async fn update_document(
        &self,
        collection: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<Option<Value>, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT body FROM documents WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(current) = current else {
            return Ok(None);
        };

        let mut body: Map<String, Value> = serde_json::from_str(&current)?;
        let version = body.get(VERSION_FIELD).and_then(Value::as_i64).unwrap_or(0);
        for (key, value) in patch {
            if key != "id" && key != VERSION_FIELD {
                body.insert(key, value);
            }
        }
        body.insert(VERSION_FIELD.into(), Value::from(version + 1));
        let body = Value::Object(body);
        let text = serde_json::to_string(&body)?;

        sqlx::query("UPDATE documents SET body = ?, folded = ?, updated_at = ? WHERE collection = ? AND id = ?")
            .bind(&text)
            .bind(fold_case(&text))
            .bind(chrono::Utc::now().timestamp())
            .bind(collection)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Some(body))
    }

    /// Set one (possibly nested) field on every document matching `filter`.
    ///
    /// Returns the number of documents changed.
    pub async fn set_field_where(
        &self,
        collection: &str,
        filter: &Filter,
        field: &str,
        value: &Value,
    ) -> Result<u64, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        set_field_where_in(&mut *conn, collection, filter, field, value).await
    }

    pub async fn delete_document(&self, collection: &str, id: &str) -> Result<bool, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        delete_document_in(&mut *conn, collection, id).await
    }

    // ========================================================================
    // Pipeline Execution
    // ========================================================================

    /// Run a read pipeline against one collection.
    ///
    /// Match, sort, skip, limit and count compile to a single SQL statement;
    /// projections are applied to the returned bodies. Stages must follow
    /// match → sort → skip → limit → count, with projections anywhere after
    /// the last match/sort and before the count.
    ///
    /// # Errors
    ///
    /// - [`DatabaseError::UnsupportedStage`] for any `Custom` stage
    /// - [`DatabaseError::InvalidPipeline`] for stages out of order or repeated
    pub async fn aggregate(&self, collection: &str, pipeline: &Pipeline) -> Result<Vec<Value>, DatabaseError> {
        let plan = Plan::compile(pipeline)?;

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("");
        if plan.count.is_some() {
            builder.push("SELECT COUNT(*) FROM (");
        }
        builder.push("SELECT body FROM documents WHERE collection = ");
        builder.push_bind(collection.to_string());
        for filter in &plan.filters {
            builder.push(" AND ");
            push_filter(&mut builder, filter);
        }

        if plan.count.is_none() || plan.skip.is_some() || plan.limit.is_some() {
            builder.push(" ORDER BY ");
            for key in plan.sort {
                push_sort_key(&mut builder, key);
                builder.push(", ");
            }
            builder.push("rowid");
        }

        if plan.skip.is_some() || plan.limit.is_some() {
            // SQLite requires LIMIT before OFFSET; -1 means unbounded.
            let limit = plan.limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX)).unwrap_or(-1);
            builder.push(" LIMIT ");
            builder.push_bind(limit);
            builder.push(" OFFSET ");
            builder.push_bind(i64::try_from(plan.skip.unwrap_or(0)).unwrap_or(i64::MAX));
        }

        if let Some(field) = plan.count {
            builder.push(")");
            let total: i64 = builder.build_query_scalar().fetch_one(&self.pool).await?;
            tracing::debug!(collection = %collection, total = total, "Count pipeline executed");
            let mut row = Map::new();
            row.insert(field.to_string(), Value::from(total.max(0)));
            return Ok(vec![Value::Object(row)]);
        }

        let bodies: Vec<String> = builder.build_query_scalar().fetch_all(&self.pool).await?;
        tracing::debug!(
            collection = %collection,
            stages = pipeline.stages().len(),
            rows = bodies.len(),
            "Data pipeline executed"
        );

        bodies
            .iter()
            .map(|body| {
                let doc: Value = serde_json::from_str(body)?;
                Ok(plan.projections.iter().fold(doc, |doc, p| p.apply(doc)))
            })
            .collect()
    }
}

// ============================================================================
// Connection-Level Writes
// ============================================================================

// These take a plain connection so callers can compose them inside one
// transaction (`&mut *tx`).

pub(super) async fn set_field_where_in(
    conn: &mut SqliteConnection,
    collection: &str,
    filter: &Filter,
    field: &str,
    value: &Value,
) -> Result<u64, DatabaseError> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE documents SET body = json_set(body, ");
    builder.push_bind(json_path(VERSION_FIELD));
    builder.push(", COALESCE(json_extract(body, ");
    builder.push_bind(json_path(VERSION_FIELD));
    builder.push("), 0) + 1, ");
    builder.push_bind(json_path(field));
    builder.push(", json(");
    builder.push_bind(value.to_string());
    builder.push(")), folded = json_set(folded, ");
    builder.push_bind(json_path(&fold_case(field)));
    builder.push(", json(");
    builder.push_bind(fold_case(&value.to_string()));
    builder.push(")), updated_at = ");
    builder.push_bind(chrono::Utc::now().timestamp());
    builder.push(" WHERE collection = ");
    builder.push_bind(collection.to_string());
    builder.push(" AND ");
    push_filter(&mut builder, filter);

    let result = builder.build().execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

pub(super) async fn delete_document_in(
    conn: &mut SqliteConnection,
    collection: &str,
    id: &str,
) -> Result<bool, DatabaseError> {
    let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
        .bind(collection)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Pipeline Compilation
// ============================================================================

#[derive(Default)]
struct Plan<'p> {
    filters: Vec<&'p Filter>,
    sort: &'p [SortKey],
    projections: Vec<&'p Projection>,
    skip: Option<u64>,
    limit: Option<u64>,
    count: Option<&'p str>,
}

impl<'p> Plan<'p> {
    fn compile(pipeline: &'p Pipeline) -> Result<Self, DatabaseError> {
        let mut plan = Plan::default();
        let mut rank = 0u8;

        for stage in pipeline.stages() {
            let (name, stage_rank) = match stage {
                Stage::Match(_) => ("match", 0),
                Stage::Sort(_) => ("sort", 1),
                Stage::Project(_) => ("project", 2),
                Stage::Skip(_) => ("skip", 3),
                Stage::Limit(_) => ("limit", 4),
                Stage::Count(_) => ("count", 5),
                Stage::Custom { name, .. } => {
                    return Err(DatabaseError::UnsupportedStage(name.clone()));
                }
            };

            // Projections are order-neutral among skip/limit, so they do not raise the rank.
            let effective_rank = if stage_rank == 2 { rank.max(2) } else { stage_rank };
            if effective_rank < rank || (effective_rank == rank && stage_rank != 0 && stage_rank != 2) {
                return Err(DatabaseError::InvalidPipeline(format!(
                    "{name} stage is repeated or out of order"
                )));
            }
            if stage_rank == 2 && plan.count.is_some() {
                return Err(DatabaseError::InvalidPipeline("project stage after count".into()));
            }
            rank = effective_rank;

            match stage {
                Stage::Match(filter) => plan.filters.push(filter),
                Stage::Sort(keys) => plan.sort = keys.as_slice(),
                Stage::Project(projection) => plan.projections.push(projection),
                Stage::Skip(n) => plan.skip = Some(*n),
                Stage::Limit(n) => plan.limit = Some(*n),
                Stage::Count(field) => plan.count = Some(field.as_str()),
                Stage::Custom { .. } => {}
            }
        }

        Ok(plan)
    }
}

/// SQLite JSON path for a dotted field name, with every segment quoted.
fn json_path(field: &str) -> String {
    let mut path = String::from("$");
    for segment in field.split('.') {
        path.push_str(".\"");
        path.push_str(&segment.replace('"', ""));
        path.push('"');
    }
    path
}

/// Unicode lowercase of serialized JSON. Keys fold along with values, and
/// serde_json only emits lowercase escapes, so the result stays valid JSON.
fn fold_case(json: &str) -> String {
    json.to_lowercase()
}

fn push_extract(builder: &mut QueryBuilder<'_, Sqlite>, field: &str) {
    builder.push("json_extract(body, ");
    builder.push_bind(json_path(field));
    builder.push(")");
}

fn push_sort_key(builder: &mut QueryBuilder<'_, Sqlite>, key: &SortKey) {
    push_extract(builder, &key.field);
    builder.push(match key.direction {
        SortDirection::Ascending => " ASC",
        SortDirection::Descending => " DESC",
    });
}

/// Bind a JSON value so that it compares equal to `json_extract` output.
fn push_json_value(builder: &mut QueryBuilder<'_, Sqlite>, value: &Value) {
    match value {
        Value::Null => {
            builder.push("NULL");
        }
        Value::Bool(b) => {
            builder.push_bind(i64::from(*b));
        }
        Value::Number(n) => match n.as_i64() {
            Some(i) => {
                builder.push_bind(i);
            }
            None => {
                builder.push_bind(n.as_f64().unwrap_or_default());
            }
        },
        Value::String(s) => {
            builder.push_bind(s.clone());
        }
        composite => {
            builder.push("json(");
            builder.push_bind(composite.to_string());
            builder.push(")");
        }
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &Filter) {
    match filter {
        Filter::All => {
            builder.push("1");
        }
        Filter::Eq { field, value: Value::Null } | Filter::IsNull { field } => {
            push_extract(builder, field);
            builder.push(" IS NULL");
        }
        Filter::Eq { field, value } => {
            push_extract(builder, field);
            builder.push(" = ");
            push_json_value(builder, value);
        }
        Filter::In { values, .. } if values.is_empty() => {
            builder.push("0");
        }
        Filter::In { field, values } => {
            push_extract(builder, field);
            builder.push(" IN (");
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                push_json_value(builder, value);
            }
            builder.push(")");
        }
        Filter::Contains { fields, .. } if fields.is_empty() => {
            builder.push("0");
        }
        // Matched against the case-folded copy of the body, folded on both sides.
        Filter::Contains { fields, needle } => {
            let needle = fold_case(needle);
            builder.push("(");
            for (i, field) in fields.iter().enumerate() {
                if i > 0 {
                    builder.push(" OR ");
                }
                builder.push("instr(CAST(json_extract(folded, ");
                builder.push_bind(json_path(&fold_case(field)));
                builder.push(") AS TEXT), ");
                builder.push_bind(needle.clone());
                builder.push(") > 0");
            }
            builder.push(")");
        }
        Filter::And(filters) if filters.is_empty() => {
            builder.push("1");
        }
        Filter::And(filters) => {
            builder.push("(");
            for (i, f) in filters.iter().enumerate() {
                if i > 0 {
                    builder.push(" AND ");
                }
                push_filter(builder, f);
            }
            builder.push(")");
        }
    }
}
