use serde::Deserialize;

// ============================================================================
// Pagination Defaults
// ============================================================================

/// Page sizes a client may request. Anything else falls back to [`DEFAULT_LIMIT`].
pub const ALLOWED_LIMITS: [u64; 10] = [1, 2, 3, 4, 5, 10, 15, 20, 30, 40];

/// Page size used when the requested limit is missing or not in [`ALLOWED_LIMITS`].
pub const DEFAULT_LIMIT: u64 = 20;

/// Client-supplied search parameters, exactly as they arrive in a query string.
///
/// Every field is an optional raw string. Absence means "use the default";
/// interpretation happens in the `resolve_*` functions and in
/// [`QueryShaper`](super::QueryShaper), never here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    pub limit: Option<String>,
    pub skip: Option<String>,
    #[serde(rename = "startIndex")]
    pub start_index: Option<String>,
    pub sort: Option<String>,
    pub project: Option<String>,
    pub q: Option<String>,
    pub url_id: Option<String>,
    pub src_link: Option<String>,
    #[serde(rename = "sortBy")]
    pub sort_by: Option<String>,
    pub old_feed: Option<String>,
    /// Accepted for compatibility with older clients; carries no behaviour.
    pub show: Option<String>,
}

impl SearchQuery {
    /// Build a query from decoded query-string pairs.
    ///
    /// Unknown keys are ignored. A repeated key keeps its last value.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut query = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_ref() {
                "limit" => &mut query.limit,
                "skip" => &mut query.skip,
                "startIndex" => &mut query.start_index,
                "sort" => &mut query.sort,
                "project" => &mut query.project,
                "q" => &mut query.q,
                "url_id" => &mut query.url_id,
                "src_link" => &mut query.src_link,
                "sortBy" => &mut query.sort_by,
                "old_feed" => &mut query.old_feed,
                "show" => &mut query.show,
                other => {
                    tracing::debug!(key = %other, "Ignoring unknown search parameter");
                    continue;
                }
            };
            *slot = Some(value.into());
        }
        query
    }

    /// Page size after validation against [`ALLOWED_LIMITS`].
    pub fn resolved_limit(&self) -> u64 {
        resolve_limit(self.limit.as_deref())
    }

    /// Offset after coercion (non-numeric or negative becomes 0).
    pub fn resolved_skip(&self) -> u64 {
        resolve_skip(self.skip.as_deref())
    }

    /// Source-list cursor; `None` means the walk is already exhausted.
    pub fn resolved_start_index(&self) -> Option<usize> {
        resolve_start_index(self.start_index.as_deref())
    }

    /// Free-text search term, trimmed. Blank terms count as absent.
    pub fn text(&self) -> Option<&str> {
        non_blank(self.q.as_deref())
    }

    /// Whether the `old_feed` flag is set (`true`, `1` or `yes`).
    pub fn wants_old_feeds(&self) -> bool {
        parse_flag(self.old_feed.as_deref())
    }
}

// ============================================================================
// Validation With Defaults
// ============================================================================

/// Resolve a requested page size.
///
/// Only values in [`ALLOWED_LIMITS`] are honoured; everything else, including
/// non-numeric input, silently becomes [`DEFAULT_LIMIT`].
pub fn resolve_limit(raw: Option<&str>) -> u64 {
    match raw.map(str::trim).and_then(|s| s.parse::<u64>().ok()) {
        Some(limit) if ALLOWED_LIMITS.contains(&limit) => limit,
        Some(limit) => {
            tracing::debug!(requested = limit, fallback = DEFAULT_LIMIT, "Limit not allowed");
            DEFAULT_LIMIT
        }
        None => DEFAULT_LIMIT,
    }
}

/// Resolve a requested offset. Missing, negative and non-numeric input yield 0.
pub fn resolve_skip(raw: Option<&str>) -> u64 {
    raw.map(str::trim)
        .and_then(|s| s.parse::<i64>().ok())
        .map(|n| n.max(0) as u64)
        .unwrap_or(0)
}

/// Resolve a source-list cursor.
///
/// - missing, blank or non-numeric: start from the beginning (`Some(0)`)
/// - negative: clamped to `Some(0)`
/// - the literal `null` (a client echoing back an exhausted cursor): `None`
/// - anything else is taken verbatim; range checks belong to the walker
pub fn resolve_start_index(raw: Option<&str>) -> Option<usize> {
    let Some(raw) = non_blank(raw) else {
        return Some(0);
    };
    if raw.eq_ignore_ascii_case("null") {
        return None;
    }
    match raw.parse::<i64>() {
        Ok(n) if n < 0 => Some(0),
        Ok(n) => Some(usize::try_from(n).unwrap_or(usize::MAX)),
        Err(_) => Some(0),
    }
}

/// Split a comma list into `(field, negated)` pairs.
///
/// A leading `-` marks the token as negated. Blank tokens are dropped.
pub fn parse_field_list(raw: &str) -> Vec<(String, bool)> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(|token| match token.strip_prefix('-') {
            Some(field) if field.trim().is_empty() => None,
            Some(field) => Some((field.trim().to_string(), true)),
            None => Some((token.to_string(), false)),
        })
        .collect()
}

fn parse_flag(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|s| s.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "1" | "yes")
    )
}

fn non_blank(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}
