//! Read pipelines as explicit, ordered stage descriptors.
//!
//! A [`Pipeline`] is plain data: it is built up front by the
//! [`QueryShaper`](super::QueryShaper) and handed, fully formed, to the store.
//! Cloning a pipeline yields an independent copy, so the data read and the
//! count read can never drift apart through shared mutation.

use serde_json::{Map, Value};

/// Match predicate over document fields.
///
/// Field names use dotted paths (`data.sourceLink`) to reach nested values.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document.
    All,
    /// Field equals the given JSON value. `Value::Null` matches absent fields too.
    Eq { field: String, value: Value },
    /// Field is absent or null.
    IsNull { field: String },
    /// Field equals one of the values. An empty list matches nothing.
    In { field: String, values: Vec<Value> },
    /// Case-insensitive substring search across several fields.
    Contains { fields: Vec<String>, needle: String },
    /// Every nested filter matches.
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Filter::IsNull {
            field: field.into(),
        }
    }

    pub fn one_of<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(fields: &[&str], needle: impl Into<String>) -> Self {
        Filter::Contains {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            needle: needle.into(),
        }
    }

    /// Conjunction of `self` and `other`, flattening `All` and nested `And`s.
    pub fn and(self, other: Filter) -> Filter {
        let mut parts = Vec::new();
        for filter in [self, other] {
            match filter {
                Filter::All => {}
                Filter::And(inner) => parts.extend(inner),
                f => parts.push(f),
            }
        }
        match parts.len() {
            0 => Filter::All,
            1 => parts.remove(0),
            _ => Filter::And(parts),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// One key of a multi-key sort. Earlier keys take precedence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// Field projection. Inclusion and exclusion are never mixed in one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    Include(Vec<String>),
    Exclude(Vec<String>),
}

impl Projection {
    /// Apply the projection to one document. Non-object documents pass through.
    pub fn apply(&self, doc: Value) -> Value {
        let Value::Object(source) = doc else {
            return doc;
        };
        match self {
            Projection::Include(fields) => {
                let mut out = Map::new();
                for field in fields {
                    let path: Vec<&str> = field.split('.').collect();
                    if let Some(value) = lookup(&source, &path) {
                        insert_path(&mut out, &path, value.clone());
                    }
                }
                Value::Object(out)
            }
            Projection::Exclude(fields) => {
                let mut out = source;
                for field in fields {
                    let path: Vec<&str> = field.split('.').collect();
                    remove_path(&mut out, &path);
                }
                Value::Object(out)
            }
        }
    }
}

fn lookup<'a>(map: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (head, rest) = path.split_first()?;
    let value = map.get(*head)?;
    if rest.is_empty() {
        return Some(value);
    }
    match value {
        Value::Object(inner) => lookup(inner, rest),
        _ => None,
    }
}

fn insert_path(map: &mut Map<String, Value>, path: &[&str], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };
    if rest.is_empty() {
        map.insert(head.to_string(), value);
        return;
    }
    let entry = map
        .entry(head.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(inner) = entry {
        insert_path(inner, rest, value);
    }
}

fn remove_path(map: &mut Map<String, Value>, path: &[&str]) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };
    if rest.is_empty() {
        map.remove(*head);
    } else if let Some(Value::Object(inner)) = map.get_mut(*head) {
        remove_path(inner, rest);
    }
}

/// One pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Sort(Vec<SortKey>),
    Project(Projection),
    Skip(u64),
    Limit(u64),
    /// Replace the result set with a single `{ <field>: count }` document.
    Count(String),
    /// Store-specific stage. Adapters reject names they do not know.
    Custom { name: String, spec: Value },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn push(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }
}
