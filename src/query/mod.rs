//! Query shaping: client search parameters to document-store pipelines.
//!
//! - [`params`]: the raw [`SearchQuery`] and its validation-with-default rules
//! - [`pipeline`]: stage descriptors ([`Stage`], [`Filter`], [`Projection`])
//! - [`shaper`]: [`QueryShaper`], which assembles pipelines and pagination cursors

mod params;
mod pipeline;
mod shaper;

pub use params::{
    parse_field_list, resolve_limit, resolve_skip, resolve_start_index, SearchQuery,
    ALLOWED_LIMITS, DEFAULT_LIMIT,
};
pub use pipeline::{Filter, Pipeline, Projection, SortDirection, SortKey, Stage};
pub use shaper::{PaginationCursor, QueryShaper, VERSION_FIELD};
