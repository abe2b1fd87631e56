//! Small helpers shared across the crate.
//!
//! - **URL validation**: scheme and host checks for feed sources (SSRF guard)
//! - **Text processing**: turning feed markup into plain snippet text

mod text;
mod url_validator;

pub use text::{decode_entities, strip_control_chars, strip_markup};
pub use url_validator::{require_https, validate_feed_url, UrlValidationError};
