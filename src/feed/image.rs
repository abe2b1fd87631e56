//! Representative-image resolution for feed items.
//!
//! Publishers put the "main" image of an item in many different places. The
//! resolver walks an explicit, ordered list of extractors and keeps the first
//! hit, so the priority order is visible in one place ([`EXTRACTORS`]) and
//! every extractor can be tested on its own.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use super::parser::{RawFeed, RawItem};

/// One candidate source for an item's image.
pub type Extractor = fn(&RawFeed, &RawItem) -> Option<String>;

/// Image candidates in priority order. First `Some` wins.
pub const EXTRACTORS: [(&str, Extractor); 7] = [
    ("media_thumbnail", media_thumbnail),
    ("content_markup", content_markup),
    ("description_markup", description_markup),
    ("other_markup", other_markup),
    ("media_content", media_content),
    ("feed_image", feed_image),
    ("feed_icon", feed_icon),
];

/// Resolve the representative image URL for `item`.
pub fn resolve_image(feed: &RawFeed, item: &RawItem) -> Option<String> {
    EXTRACTORS.iter().find_map(|(name, extract)| {
        let found = extract(feed, item)?;
        tracing::trace!(extractor = name, url = %found, "Resolved item image");
        Some(found)
    })
}

fn media_thumbnail(_: &RawFeed, item: &RawItem) -> Option<String> {
    item.media_thumbnail.as_ref().and_then(image_from_structured)
}

fn content_markup(_: &RawFeed, item: &RawItem) -> Option<String> {
    item.content_encoded.as_deref().and_then(image_from_markup)
}

fn description_markup(_: &RawFeed, item: &RawItem) -> Option<String> {
    item.description.as_deref().and_then(image_from_markup)
}

fn other_markup(_: &RawFeed, item: &RawItem) -> Option<String> {
    item.content.as_deref().and_then(image_from_markup)
}

fn media_content(_: &RawFeed, item: &RawItem) -> Option<String> {
    item.media_content.as_ref().and_then(image_from_structured)
}

fn feed_image(feed: &RawFeed, _: &RawItem) -> Option<String> {
    feed.image.as_ref().and_then(image_from_structured)
}

fn feed_icon(feed: &RawFeed, _: &RawItem) -> Option<String> {
    feed.icon.as_ref().and_then(image_from_structured)
}

// ============================================================================
// Inline Markup
// ============================================================================

fn image_extension() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\.(?:jpe?g|png|gif|webp)(?:$|[?#])").expect("image extension pattern is valid")
    })
}

/// Whether a `src` value plausibly points at an image.
///
/// Accepts a known raster extension ending the path (a query string or
/// fragment may follow) or the literal token `image`. Rejects tracking
/// pixels such as `pixel.php`, including ones served from a host whose
/// name happens to contain `.jpg`.
pub fn looks_like_image(src: &str) -> bool {
    !src.is_empty() && (image_extension().is_match(src) || src.contains("image"))
}

/// Find the first image-like `src=` value in markup.
///
/// Successive `src=` occurrences are scanned; non-image values are skipped.
/// The value is returned unmodified, query string included.
pub fn image_from_markup(text: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }

    let mut rest = text;
    while let Some(pos) = rest.find("src=") {
        let (value, remainder) = attribute_value(&rest[pos + "src=".len()..]);
        if looks_like_image(value) {
            return Some(value.to_string());
        }
        rest = remainder;
    }
    None
}

/// Split an attribute value (quoted or bare) from the text that follows it.
fn attribute_value(s: &str) -> (&str, &str) {
    match s.chars().next() {
        Some(quote @ ('"' | '\'')) => {
            let body = &s[1..];
            match body.find(quote) {
                Some(end) => (&body[..end], &body[end + 1..]),
                None => (body, ""),
            }
        }
        _ => {
            let end = s
                .find(|c: char| c.is_whitespace() || c == '>')
                .unwrap_or(s.len());
            (&s[..end], &s[end..])
        }
    }
}

// ============================================================================
// Structured Candidates
// ============================================================================

/// Resolve a structured candidate (string, object or array) to a URL.
///
/// - non-empty string: used as is
/// - object: flattened, then the first value containing `http`; an array
///   value yields its first element only when that element is a string
/// - array: its first element is resolved the same way
pub fn image_from_structured(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => first_http_value(&flatten_object(map)),
        Value::Array(items) => match items.first()? {
            nested @ (Value::String(_) | Value::Object(_)) => image_from_structured(nested),
            _ => None,
        },
        _ => None,
    }
}

fn first_http_value(flat: &Map<String, Value>) -> Option<String> {
    for value in flat.values() {
        match value {
            Value::String(s) if s.contains("http") => return Some(s.clone()),
            Value::Array(items) if items.iter().any(|v| v.as_str().is_some_and(|s| s.contains("http"))) => {
                return items.first().and_then(Value::as_str).map(str::to_string);
            }
            _ => {}
        }
    }
    None
}

/// Flatten nested objects into one level. Arrays and scalars are kept as values;
/// on key collisions the deeper/later value wins, in the first key's position.
pub fn flatten_object(map: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        match value {
            Value::Object(inner) => {
                for (k, v) in flatten_object(inner) {
                    out.insert(k, v);
                }
            }
            other => {
                out.insert(key.clone(), other.clone());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn item() -> RawItem {
        RawItem {
            link: Some("https://example.com/item".into()),
            ..RawItem::default()
        }
    }

    #[test]
    fn test_tracking_pixel_rejected() {
        assert_eq!(image_from_markup(r#"<img src="pixel.php">"#), None);
    }

    #[test]
    fn test_extension_must_end_the_path() {
        assert_eq!(
            image_from_markup(r#"<img src="https://cdn.jpg.example.com/pixel.php">"#),
            None
        );
        assert!(!looks_like_image("https://x.example.com/banner.png.php"));
        assert!(looks_like_image("https://x.example.com/banner.PNG#top"));
    }

    #[test]
    fn test_query_string_kept() {
        assert_eq!(
            image_from_markup(r#"<img src="a.com/x.jpg?w=200">"#).as_deref(),
            Some("a.com/x.jpg?w=200")
        );
    }

    #[test]
    fn test_scans_past_non_images() {
        let html = r#"<img src="https://t.example.com/pixel.gifx"><img src='https://cdn.example.com/photo.WEBP' alt="">"#;
        assert_eq!(
            image_from_markup(html).as_deref(),
            Some("https://cdn.example.com/photo.WEBP")
        );
    }

    #[test]
    fn test_image_token_accepted() {
        assert_eq!(
            image_from_markup("<img src=https://cdn.example.com/image/42 />").as_deref(),
            Some("https://cdn.example.com/image/42")
        );
    }

    #[test]
    fn test_empty_and_missing_src() {
        assert_eq!(image_from_markup(""), None);
        assert_eq!(image_from_markup("<img />"), None);
        assert_eq!(image_from_markup(r#"<img src="" />"#), None);
        assert_eq!(image_from_markup(r#"<img src="unterminated.png"#), Some("unterminated.png".into()));
    }

    #[test]
    fn test_flatten_object_levels() {
        let nested = json!({"level1": {"level2": {"level3": "value"}}, "keep": [1, 2], "n": null});
        let flat = flatten_object(nested.as_object().unwrap());
        assert_eq!(Value::Object(flat), json!({"level3": "value", "keep": [1, 2], "n": null}));

        let empty = flatten_object(&Map::new());
        assert!(empty.is_empty());
    }

    #[test]
    fn test_structured_candidates() {
        assert_eq!(
            image_from_structured(&json!({"$": {"url": "https://cdn.example.com/a.jpg", "width": "120"}})),
            Some("https://cdn.example.com/a.jpg".into())
        );
        assert_eq!(
            image_from_structured(&json!({"$": {"medium": "image", "url": ["https://x/1.jpg", "https://x/2.jpg"]}})),
            Some("https://x/1.jpg".into())
        );
        // Array whose first element is not a string
        assert_eq!(
            image_from_structured(&json!({"url": [{"href": "x"}, "https://x/2.jpg"]})),
            None
        );
        assert_eq!(image_from_structured(&json!({"width": 10})), None);
        assert_eq!(image_from_structured(&json!("")), None);
        assert_eq!(
            image_from_structured(&json!([{"url": "https://x/first.png"}])),
            Some("https://x/first.png".into())
        );
    }

    #[test]
    fn test_priority_order() {
        let feed = RawFeed {
            image: Some(json!({"url": "https://feed.example.com/logo.png"})),
            icon: Some(json!("https://feed.example.com/icon.ico")),
            ..RawFeed::default()
        };

        let mut raw = item();
        raw.media_content = Some(json!({"$": {"url": "https://m.example.com/content.jpg"}}));
        raw.description = Some(r#"<img src="https://d.example.com/desc.png">"#.into());
        raw.content_encoded = Some(r#"<img src="https://c.example.com/full.png">"#.into());
        assert_eq!(resolve_image(&feed, &raw).as_deref(), Some("https://c.example.com/full.png"));

        raw.media_thumbnail = Some(json!({"$": {"url": "https://t.example.com/thumb.jpg"}}));
        assert_eq!(resolve_image(&feed, &raw).as_deref(), Some("https://t.example.com/thumb.jpg"));

        let mut raw = item();
        raw.content_encoded = Some(r#"<img src="pixel.php">"#.into());
        raw.media_content = Some(json!({"$": {"url": "https://m.example.com/content.jpg"}}));
        assert_eq!(resolve_image(&feed, &raw).as_deref(), Some("https://m.example.com/content.jpg"));

        let raw = item();
        assert_eq!(resolve_image(&feed, &raw).as_deref(), Some("https://feed.example.com/logo.png"));

        let icon_only = RawFeed {
            icon: Some(json!("https://feed.example.com/icon.ico")),
            ..RawFeed::default()
        };
        assert_eq!(resolve_image(&icon_only, &raw).as_deref(), Some("https://feed.example.com/icon.ico"));
        assert_eq!(resolve_image(&RawFeed::default(), &raw), None);
    }
}
