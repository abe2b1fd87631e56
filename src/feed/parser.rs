use feed_rs::model::{Entry, Image, MediaObject};
use feed_rs::parser;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A feed as it arrives from a source, before normalization.
///
/// Structured candidates (`image`, `icon`, `media_thumbnail`,
/// `media_content`) are kept as free-form JSON because their shape differs
/// wildly between publishers: a bare URL string, an attribute object, a
/// nested object, or an array of any of these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawFeed {
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub image: Option<Value>,
    pub icon: Option<Value>,
    pub items: Vec<RawItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawItem {
    pub title: Option<String>,
    pub link: Option<String>,
    /// Full content (`content:encoded` or Atom `<content>`)
    pub content_encoded: Option<String>,
    pub description: Option<String>,
    /// Any other markup-bearing field (e.g. `media:description`)
    pub content: Option<String>,
    pub content_snippet: Option<String>,
    pub media_thumbnail: Option<Value>,
    pub media_content: Option<Value>,
    pub author: Option<String>,
    pub pub_date: Option<String>,
}

/// Parse RSS/Atom/JSON Feed bytes into a [`RawFeed`].
pub fn parse_feed(bytes: &[u8]) -> Result<RawFeed, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;

    Ok(RawFeed {
        title: feed.title.map(|t| t.content),
        link: feed.links.first().map(|l| l.href.clone()),
        description: feed.description.map(|t| t.content),
        image: feed.logo.as_ref().map(image_value),
        icon: feed.icon.as_ref().map(image_value),
        items: feed.entries.into_iter().map(raw_item).collect(),
    })
}

/// Parse a stored JSON raw-feed document.
pub fn parse_raw_document(doc: Value) -> Result<RawFeed, serde_json::Error> {
    serde_json::from_value(doc)
}

fn raw_item(entry: Entry) -> RawItem {
    let media_thumbnail = thumbnail_value(&entry.media);
    let media_content = media_content_value(&entry.media);
    let media_description = entry
        .media
        .iter()
        .find_map(|m| m.description.as_ref().map(|d| d.content.clone()));

    RawItem {
        title: entry.title.map(|t| t.content),
        link: entry.links.first().map(|l| l.href.clone()),
        content_encoded: entry.content.and_then(|c| c.body),
        description: entry.summary.map(|s| s.content),
        content: media_description,
        content_snippet: None,
        media_thumbnail,
        media_content,
        author: entry.authors.first().map(|p| p.name.clone()),
        pub_date: entry.published.or(entry.updated).map(|d| d.to_rfc3339()),
    }
}

fn image_value(image: &Image) -> Value {
    json!({
        "url": image.uri,
        "title": image.title,
        "width": image.width,
        "height": image.height,
    })
}

fn thumbnail_value(media: &[MediaObject]) -> Option<Value> {
    let thumbnail = media.iter().flat_map(|m| m.thumbnails.iter()).next()?;
    Some(json!({
        "$": {
            "url": thumbnail.image.uri,
            "width": thumbnail.image.width,
            "height": thumbnail.image.height,
        }
    }))
}

/// Media content as attribute objects; several entries collapse into a URL list.
fn media_content_value(media: &[MediaObject]) -> Option<Value> {
    let contents: Vec<_> = media.iter().flat_map(|m| m.content.iter()).collect();
    match contents.as_slice() {
        [] => None,
        [single] => Some(json!({
            "$": {
                "url": single.url.as_ref().map(|u| u.to_string()),
                "type": single.content_type.as_ref().map(|m| m.to_string()),
                "width": single.width,
                "height": single.height,
            }
        })),
        many => Some(json!({
            "$": {
                "url": many
                    .iter()
                    .filter_map(|c| c.url.as_ref().map(|u| u.to_string()))
                    .collect::<Vec<_>>(),
            }
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEDIA_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/" xmlns:content="http://purl.org/rss/1.0/modules/content/">
<channel>
    <title>Media Feed</title>
    <link>https://media.example.com</link>
    <description>Pictures and words</description>
    <image><url>https://media.example.com/logo.png</url><title>Logo</title><link>https://media.example.com</link></image>
    <item>
        <title>With thumbnail</title>
        <link>https://media.example.com/1</link>
        <description>Plain summary</description>
        <media:thumbnail url="https://cdn.example.com/thumb.jpg" width="120" height="80"/>
        <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
    </item>
    <item>
        <title>With content</title>
        <link>https://media.example.com/2</link>
        <content:encoded><![CDATA[<p><img src="https://cdn.example.com/inline.png"></p>]]></content:encoded>
    </item>
</channel>
</rss>"#;

    #[test]
    fn test_parse_rss_maps_fields() {
        let raw = parse_feed(MEDIA_RSS.as_bytes()).unwrap();
        assert_eq!(raw.title.as_deref(), Some("Media Feed"));
        assert_eq!(raw.description.as_deref(), Some("Pictures and words"));
        assert_eq!(raw.items.len(), 2);

        let first = &raw.items[0];
        assert_eq!(first.link.as_deref(), Some("https://media.example.com/1"));
        assert_eq!(first.description.as_deref(), Some("Plain summary"));
        assert!(first.pub_date.is_some());
        let thumb = first.media_thumbnail.as_ref().unwrap();
        assert_eq!(thumb["$"]["url"], "https://cdn.example.com/thumb.jpg");

        let second = &raw.items[1];
        assert!(second
            .content_encoded
            .as_deref()
            .unwrap()
            .contains("inline.png"));
    }

    #[test]
    fn test_parse_malformed_feed_fails() {
        assert!(parse_feed(b"<not valid xml").is_err());
    }

    #[test]
    fn test_raw_document_accepts_loose_shapes() {
        let doc = json!({
            "title": "Stored",
            "image": "https://stored.example.com/logo.gif",
            "items": [
                {"title": "a", "link": "https://stored.example.com/a", "mediaContent": {"$": {"url": ["https://x/1.jpg"]}}},
                {"link": "https://stored.example.com/b"}
            ]
        });
        let raw = parse_raw_document(doc).unwrap();
        assert_eq!(raw.items.len(), 2);
        assert_eq!(raw.image, Some(json!("https://stored.example.com/logo.gif")));
        assert!(raw.items[1].title.is_none());
    }
}
