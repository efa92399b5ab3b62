//! Wire-format parsing: JSON payloads of the remote API into domain types.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use docmirror_shared::{
    Block, BlockKind, DocumentProperties, DocumentSummary, Marks, MediaBlock, MediaSource,
    MirrorError, PropertyNames, Result, RichText, Span, compact_id,
};

/// Hyphenated UUID as it appears in hosted-file URL paths.
static UUID_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("valid regex")
});

// ---------------------------------------------------------------------------
// Listing envelopes
// ---------------------------------------------------------------------------

/// Paginated list envelope shared by query and block-children endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct ListResponse<T> {
    pub results: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl<T> ListResponse<T> {
    /// Cursor to continue from, only when the store says there is more.
    pub fn continuation(&self) -> Option<String> {
        if self.has_more {
            self.next_cursor.clone()
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Rich text
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAnnotations {
    bold: bool,
    italic: bool,
    strikethrough: bool,
    underline: bool,
    code: bool,
    color: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRichText {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    plain_text: String,
    #[serde(default)]
    href: Option<String>,
    #[serde(default)]
    annotations: RawAnnotations,
    #[serde(default)]
    equation: Option<RawEquation>,
}

#[derive(Debug, Deserialize)]
struct RawEquation {
    expression: String,
}

fn rich_text(raw: Vec<RawRichText>) -> RichText {
    raw.into_iter().map(span).collect::<Vec<_>>().into()
}

fn span(raw: RawRichText) -> Span {
    let color = raw.annotations.color.filter(|c| c != "default");
    let marks = Marks {
        bold: raw.annotations.bold,
        italic: raw.annotations.italic,
        strikethrough: raw.annotations.strikethrough,
        underline: raw.annotations.underline,
        code: raw.annotations.code,
        color,
    };

    match (raw.kind.as_str(), raw.equation) {
        ("equation", Some(eq)) => Span {
            text: eq.expression,
            marks,
            link: None,
            equation: true,
        },
        _ => Span {
            text: raw.plain_text,
            marks,
            link: raw.href,
            equation: false,
        },
    }
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct RawId {
    id: String,
}

/// File object used by media blocks, covers and icons.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFile {
    #[serde(rename = "type")]
    kind: Option<String>,
    file: Option<RawUrl>,
    external: Option<RawUrl>,
    file_upload: Option<RawId>,
    emoji: Option<String>,
}

impl RawFile {
    fn into_source(self) -> Option<MediaSource> {
        match self.kind.as_deref() {
            Some("external") => self.external.map(|e| MediaSource::External { url: e.url }),
            Some("file") | Some("file_upload") => {
                let url = self.file.map(|f| f.url)?;
                let asset_id = match self.file_upload {
                    Some(upload) => upload.id,
                    None => hosted_asset_id(&url),
                };
                Some(MediaSource::Hosted { asset_id, url })
            }
            _ => None,
        }
    }

    fn into_icon(self) -> Option<String> {
        if let Some(emoji) = self.emoji {
            return Some(emoji);
        }
        self.into_source().map(|s| s.url().to_string())
    }
}

/// Stable identity of a store-hosted file, derived from its URL path.
///
/// Hosted URLs look like `https://host/<workspace-uuid>/<file-uuid>/name.png?X-Amz-...`;
/// the last UUID segment names the file and survives re-signing. Without
/// one, the URL minus its query string is the best stable identity left.
pub fn hosted_asset_id(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return url.to_string();
    };

    let last_uuid = parsed
        .path_segments()
        .into_iter()
        .flatten()
        .filter(|seg| UUID_SEGMENT.is_match(seg))
        .last();

    match last_uuid {
        Some(id) => id.to_ascii_lowercase(),
        None => {
            let mut stripped = parsed.clone();
            stripped.set_query(None);
            stripped.set_fragment(None);
            stripped.to_string()
        }
    }
}

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

/// Raw block; the kind-specific payload sits under a key named after the kind.
#[derive(Debug, Deserialize)]
pub(crate) struct RawBlock {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub has_children: bool,
    #[serde(flatten)]
    rest: HashMap<String, Value>,
}

/// Union of the payload fields used across block kinds.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPayload {
    rich_text: Vec<RawRichText>,
    caption: Vec<RawRichText>,
    color: Option<String>,
    is_toggleable: bool,
    checked: bool,
    language: Option<String>,
    icon: Option<RawFile>,
    expression: Option<String>,
    url: Option<String>,
    title: Option<String>,
    name: Option<String>,
    table_width: usize,
    has_column_header: bool,
    has_row_header: bool,
    cells: Vec<Vec<RawRichText>>,
    #[serde(rename = "type")]
    source_kind: Option<String>,
    file: Option<RawUrl>,
    external: Option<RawUrl>,
    file_upload: Option<RawId>,
}

impl RawPayload {
    fn media(self) -> Option<MediaBlock> {
        let caption = rich_text(self.caption);
        let name = self.name;
        let source = RawFile {
            kind: self.source_kind,
            file: self.file,
            external: self.external,
            file_upload: self.file_upload,
            emoji: None,
        }
        .into_source()?;
        Some(MediaBlock {
            source,
            caption,
            name,
        })
    }
}

impl RawBlock {
    /// Convert to a domain block without children.
    ///
    /// Payloads that fail to parse degrade to `Unsupported` rather than
    /// failing the document.
    pub fn into_block(mut self) -> Block {
        let payload = self
            .rest
            .remove(&self.kind)
            .map(serde_json::from_value::<RawPayload>)
            .transpose();

        let payload = match payload {
            Ok(p) => p.unwrap_or_default(),
            Err(e) => {
                debug!(
                    block_id = %self.id,
                    kind = %self.kind,
                    error = %e,
                    "unparseable block payload"
                );
                return Block::new(self.id, BlockKind::Unsupported { kind: self.kind });
            }
        };

        let kind = block_kind(&self.kind, payload);
        Block::new(self.id, kind)
    }
}

fn block_kind(tag: &str, p: RawPayload) -> BlockKind {
    let unsupported = || BlockKind::Unsupported {
        kind: tag.to_string(),
    };

    match tag {
        "paragraph" => BlockKind::Paragraph {
            text: rich_text(p.rich_text),
        },
        "heading_1" | "heading_2" | "heading_3" => BlockKind::Heading {
            level: tag[tag.len() - 1..].parse().unwrap_or(1),
            text: rich_text(p.rich_text),
            toggleable: p.is_toggleable,
        },
        "bulleted_list_item" => BlockKind::BulletedListItem {
            text: rich_text(p.rich_text),
        },
        "numbered_list_item" => BlockKind::NumberedListItem {
            text: rich_text(p.rich_text),
        },
        "to_do" => BlockKind::ToDo {
            text: rich_text(p.rich_text),
            checked: p.checked,
        },
        "quote" => BlockKind::Quote {
            text: rich_text(p.rich_text),
        },
        "callout" => BlockKind::Callout {
            text: rich_text(p.rich_text),
            icon: p.icon.and_then(RawFile::into_icon),
            color: p.color.filter(|c| c != "default"),
        },
        "toggle" => BlockKind::Toggle {
            text: rich_text(p.rich_text),
        },
        "code" => BlockKind::Code {
            language: p.language.unwrap_or_default(),
            text: rich_text(p.rich_text),
        },
        "equation" => BlockKind::Equation {
            expression: p.expression.unwrap_or_default(),
        },
        "divider" => BlockKind::Divider,
        "table" => BlockKind::Table {
            width: p.table_width,
            has_column_header: p.has_column_header,
            has_row_header: p.has_row_header,
        },
        "table_row" => BlockKind::TableRow {
            cells: p.cells.into_iter().map(rich_text).collect(),
        },
        "image" => p.media().map(BlockKind::Image).unwrap_or_else(unsupported),
        "video" => p.media().map(BlockKind::Video).unwrap_or_else(unsupported),
        "audio" => p.media().map(BlockKind::Audio).unwrap_or_else(unsupported),
        "file" => p.media().map(BlockKind::File).unwrap_or_else(unsupported),
        "pdf" => p.media().map(BlockKind::Pdf).unwrap_or_else(unsupported),
        "embed" => match p.url {
            Some(url) => BlockKind::Embed {
                url,
                caption: rich_text(p.caption),
            },
            None => unsupported(),
        },
        "bookmark" => match p.url {
            Some(url) => BlockKind::Bookmark {
                url,
                caption: rich_text(p.caption),
            },
            None => unsupported(),
        },
        "link_preview" => match p.url {
            Some(url) => BlockKind::LinkPreview { url },
            None => unsupported(),
        },
        "column_list" => BlockKind::ColumnList,
        "column" => BlockKind::Column,
        "table_of_contents" => BlockKind::TableOfContents,
        "child_page" => BlockKind::ChildPage {
            title: p.title.unwrap_or_default(),
        },
        "synced_block" => BlockKind::SyncedBlock,
        _ => unsupported(),
    }
}

// ---------------------------------------------------------------------------
// Pages
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct RawPage {
    pub id: String,
    created_time: DateTime<Utc>,
    last_edited_time: DateTime<Utc>,
    #[serde(default)]
    cover: Option<RawFile>,
    #[serde(default)]
    properties: HashMap<String, Value>,
}

impl RawPage {
    /// Extract the property bag using the configured property names.
    pub fn into_summary(self, names: &PropertyNames) -> DocumentSummary {
        let props = &self.properties;

        let title = props
            .get(&names.title)
            .map(text_property)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string());

        let published = props
            .get(&names.published)
            .and_then(|p| p.get("checkbox"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let date = props
            .get(&names.date)
            .and_then(|p| p.pointer("/date/start"))
            .and_then(Value::as_str)
            .and_then(parse_date)
            .unwrap_or_else(|| self.created_time.fixed_offset());

        let slug = props
            .get(&names.slug)
            .map(text_property)
            .map(|s| sanitize_slug(&s))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| compact_id(&self.id));

        let tags = props
            .get(&names.tags)
            .and_then(|p| p.get("multi_select"))
            .and_then(Value::as_array)
            .map(|opts| {
                opts.iter()
                    .filter_map(|o| o.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let cover = self.cover.and_then(RawFile::into_source);

        DocumentSummary {
            id: self.id,
            properties: DocumentProperties {
                title,
                published,
                date,
                slug,
                tags,
                cover,
                last_edited: self.last_edited_time,
            },
        }
    }
}

/// Plain text of a title / rich_text property.
fn text_property(prop: &Value) -> String {
    let spans = prop
        .get("title")
        .or_else(|| prop.get("rich_text"))
        .and_then(Value::as_array);

    spans
        .map(|arr| {
            arr.iter()
                .filter_map(|s| s.get("plain_text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}

/// Date-only values are pinned to midnight UTC.
fn parse_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().fixed_offset())
}

/// Reduce a user-entered slug to one safe path segment.
pub fn sanitize_slug(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches(|c| c == '-' || c == '.').to_string()
}

/// Decode a JSON body into `T`, mapping failures to parse errors.
pub(crate) fn decode<T: DeserializeOwned>(what: &str, body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| MirrorError::parse(format!("{what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse_block(value: Value) -> Block {
        serde_json::from_value::<RawBlock>(value).unwrap().into_block()
    }

    #[test]
    fn paragraph_with_marks_and_link() {
        let block = parse_block(json!({
            "object": "block",
            "id": "b1",
            "type": "paragraph",
            "has_children": false,
            "paragraph": {
                "rich_text": [
                    {"type": "text", "plain_text": "bold", "href": null,
                     "annotations": {"bold": true, "italic": false, "strikethrough": false,
                                     "underline": false, "code": false, "color": "default"}},
                    {"type": "text", "plain_text": "site", "href": "https://example.com",
                     "annotations": {"bold": false, "italic": false, "strikethrough": false,
                                     "underline": false, "code": false, "color": "red"}},
                    {"type": "equation", "plain_text": "x^2", "equation": {"expression": "x^2"},
                     "annotations": {}}
                ],
                "color": "default"
            }
        }));

        let BlockKind::Paragraph { text } = block.kind else {
            panic!("expected paragraph");
        };
        let spans = text.spans();
        assert!(spans[0].marks.bold);
        assert_eq!(spans[0].marks.color, None);
        assert_eq!(spans[1].link.as_deref(), Some("https://example.com"));
        assert_eq!(spans[1].marks.color.as_deref(), Some("red"));
        assert!(spans[2].equation);
        assert_eq!(spans[2].text, "x^2");
    }

    #[test]
    fn heading_level_and_toggle() {
        let block = parse_block(json!({
            "id": "h", "type": "heading_3",
            "heading_3": {"rich_text": [], "is_toggleable": true}
        }));
        assert!(matches!(
            block.kind,
            BlockKind::Heading { level: 3, toggleable: true, .. }
        ));
    }

    #[test]
    fn hosted_image_uses_path_uuid() {
        let block = parse_block(json!({
            "id": "img", "type": "image",
            "image": {
                "type": "file",
                "caption": [],
                "file": {
                    "url": "https://prod-files-secure.s3.us-west-2.amazonaws.com/0d4b6e2a-1111-4222-8333-944445555666/7F3A9C10-2222-4333-8444-a55556666777/photo.png?X-Amz-Signature=abc",
                    "expiry_time": "2024-01-01T00:00:00.000Z"
                }
            }
        }));
        let BlockKind::Image(media) = block.kind else {
            panic!("expected image");
        };
        assert_eq!(
            media.source.dedup_key(),
            "hosted:7f3a9c10-2222-4333-8444-a55556666777"
        );
    }

    #[test]
    fn external_video_and_unknown_kind() {
        let block = parse_block(json!({
            "id": "v", "type": "video",
            "video": {"type": "external", "external": {"url": "https://youtu.be/abc"}}
        }));
        assert!(matches!(
            block.kind,
            BlockKind::Video(MediaBlock { source: MediaSource::External { .. }, .. })
        ));

        let block = parse_block(json!({"id": "u", "type": "breadcrumb", "breadcrumb": {}}));
        assert_eq!(
            block.kind,
            BlockKind::Unsupported {
                kind: "breadcrumb".into()
            }
        );
    }

    #[test]
    fn asset_id_without_uuid_drops_query() {
        assert_eq!(
            hosted_asset_id("https://files.example.com/a/b.png?sig=1"),
            "https://files.example.com/a/b.png"
        );
        assert_eq!(
            hosted_asset_id(
                "https://s3.us-west-2.amazonaws.com/secure.notion-static.com/5a6b7c8d-0000-1111-2222-333344445555/img.jpg?x=1"
            ),
            "5a6b7c8d-0000-1111-2222-333344445555"
        );
    }

    #[test]
    fn page_properties_with_fallbacks() {
        let page: RawPage = serde_json::from_value(json!({
            "object": "page",
            "id": "3f1c2b4a-aaaa-bbbb-cccc-1234567890ab",
            "created_time": "2024-02-01T08:30:00.000Z",
            "last_edited_time": "2024-02-03T10:00:00.000Z",
            "cover": {"type": "external", "external": {"url": "https://img.example.com/c.jpg"}},
            "properties": {
                "Title": {"type": "title", "title": [{"plain_text": "Hello "}, {"plain_text": "World"}]},
                "Published": {"type": "checkbox", "checkbox": true},
                "Date": {"type": "date", "date": null},
                "Slug": {"type": "rich_text", "rich_text": []},
                "Tags": {"type": "multi_select", "multi_select": [{"name": "rust"}, {"name": "sync"}]}
            }
        }))
        .unwrap();

        let summary = page.into_summary(&PropertyNames::default());
        let p = summary.properties;
        assert_eq!(p.title, "Hello World");
        assert!(p.published);
        assert_eq!(p.slug, "3f1c2b4aaaaabbbbcccc1234567890ab");
        assert_eq!(p.tags, vec!["rust", "sync"]);
        assert_eq!(p.date.to_rfc3339(), "2024-02-01T08:30:00+00:00");
        assert!(matches!(p.cover, Some(MediaSource::External { .. })));
    }

    #[test]
    fn date_only_values() {
        let dt = parse_date("2024-01-15").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-01-15T00:00:00+00:00");
        let dt = parse_date("2024-01-15T09:00:00.000+02:00").unwrap();
        assert_eq!(dt.offset().local_minus_utc(), 7200);
        assert!(parse_date("yesterday").is_none());
    }

    #[test]
    fn slug_sanitization() {
        assert_eq!(sanitize_slug("  my/first post "), "my-first-post");
        assert_eq!(sanitize_slug("../etc"), "etc");
        assert_eq!(sanitize_slug("rust-2024_notes"), "rust-2024_notes");
        assert_eq!(sanitize_slug("///"), "");
    }
}
