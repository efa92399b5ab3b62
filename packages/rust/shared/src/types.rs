//! Core domain types: documents, the block tree, media references.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Rich text
// ---------------------------------------------------------------------------

/// Formatting marks carried by one span of rich text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marks {
    pub bold: bool,
    pub italic: bool,
    pub strikethrough: bool,
    pub underline: bool,
    pub code: bool,
    /// Source color name; `None` for the default color.
    pub color: Option<String>,
}

/// One run of text sharing the same marks and link target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub text: String,
    pub marks: Marks,
    pub link: Option<String>,
    /// Inline math; `text` holds the expression.
    pub equation: bool,
}

impl Span {
    /// Unformatted text span.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Inline equation span.
    pub fn equation(expression: impl Into<String>) -> Self {
        Self {
            text: expression.into(),
            equation: true,
            ..Self::default()
        }
    }

    pub fn bold(mut self) -> Self {
        self.marks.bold = true;
        self
    }

    pub fn italic(mut self) -> Self {
        self.marks.italic = true;
        self
    }

    pub fn strikethrough(mut self) -> Self {
        self.marks.strikethrough = true;
        self
    }

    pub fn underline(mut self) -> Self {
        self.marks.underline = true;
        self
    }

    pub fn code(mut self) -> Self {
        self.marks.code = true;
        self
    }

    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.marks.color = Some(color.into());
        self
    }

    pub fn link(mut self, url: impl Into<String>) -> Self {
        self.link = Some(url.into());
        self
    }
}

/// Ordered sequence of spans.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RichText(pub Vec<Span>);

impl RichText {
    /// A single unformatted span.
    pub fn plain(text: impl Into<String>) -> Self {
        Self(vec![Span::text(text)])
    }

    /// Concatenated text of every span, marks dropped.
    pub fn plain_text(&self) -> String {
        self.0.iter().map(|s| s.text.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|s| s.text.is_empty())
    }

    pub fn spans(&self) -> &[Span] {
        &self.0
    }
}

impl From<Vec<Span>> for RichText {
    fn from(spans: Vec<Span>) -> Self {
        Self(spans)
    }
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

/// Where a binary asset lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaSource {
    /// Stored by the document database; `url` is signed and expires,
    /// `asset_id` does not change.
    Hosted { asset_id: String, url: String },
    /// Hosted elsewhere; the URL is the only identity it has.
    External { url: String },
}

impl MediaSource {
    /// URL to fetch the bytes from right now.
    pub fn url(&self) -> &str {
        match self {
            Self::Hosted { url, .. } | Self::External { url } => url,
        }
    }

    /// Stable identity used to decide whether the asset was already fetched.
    pub fn dedup_key(&self) -> String {
        match self {
            Self::Hosted { asset_id, .. } => format!("hosted:{asset_id}"),
            Self::External { url } => format!("url:{url}"),
        }
    }
}

/// Broad asset class; decides the asset sub-directory and default extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    File,
}

impl MediaKind {
    /// Sub-directory under the static root.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Image => "images",
            Self::Video => "videos",
            Self::Audio => "audio",
            Self::File => "files",
        }
    }

    /// Extension used when the URL path carries none.
    pub fn default_extension(self) -> &'static str {
        match self {
            Self::Image => "jpg",
            Self::Video => "mp4",
            Self::Audio => "mp3",
            Self::File => "bin",
        }
    }
}

/// Reference to a binary asset found in a block (or the document cover).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub kind: MediaKind,
    pub source: MediaSource,
}

impl MediaDescriptor {
    pub fn new(kind: MediaKind, source: MediaSource) -> Self {
        Self { kind, source }
    }

    pub fn dedup_key(&self) -> String {
        self.source.dedup_key()
    }

    pub fn url(&self) -> &str {
        self.source.url()
    }
}

/// Payload of image/video/audio/file/pdf blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaBlock {
    pub source: MediaSource,
    pub caption: RichText,
    /// Original file name, when the source provides one.
    pub name: Option<String>,
}

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

/// One node of a document's content tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub kind: BlockKind,
    /// Ordered children; empty for leaves.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Block>,
}

impl Block {
    pub fn new(id: impl Into<String>, kind: BlockKind) -> Self {
        Self {
            id: id.into(),
            kind,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<Block>) -> Self {
        self.children = children;
        self
    }
}

/// Closed set of block kinds with their kind-specific attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockKind {
    Paragraph {
        text: RichText,
    },
    Heading {
        level: u8,
        text: RichText,
        toggleable: bool,
    },
    BulletedListItem {
        text: RichText,
    },
    NumberedListItem {
        text: RichText,
    },
    ToDo {
        text: RichText,
        checked: bool,
    },
    Quote {
        text: RichText,
    },
    Callout {
        text: RichText,
        icon: Option<String>,
        color: Option<String>,
    },
    Toggle {
        text: RichText,
    },
    Code {
        language: String,
        text: RichText,
    },
    Equation {
        expression: String,
    },
    Divider,
    Table {
        width: usize,
        has_column_header: bool,
        has_row_header: bool,
    },
    TableRow {
        cells: Vec<RichText>,
    },
    Image(MediaBlock),
    Video(MediaBlock),
    Audio(MediaBlock),
    File(MediaBlock),
    Pdf(MediaBlock),
    Embed {
        url: String,
        caption: RichText,
    },
    Bookmark {
        url: String,
        caption: RichText,
    },
    LinkPreview {
        url: String,
    },
    ColumnList,
    Column,
    TableOfContents,
    ChildPage {
        title: String,
    },
    SyncedBlock,
    /// Anything the engine has no rendering for; `kind` is the source tag.
    Unsupported {
        kind: String,
    },
}

impl BlockKind {
    /// Source-style tag name, used in logs and diagnostics.
    pub fn tag(&self) -> &str {
        match self {
            Self::Paragraph { .. } => "paragraph",
            Self::Heading { .. } => "heading",
            Self::BulletedListItem { .. } => "bulleted_list_item",
            Self::NumberedListItem { .. } => "numbered_list_item",
            Self::ToDo { .. } => "to_do",
            Self::Quote { .. } => "quote",
            Self::Callout { .. } => "callout",
            Self::Toggle { .. } => "toggle",
            Self::Code { .. } => "code",
            Self::Equation { .. } => "equation",
            Self::Divider => "divider",
            Self::Table { .. } => "table",
            Self::TableRow { .. } => "table_row",
            Self::Image(_) => "image",
            Self::Video(_) => "video",
            Self::Audio(_) => "audio",
            Self::File(_) => "file",
            Self::Pdf(_) => "pdf",
            Self::Embed { .. } => "embed",
            Self::Bookmark { .. } => "bookmark",
            Self::LinkPreview { .. } => "link_preview",
            Self::ColumnList => "column_list",
            Self::Column => "column",
            Self::TableOfContents => "table_of_contents",
            Self::ChildPage { .. } => "child_page",
            Self::SyncedBlock => "synced_block",
            Self::Unsupported { kind } => kind,
        }
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// Property bag of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentProperties {
    pub title: String,
    pub published: bool,
    /// Publish date shown on the site.
    pub date: DateTime<FixedOffset>,
    /// Single path segment naming the output file.
    pub slug: String,
    pub tags: Vec<String>,
    pub cover: Option<MediaSource>,
    /// Revision marker.
    pub last_edited: DateTime<Utc>,
}

impl DocumentProperties {
    /// SHA-256 over the property bag.
    ///
    /// The cover contributes its dedup key, not its URL: signed URLs rotate
    /// on every fetch and must not look like an edit.
    pub fn fingerprint(&self) -> String {
        #[derive(Serialize)]
        struct View<'a> {
            title: &'a str,
            published: bool,
            date: String,
            slug: &'a str,
            tags: &'a [String],
            cover: Option<String>,
            last_edited: String,
        }

        let view = View {
            title: &self.title,
            published: self.published,
            date: self.date.to_rfc3339(),
            slug: &self.slug,
            tags: &self.tags,
            cover: self.cover.as_ref().map(MediaSource::dedup_key),
            last_edited: self.last_edited.to_rfc3339(),
        };
        // Serializing plain strings/bools into JSON cannot fail.
        let json = serde_json::to_vec(&view).unwrap_or_default();
        sha256_hex(&json)
    }
}

/// Entry returned by the list operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSummary {
    pub id: String,
    pub properties: DocumentProperties,
}

/// Snapshot of one document for a single sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub properties: DocumentProperties,
    pub blocks: Vec<Block>,
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Exponential backoff settings for transient remote failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Lowercase hex SHA-256 of `content`.
pub fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Source ids come hyphenated or compact; anchors and link maps use compact lowercase.
pub fn compact_id(id: &str) -> String {
    id.replace('-', "").to_ascii_lowercase()
}
