//! Per-kind block renderers.

use docmirror_shared::{
    Block, BlockKind, MediaBlock, MediaDescriptor, MediaKind, MediaSource, RichText, compact_id,
};

use crate::embed;
use crate::fragment::{Fragment, MediaSlot, MediaStyle, escape_attr};
use crate::inline;
use crate::{ConvertContext, Diagnostic};

const DEFAULT_CALLOUT_ICON: &str = "💡";
const CHILD_INDENT: &str = "    ";

/// Depth-first converter accumulating document-level findings.
pub(crate) struct Converter<'a> {
    ctx: &'a ConvertContext,
    pub diagnostics: Vec<Diagnostic>,
    pub has_math: bool,
    pub has_mermaid: bool,
}

/// Which list a block continues, if any. Consecutive items of the same
/// list join with a single newline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Bulleted,
    Numbered,
    ToDo,
}

fn list_kind(kind: &BlockKind) -> Option<ListKind> {
    match kind {
        BlockKind::BulletedListItem { .. } => Some(ListKind::Bulleted),
        BlockKind::NumberedListItem { .. } => Some(ListKind::Numbered),
        BlockKind::ToDo { .. } => Some(ListKind::ToDo),
        _ => None,
    }
}

impl<'a> Converter<'a> {
    pub fn new(ctx: &'a ConvertContext) -> Self {
        Self {
            ctx,
            diagnostics: Vec::new(),
            has_math: false,
            has_mermaid: false,
        }
    }

    /// Convert siblings in order, skipping empty output.
    pub fn blocks(&mut self, blocks: &[Block]) -> Fragment {
        let mut out = Fragment::new();
        let mut prev: Option<Option<ListKind>> = None;

        for block in blocks {
            let fragment = self.block(block);
            if fragment.is_empty() {
                continue;
            }
            let kind = list_kind(&block.kind);
            if let Some(prev_kind) = prev {
                let same_list = kind.is_some() && prev_kind == kind;
                out.push_str(if same_list { "\n" } else { "\n\n" });
            }
            out.append(fragment);
            prev = Some(kind);
        }
        out
    }

    pub fn block(&mut self, block: &Block) -> Fragment {
        match &block.kind {
            BlockKind::Paragraph { text } => {
                let mut out = self.text(text);
                self.append_children(&mut out, block, "\n\n");
                out
            }
            BlockKind::Heading { level, text, .. } => {
                let hashes = "#".repeat(usize::from((*level).clamp(1, 6)));
                let mut out = Fragment::text(format!(
                    "{hashes} {} {{#{}}}",
                    self.inline(text),
                    compact_id(&block.id)
                ));
                self.append_children(&mut out, block, "\n\n");
                out
            }
            BlockKind::BulletedListItem { text } => self.list_item("- ", text, block),
            BlockKind::NumberedListItem { text } => self.list_item("1. ", text, block),
            BlockKind::ToDo { text, checked } => {
                let marker = if *checked { "- [x] " } else { "- [ ] " };
                self.list_item(marker, text, block)
            }
            BlockKind::Quote { text } => {
                let mut body = self.text(text);
                self.append_children(&mut body, block, "\n\n");
                if body.is_empty() {
                    return body;
                }
                body.prefix_lines("> ", "> ")
            }
            BlockKind::Callout { text, icon, color } => {
                let icon = icon.as_deref().unwrap_or(DEFAULT_CALLOUT_ICON);
                let mut open =
                    format!("<div class=\"callout\" data-icon=\"{}\"", escape_attr(icon));
                if let Some(color) = color {
                    open.push_str(&format!(" data-color=\"{}\"", escape_attr(color)));
                }
                open.push('>');

                let mut body = self.text(text);
                self.append_children(&mut body, block, "\n\n");
                wrap_html(&open, body, "</div>")
            }
            BlockKind::Toggle { text } => {
                let open = format!("<details>\n<summary>{}</summary>", self.single_line(text));
                let body = self.blocks(&block.children);
                wrap_html(&open, body, "</details>")
            }
            BlockKind::Code { language, text } => self.code(language, text),
            BlockKind::Equation { expression } => {
                self.has_math = true;
                Fragment::text(format!("$$\n{}\n$$", expression.trim()))
            }
            BlockKind::Divider => Fragment::text("---"),
            BlockKind::Table {
                width,
                has_column_header,
                has_row_header,
            } => self.table(block, *width, *has_column_header, *has_row_header),
            // Rows render through their table; a stray row has nothing to attach to.
            BlockKind::TableRow { .. } => Fragment::new(),
            BlockKind::Image(media) => self.image(media),
            BlockKind::Video(media) => {
                let shortcode = match &media.source {
                    MediaSource::External { url } => embed::video_shortcode(url),
                    MediaSource::Hosted { .. } => None,
                };
                if let Some(shortcode) = shortcode {
                    return Fragment::text(shortcode);
                }
                self.media(MediaKind::Video, media, MediaStyle::Video, String::new())
            }
            BlockKind::Audio(media) => {
                self.media(MediaKind::Audio, media, MediaStyle::Audio, String::new())
            }
            BlockKind::File(media) => {
                let label = self.file_label(media, None);
                self.media(MediaKind::File, media, MediaStyle::FileLink { icon: "📎" }, label)
            }
            BlockKind::Pdf(media) => {
                let label = self.file_label(media, Some("PDF Document"));
                self.media(MediaKind::File, media, MediaStyle::FileLink { icon: "📄" }, label)
            }
            BlockKind::Embed { url, .. } => Fragment::text(embed_markup(url)),
            BlockKind::Bookmark { url, caption } => {
                let label = if caption.is_empty() {
                    escape_html(url)
                } else {
                    self.single_line(caption)
                };
                Fragment::text(external_anchor(url, &label))
            }
            BlockKind::LinkPreview { url } => {
                Fragment::text(external_anchor(url, &escape_html(url)))
            }
            BlockKind::ColumnList => {
                let columns: Vec<Fragment> = block
                    .children
                    .iter()
                    .map(|c| self.block(c))
                    .filter(|f| !f.is_empty())
                    .collect();
                let mut body = Fragment::new();
                for (i, column) in columns.into_iter().enumerate() {
                    if i > 0 {
                        body.push_str("\n");
                    }
                    body.append(column);
                }
                wrap_html("<div class=\"columns\">", body, "</div>")
            }
            BlockKind::Column => {
                let body = self.blocks(&block.children);
                wrap_html("<div class=\"column\">", body, "</div>")
            }
            BlockKind::TableOfContents => Fragment::text("{{< toc >}}"),
            BlockKind::ChildPage { title } => match self.ctx.slugs.get(&compact_id(&block.id)) {
                Some(slug) => Fragment::text(format!(
                    "[{}]({})",
                    inline::escape_markdown(title),
                    self.ctx.document_path(slug)
                )),
                None => Fragment::new(),
            },
            BlockKind::SyncedBlock => self.blocks(&block.children),
            BlockKind::Unsupported { kind } => {
                self.diagnostics.push(Diagnostic::UnsupportedBlock {
                    block_id: block.id.clone(),
                    kind: kind.clone(),
                });
                Fragment::new()
            }
        }
    }

    // -----------------------------------------------------------------------
    // Text helpers
    // -----------------------------------------------------------------------

    fn inline(&mut self, text: &RichText) -> String {
        if text.spans().iter().any(|s| s.equation) {
            self.has_math = true;
        }
        inline::render(text, self.ctx)
    }

    fn single_line(&mut self, text: &RichText) -> String {
        self.inline(text).replace('\n', "<br>")
    }

    fn text(&mut self, text: &RichText) -> Fragment {
        Fragment::text(self.inline(text))
    }

    /// Append converted children after `out`, separated by `sep`.
    fn append_children(&mut self, out: &mut Fragment, block: &Block, sep: &str) {
        let children = self.blocks(&block.children);
        if children.is_empty() {
            return;
        }
        if !out.is_empty() {
            out.push_str(sep);
        }
        out.append(children);
    }

    fn list_item(&mut self, marker: &str, text: &RichText, block: &Block) -> Fragment {
        let mut out = Fragment::text(marker);
        out.push_str(&self.inline(text));

        let children = self.blocks(&block.children);
        if !children.is_empty() {
            let nested_list = block
                .children
                .first()
                .is_some_and(|c| list_kind(&c.kind).is_some());
            out.push_str(if nested_list { "\n" } else { "\n\n" });
            out.append(children.prefix_lines(CHILD_INDENT, CHILD_INDENT));
        }
        out
    }

    // -----------------------------------------------------------------------
    // Code, tables
    // -----------------------------------------------------------------------

    fn code(&mut self, language: &str, text: &RichText) -> Fragment {
        let body = text.plain_text();
        let mut language = match language.trim().to_lowercase().as_str() {
            "plain text" => "text".to_string(),
            other => other.replace(' ', "-"),
        };
        if language.is_empty() && looks_like_mermaid(&body) {
            language = "mermaid".to_string();
        }
        if language == "mermaid" {
            self.has_mermaid = true;
        }

        let longest = body
            .split(|c| c != '`')
            .map(str::len)
            .max()
            .unwrap_or(0);
        let fence = "`".repeat(longest.max(2) + 1);
        Fragment::text(format!("{fence}{language}\n{body}\n{fence}"))
    }

    fn table(
        &mut self,
        block: &Block,
        width: usize,
        has_column_header: bool,
        has_row_header: bool,
    ) -> Fragment {
        let mut rows: Vec<Vec<String>> = Vec::new();
        for child in &block.children {
            if let BlockKind::TableRow { cells } = &child.kind {
                let row = cells
                    .iter()
                    .enumerate()
                    .map(|(i, cell)| {
                        let text = self.single_line(cell).replace('|', "\\|");
                        if has_row_header && i == 0 && !text.is_empty() {
                            format!("**{text}**")
                        } else {
                            text
                        }
                    })
                    .collect();
                rows.push(row);
            }
        }
        if rows.is_empty() {
            return Fragment::new();
        }

        let columns = rows.iter().map(Vec::len).max().unwrap_or(0).max(width).max(1);
        let header = if has_column_header {
            rows.remove(0)
        } else {
            Vec::new()
        };

        let mut lines = Vec::with_capacity(rows.len() + 2);
        lines.push(table_line(&header, columns));
        lines.push(format!("|{}", " --- |".repeat(columns)));
        for row in &rows {
            lines.push(table_line(row, columns));
        }
        Fragment::text(lines.join("\n"))
    }

    // -----------------------------------------------------------------------
    // Media
    // -----------------------------------------------------------------------

    fn image(&mut self, media: &MediaBlock) -> Fragment {
        let alt = media.caption.plain_text();
        let caption = self.single_line(&media.caption);
        Fragment::media(MediaSlot {
            descriptor: MediaDescriptor::new(MediaKind::Image, media.source.clone()),
            style: MediaStyle::Figure,
            alt,
            caption,
            label: String::new(),
            local_path: None,
        })
    }

    fn media(
        &mut self,
        kind: MediaKind,
        media: &MediaBlock,
        style: MediaStyle,
        label: String,
    ) -> Fragment {
        Fragment::media(MediaSlot {
            descriptor: MediaDescriptor::new(kind, media.source.clone()),
            style,
            alt: media.caption.plain_text(),
            caption: String::new(),
            label,
            local_path: None,
        })
    }

    /// Caption, else original file name, else the URL's last path segment.
    fn file_label(&mut self, media: &MediaBlock, fallback: Option<&str>) -> String {
        if !media.caption.is_empty() {
            return self.single_line(&media.caption);
        }
        if let Some(name) = media.name.as_deref().filter(|n| !n.is_empty()) {
            return inline::escape_markdown(name);
        }
        if let Some(fallback) = fallback {
            return fallback.to_string();
        }
        let url = media.source.url();
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let segment = path.rsplit('/').next().unwrap_or(path);
        if segment.is_empty() {
            "Download".to_string()
        } else {
            inline::escape_markdown(segment)
        }
    }
}

fn looks_like_mermaid(code: &str) -> bool {
    let first = code.trim_start().lines().next().unwrap_or("").trim();
    [
        "graph ",
        "flowchart",
        "sequenceDiagram",
        "classDiagram",
        "stateDiagram",
        "gantt",
        "erDiagram",
        "pie",
    ]
    .iter()
    .any(|kw| first.starts_with(kw))
}

fn table_line(cells: &[String], columns: usize) -> String {
    let mut line = String::from("|");
    for i in 0..columns {
        let cell = cells.get(i).map(String::as_str).unwrap_or("");
        if cell.is_empty() {
            line.push_str("  |");
        } else {
            line.push(' ');
            line.push_str(cell);
            line.push_str(" |");
        }
    }
    line
}

/// HTML wrapper with blank lines around the body so Markdown inside still renders.
fn wrap_html(open: &str, body: Fragment, close: &str) -> Fragment {
    let mut out = Fragment::text(open);
    if !body.is_empty() {
        out.push_str("\n\n");
        out.append(body);
    }
    out.push_str("\n\n");
    out.push_str(close);
    out
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn external_anchor(url: &str, label: &str) -> String {
    format!(
        "<a href=\"{}\" target=\"_blank\" rel=\"noopener noreferrer\">{label}</a>",
        escape_attr(url)
    )
}

fn embed_markup(url: &str) -> String {
    if let Some((user, id)) = embed::tweet(url) {
        return format!("{{{{< tweet user=\"{user}\" id=\"{id}\" >}}}}");
    }
    if let Some(shortcode) = embed::video_shortcode(url) {
        return shortcode;
    }
    if embed::is_gist(url) {
        return format!("{{{{< gist url=\"{}\" >}}}}", escape_attr(url));
    }
    format!(
        "<iframe src=\"{}\" style=\"width:100%; height:400px;\" loading=\"lazy\"></iframe>",
        escape_attr(url)
    )
}
