//! Block tree to Markdown conversion.
//!
//! Converts a document's block tree into a [`Fragment`]: Markdown text with
//! media placeholders that carry the raw [`MediaDescriptor`]. Conversion is
//! pure; downloading and path rewriting happen later through
//! [`Fragment::resolve`].

mod blocks;
mod embed;
pub mod fragment;
pub mod inline;

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::{debug, instrument};

use docmirror_shared::{Block, MediaDescriptor};

pub use fragment::{Fragment, MediaSlot, MediaStyle, Part};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Site-wide facts the converter needs for link rewriting.
#[derive(Debug, Clone, Default)]
pub struct ConvertContext {
    /// Content section documents are published under.
    pub section: String,
    /// Compact document id to slug, for every document in the run.
    pub slugs: HashMap<String, String>,
}

impl ConvertContext {
    pub fn new(section: impl Into<String>, slugs: HashMap<String, String>) -> Self {
        Self {
            section: section.into(),
            slugs,
        }
    }

    /// Site path of the document with `slug`.
    pub fn document_path(&self, slug: &str) -> String {
        let section = self.section.trim_matches('/');
        if section.is_empty() {
            format!("/{slug}/")
        } else {
            format!("/{section}/{slug}/")
        }
    }
}

/// Non-fatal finding recorded during conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A block kind with no rendering; it produced no output.
    UnsupportedBlock { block_id: String, kind: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedBlock { block_id, kind } => {
                write!(f, "unsupported block `{kind}` ({block_id}) skipped")
            }
        }
    }
}

/// Result of converting a block tree.
#[derive(Debug, Clone)]
pub struct Converted {
    pub body: Fragment,
    pub diagnostics: Vec<Diagnostic>,
    /// Any block or inline equation present.
    pub has_math: bool,
    /// Any mermaid diagram present.
    pub has_mermaid: bool,
}

impl Converted {
    /// Referenced media, one per dedup key, in document order.
    pub fn media(&self) -> Vec<MediaDescriptor> {
        let mut seen = HashSet::new();
        self.body
            .slots()
            .filter(|slot| seen.insert(slot.descriptor.dedup_key()))
            .map(|slot| slot.descriptor.clone())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Convert a document's top-level blocks, depth-first, preserving order.
#[instrument(skip_all, fields(blocks = blocks.len()))]
pub fn convert(blocks: &[Block], ctx: &ConvertContext) -> Converted {
    let mut converter = blocks::Converter::new(ctx);
    let body = converter.blocks(blocks);
    finish(converter, body)
}

/// Convert a single block and its subtree.
pub fn convert_block(block: &Block, ctx: &ConvertContext) -> Converted {
    let mut converter = blocks::Converter::new(ctx);
    let body = converter.block(block);
    finish(converter, body)
}

fn finish(converter: blocks::Converter<'_>, body: Fragment) -> Converted {
    let converted = Converted {
        body,
        diagnostics: converter.diagnostics,
        has_math: converter.has_math,
        has_mermaid: converter.has_mermaid,
    };
    debug!(
        media = converted.body.slots().count(),
        diagnostics = converted.diagnostics.len(),
        "conversion complete"
    );
    converted
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use docmirror_shared::{BlockKind, MediaBlock, MediaSource, RichText, Span};

    fn fixture_path(name: &str) -> std::path::PathBuf {
        std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../../fixtures")
            .join(name)
    }

    fn load_fixture(name: &str) -> String {
        fs::read_to_string(fixture_path(name))
            .unwrap_or_else(|e| panic!("failed to read fixture {name}: {e}"))
    }

    fn ctx() -> ConvertContext {
        let mut slugs = HashMap::new();
        slugs.insert(
            "3f1c2b4aaaaabbbbcccc1234567890ab".to_string(),
            "hello-world".to_string(),
        );
        ConvertContext::new("posts", slugs)
    }

    fn block(id: &str, kind: BlockKind) -> Block {
        Block::new(id, kind)
    }

    fn para(id: &str, text: &str) -> Block {
        block(
            id,
            BlockKind::Paragraph {
                text: RichText::plain(text),
            },
        )
    }

    fn bullet(id: &str, text: &str) -> Block {
        block(
            id,
            BlockKind::BulletedListItem {
                text: RichText::plain(text),
            },
        )
    }

    fn code(id: &str, language: &str, body: &str) -> Block {
        block(
            id,
            BlockKind::Code {
                language: language.into(),
                text: RichText::plain(body),
            },
        )
    }

    fn hosted(asset_id: &str, file: &str) -> MediaSource {
        MediaSource::Hosted {
            asset_id: asset_id.into(),
            url: format!("https://files.example.com/{asset_id}/{file}?X-Amz-Signature=abc"),
        }
    }

    /// A tree containing every supported block kind once.
    fn all_blocks() -> Vec<Block> {
        vec![
            block(
                "h1",
                BlockKind::Heading {
                    level: 1,
                    text: RichText::plain("Title"),
                    toggleable: false,
                },
            ),
            block(
                "p1",
                BlockKind::Paragraph {
                    text: RichText::from(vec![
                        Span::text("Plain "),
                        Span::text("bold").bold(),
                        Span::text(" and "),
                        Span::text("link").link("https://example.com"),
                    ]),
                },
            ),
            bullet("li1", "Item").with_children(vec![block(
                "li2",
                BlockKind::NumberedListItem {
                    text: RichText::plain("First"),
                },
            )]),
            block(
                "td1",
                BlockKind::ToDo {
                    text: RichText::plain("Task"),
                    checked: true,
                },
            ),
            block(
                "c1",
                BlockKind::Callout {
                    text: RichText::plain("Note"),
                    icon: None,
                    color: Some("gray_background".into()),
                },
            ),
            block(
                "t1",
                BlockKind::Toggle {
                    text: RichText::plain("More"),
                },
            )
            .with_children(vec![code("code1", "Rust", "fn main() {}")]),
            block("d1", BlockKind::Divider),
            block(
                "tb1",
                BlockKind::Table {
                    width: 2,
                    has_column_header: true,
                    has_row_header: false,
                },
            )
            .with_children(vec![block(
                "tr1",
                BlockKind::TableRow {
                    cells: vec![RichText::plain("Name"), RichText::plain("Value")],
                },
            )]),
            block(
                "img1",
                BlockKind::Image(MediaBlock {
                    source: hosted("img-asset", "photo.png"),
                    caption: RichText::plain("A photo"),
                    name: None,
                }),
            ),
            block(
                "vid1",
                BlockKind::Video(MediaBlock {
                    source: MediaSource::External {
                        url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".into(),
                    },
                    caption: RichText::default(),
                    name: None,
                }),
            ),
            block(
                "aud1",
                BlockKind::Audio(MediaBlock {
                    source: hosted("aud-asset", "song.mp3"),
                    caption: RichText::default(),
                    name: None,
                }),
            ),
            block(
                "file1",
                BlockKind::File(MediaBlock {
                    source: MediaSource::External {
                        url: "https://cdn.example.com/report.zip".into(),
                    },
                    caption: RichText::default(),
                    name: None,
                }),
            ),
            block(
                "pdf1",
                BlockKind::Pdf(MediaBlock {
                    source: hosted("pdf-asset", "paper.pdf"),
                    caption: RichText::default(),
                    name: None,
                }),
            ),
            block(
                "emb1",
                BlockKind::Embed {
                    url: "https://gist.github.com/user/abc123".into(),
                    caption: RichText::default(),
                },
            ),
            block(
                "bm1",
                BlockKind::Bookmark {
                    url: "https://rust-lang.org".into(),
                    caption: RichText::plain("Rust"),
                },
            ),
            block(
                "lp1",
                BlockKind::LinkPreview {
                    url: "https://github.com/rust-lang/rust".into(),
                },
            ),
            block("cl1", BlockKind::ColumnList).with_children(vec![
                block("col1", BlockKind::Column).with_children(vec![block(
                    "q1",
                    BlockKind::Quote {
                        text: RichText::plain("Wise words"),
                    },
                )]),
            ]),
            block("toc1", BlockKind::TableOfContents),
            block(
                "3f1c2b4a-aaaa-bbbb-cccc-1234567890ab",
                BlockKind::ChildPage {
                    title: "Hello World".into(),
                },
            ),
            block("sb1", BlockKind::SyncedBlock).with_children(vec![block(
                "eq1",
                BlockKind::Equation {
                    expression: "E = mc^2".into(),
                },
            )]),
        ]
    }

    // --- Golden fixture ---

    #[test]
    fn all_block_kinds_match_golden_fixture() {
        let mut converted = convert(&all_blocks(), &ctx());
        assert!(converted.diagnostics.is_empty());
        assert!(converted.has_math);
        assert!(!converted.has_mermaid);
        assert_eq!(converted.media().len(), 4);

        let resolved: HashMap<String, String> = [
            ("hosted:img-asset", "/images/img-asset.png"),
            ("hosted:aud-asset", "/audio/aud-asset.mp3"),
            ("url:https://cdn.example.com/report.zip", "/files/report.zip"),
            ("hosted:pdf-asset", "/files/pdf-asset.pdf"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(converted.body.resolve(&resolved), 0);

        let expected = load_fixture("golden/all_blocks.md");
        assert_eq!(converted.body.render(), expected.trim_end());
    }

    // --- Structure ---

    #[test]
    fn toggle_with_nested_list_and_code_keeps_order() {
        let toggle = block(
            "t",
            BlockKind::Toggle {
                text: RichText::plain("Details"),
            },
        )
        .with_children(vec![
            bullet("a", "one").with_children(vec![bullet("b", "two")]),
            bullet("c", "three"),
            code("d", "python", "print('hi')\n    indented"),
        ]);

        let out = convert_block(&toggle, &ctx()).body.render();
        assert_eq!(
            out,
            "<details>\n<summary>Details</summary>\n\n- one\n    - two\n- three\n\n```python\nprint('hi')\n    indented\n```\n\n</details>"
        );
    }

    #[test]
    fn arbitrary_nesting_depth() {
        let depth = 40;
        let mut tree = bullet("leaf", "leaf");
        for i in (0..depth).rev() {
            tree = bullet(&format!("n{i}"), &format!("level {i}")).with_children(vec![tree]);
        }

        let out = convert_block(&tree, &ctx()).body.render();
        let last = out.lines().last().unwrap();
        assert_eq!(last, format!("{}- leaf", "    ".repeat(depth)));
        assert_eq!(out.lines().count(), depth + 1);
    }

    #[test]
    fn list_item_with_paragraph_child_is_separated() {
        let item = bullet("a", "item").with_children(vec![para("p", "details")]);
        assert_eq!(
            convert_block(&item, &ctx()).body.render(),
            "- item\n\n    details"
        );
    }

    #[test]
    fn quote_children_stay_inside_quote() {
        let quote = block(
            "q",
            BlockKind::Quote {
                text: RichText::plain("Line one\nLine two"),
            },
        )
        .with_children(vec![para("p", "Child")]);
        assert_eq!(
            convert_block(&quote, &ctx()).body.render(),
            "> Line one\n> Line two\n>\n> Child"
        );
    }

    #[test]
    fn table_without_header_gets_empty_header_row() {
        let table = block(
            "t",
            BlockKind::Table {
                width: 2,
                has_column_header: false,
                has_row_header: true,
            },
        )
        .with_children(vec![block(
            "r",
            BlockKind::TableRow {
                cells: vec![RichText::plain("k"), RichText::plain("a|b")],
            },
        )]);
        assert_eq!(
            convert_block(&table, &ctx()).body.render(),
            "|  |  |\n| --- | --- |\n| **k** | a\\|b |"
        );
    }

    // --- Kinds with side effects ---

    #[test]
    fn unsupported_block_records_diagnostic() {
        let blocks = vec![
            para("p1", "before"),
            block(
                "u1",
                BlockKind::Unsupported {
                    kind: "breadcrumb".into(),
                },
            ),
            para("p2", "after"),
        ];
        let converted = convert(&blocks, &ctx());
        assert_eq!(converted.body.render(), "before\n\nafter");
        assert_eq!(
            converted.diagnostics,
            vec![Diagnostic::UnsupportedBlock {
                block_id: "u1".into(),
                kind: "breadcrumb".into()
            }]
        );
    }

    #[test]
    fn mermaid_detected_without_language() {
        let converted = convert(&[code("m", "", "graph TD\n  A --> B")], &ctx());
        assert!(converted.has_mermaid);
        assert!(converted.body.render().starts_with("```mermaid\n"));
    }

    #[test]
    fn inline_equation_sets_math() {
        let blocks = vec![block(
            "p",
            BlockKind::Paragraph {
                text: RichText::from(vec![Span::text("area "), Span::equation("\\pi r^2")]),
            },
        )];
        let converted = convert(&blocks, &ctx());
        assert!(converted.has_math);
        assert_eq!(converted.body.render(), "area $\\pi r^2$");
    }

    #[test]
    fn media_deduplicated_by_key() {
        let image = |id: &str, sig: &str| {
            block(
                id,
                BlockKind::Image(MediaBlock {
                    source: MediaSource::Hosted {
                        asset_id: "same".into(),
                        url: format!("https://files.example.com/same/a.png?sig={sig}"),
                    },
                    caption: RichText::default(),
                    name: None,
                }),
            )
        };
        let converted = convert(&[image("a", "1"), image("b", "2")], &ctx());
        assert_eq!(converted.body.slots().count(), 2);
        assert_eq!(converted.media().len(), 1);
    }

    #[test]
    fn code_content_is_not_reflowed() {
        let body = "let x = 1;   \n\n\tlet y = `two`;\n```inner```";
        let out = convert(&[code("c", "JavaScript", body)], &ctx()).body.render();
        assert_eq!(out, format!("````javascript\n{body}\n````"));
    }
}
