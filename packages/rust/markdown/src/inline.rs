//! Rich text spans to inline Markdown.

use std::sync::LazyLock;

use regex::Regex;

use docmirror_shared::{Marks, RichText, Span, compact_id};

use crate::ConvertContext;
use crate::fragment::{escape_attr, link_destination};

/// Trailing page id in a link path: compact hex or hyphenated UUID.
static PAGE_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)([0-9a-f]{32}|[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})$",
    )
    .expect("valid regex")
});

/// A whole fragment that is a block id.
static BLOCK_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)([0-9a-f]{32}|[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})$")
        .expect("valid regex")
});

/// Render rich text as inline Markdown.
pub fn render(text: &RichText, ctx: &ConvertContext) -> String {
    let mut out = String::new();
    for span in coalesce(text.spans()) {
        render_span(&span, ctx, &mut out);
    }
    out
}

/// Merge neighbouring spans that share marks and link, so markers are not
/// closed and reopened mid-word.
fn coalesce(spans: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::with_capacity(spans.len());
    for span in spans {
        if span.text.is_empty() {
            continue;
        }
        match merged.last_mut() {
            Some(prev)
                if !prev.equation
                    && !span.equation
                    && prev.marks == span.marks
                    && prev.link == span.link =>
            {
                prev.text.push_str(&span.text);
            }
            _ => merged.push(span.clone()),
        }
    }
    merged
}

fn render_span(span: &Span, ctx: &ConvertContext, out: &mut String) {
    if span.equation {
        out.push('$');
        out.push_str(span.text.trim());
        out.push('$');
        return;
    }

    // Markers must hug the text; surrounding whitespace stays outside.
    let trimmed_start = span.text.trim_start();
    let leading = &span.text[..span.text.len() - trimmed_start.len()];
    let core = trimmed_start.trim_end();
    let trailing = &trimmed_start[core.len()..];

    if core.is_empty() {
        out.push_str(&span.text);
        return;
    }

    let mut inner = if span.marks.code {
        code_span(core)
    } else {
        escape_markdown(core)
    };
    inner = apply_marks(inner, &span.marks);

    if let Some(href) = &span.link {
        let target = rewrite_link(href, ctx);
        inner = format!("[{inner}]({})", link_destination(&target));
    }

    out.push_str(leading);
    out.push_str(&inner);
    out.push_str(trailing);
}

fn apply_marks(mut s: String, marks: &Marks) -> String {
    s = match (marks.bold, marks.italic) {
        (true, true) => format!("***{s}***"),
        (true, false) => format!("**{s}**"),
        (false, true) => format!("*{s}*"),
        (false, false) => s,
    };
    if marks.strikethrough {
        s = format!("~~{s}~~");
    }
    if marks.underline {
        s = format!("<u>{s}</u>");
    }
    if let Some(color) = &marks.color {
        s = format!("<span data-color=\"{}\">{s}</span>", escape_attr(color));
    }
    s
}

/// Backtick code span sized to never collide with backticks in `s`.
fn code_span(s: &str) -> String {
    let longest = s
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    let fence = "`".repeat(longest + 1);
    if s.starts_with('`') || s.ends_with('`') {
        format!("{fence} {s} {fence}")
    } else {
        format!("{fence}{s}{fence}")
    }
}

/// Backslash-escape characters that would otherwise start inline syntax.
pub(crate) fn escape_markdown(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '`' | '*' | '_' | '~' | '[' | ']' | '<') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Rewrite links to synced documents into site paths.
///
/// `#<block-id>` anchors are normalized to the compact ids used by heading
/// anchors; links whose path ends in a known document id become
/// `/<section>/<slug>/`. Everything else passes through unchanged.
pub fn rewrite_link(href: &str, ctx: &ConvertContext) -> String {
    let (base, fragment) = match href.split_once('#') {
        Some((base, frag)) => (base, Some(frag)),
        None => (href, None),
    };
    let anchor = fragment.filter(|f| !f.is_empty()).map(normalize_anchor);

    if base.is_empty() {
        return match anchor {
            Some(a) => format!("#{a}"),
            None => href.to_string(),
        };
    }

    let path = base.split('?').next().unwrap_or(base).trim_end_matches('/');
    let slug = PAGE_ID_RE
        .captures(path)
        .and_then(|c| ctx.slugs.get(&compact_id(&c[1])));

    match (slug, anchor) {
        (Some(slug), Some(a)) => format!("{}#{a}", ctx.document_path(slug)),
        (Some(slug), None) => ctx.document_path(slug),
        (None, _) => href.to_string(),
    }
}

fn normalize_anchor(fragment: &str) -> String {
    if BLOCK_ID_RE.is_match(fragment) {
        compact_id(fragment)
    } else {
        fragment.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ctx() -> ConvertContext {
        let mut slugs = HashMap::new();
        slugs.insert(
            "3f1c2b4aaaaabbbbcccc1234567890ab".to_string(),
            "hello-world".to_string(),
        );
        ConvertContext::new("posts", slugs)
    }

    #[test]
    fn marks_hug_text() {
        let text = RichText::from(vec![
            Span::text("Say "),
            Span::text("hello ").bold(),
            Span::text("and ").italic().bold(),
            Span::text("bye").strikethrough(),
        ]);
        assert_eq!(
            render(&text, &ctx()),
            "Say **hello** ***and*** ~~bye~~"
        );
    }

    #[test]
    fn adjacent_spans_with_same_marks_merge() {
        let text = RichText::from(vec![Span::text("con").bold(), Span::text("cat").bold()]);
        assert_eq!(render(&text, &ctx()), "**concat**");
    }

    #[test]
    fn code_spans_and_escaping() {
        let text = RichText::from(vec![
            Span::text("use "),
            Span::text("a `b`").code(),
            Span::text(" in snake_case [sic]"),
        ]);
        assert_eq!(
            render(&text, &ctx()),
            "use `` a `b` `` in snake\\_case \\[sic\\]"
        );
    }

    #[test]
    fn links_color_underline_and_equation() {
        let text = RichText::from(vec![
            Span::text("docs").link("https://example.com/a b"),
            Span::text(" "),
            Span::text("red").color("red").underline(),
            Span::text(" "),
            Span::equation("e^{i\\pi}"),
        ]);
        assert_eq!(
            render(&text, &ctx()),
            "[docs](<https://example.com/a b>) <span data-color=\"red\"><u>red</u></span> $e^{i\\pi}$"
        );
    }

    #[test]
    fn internal_links_are_rewritten() {
        let ctx = ctx();
        assert_eq!(
            rewrite_link("/3f1c2b4aaaaabbbbcccc1234567890ab", &ctx),
            "/posts/hello-world/"
        );
        assert_eq!(
            rewrite_link(
                "https://www.notion.so/Hello-World-3f1c2b4a-aaaa-bbbb-cccc-1234567890ab?pvs=4#0A1B2C3D-0000-1111-2222-333344445555",
                &ctx
            ),
            "/posts/hello-world/#0a1b2c3d000011112222333344445555"
        );
        assert_eq!(
            rewrite_link("#0A1B2C3D-0000-1111-2222-333344445555", &ctx),
            "#0a1b2c3d000011112222333344445555"
        );
        assert_eq!(
            rewrite_link("https://example.com/unknown", &ctx),
            "https://example.com/unknown"
        );
        assert_eq!(
            rewrite_link("/ffffffffffffffffffffffffffffffff", &ctx),
            "/ffffffffffffffffffffffffffffffff"
        );
    }

    #[test]
    fn whitespace_only_span_is_verbatim() {
        let text = RichText::from(vec![Span::text("a"), Span::text("  ").bold(), Span::text("b")]);
        assert_eq!(render(&text, &ctx()), "a  b");
    }
}
