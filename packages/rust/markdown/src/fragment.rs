//! Text fragments with media placeholders resolved after download.

use std::collections::HashMap;
use std::fmt::Write as _;

use docmirror_shared::{MediaDescriptor, MediaSource};

/// How a media placeholder renders once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaStyle {
    /// `<figure>` with an `<img>` and optional caption.
    Figure,
    /// `<video>` player.
    Video,
    /// `<audio>` player.
    Audio,
    /// Inline link prefixed with an icon.
    FileLink { icon: &'static str },
}

/// Placeholder for one media reference, carrying the raw descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSlot {
    pub descriptor: MediaDescriptor,
    pub style: MediaStyle,
    /// Plain-text alternative (image `alt`).
    pub alt: String,
    /// Rendered caption; empty when the block has none.
    pub caption: String,
    /// Link text for file-style slots.
    pub label: String,
    /// Site-relative path once the asset is on disk.
    pub local_path: Option<String>,
}

impl MediaSlot {
    /// Where the rendered reference points: the local copy, or for external
    /// assets the original URL. Hosted URLs expire, so they never leak out.
    fn target(&self) -> Option<&str> {
        match (&self.local_path, &self.descriptor.source) {
            (Some(path), _) => Some(path),
            (None, MediaSource::External { url }) => Some(url),
            (None, MediaSource::Hosted { .. }) => None,
        }
    }

    fn render(&self, out: &mut String) {
        let Some(target) = self.target() else {
            let _ = write!(
                out,
                "<!-- media unavailable: {} -->",
                self.descriptor.dedup_key()
            );
            return;
        };
        let src = escape_attr(target);

        match &self.style {
            MediaStyle::Figure => {
                let _ = write!(
                    out,
                    "<figure><img src=\"{src}\" alt=\"{}\">",
                    escape_attr(&self.alt)
                );
                if !self.caption.is_empty() {
                    let _ = write!(out, "<figcaption>{}</figcaption>", self.caption);
                }
                out.push_str("</figure>");
            }
            MediaStyle::Video => {
                let _ = write!(
                    out,
                    "<video controls style=\"width: 100%; max-width: 800px;\"><source src=\"{src}\"></video>"
                );
            }
            MediaStyle::Audio => {
                let _ = write!(
                    out,
                    "<audio controls preload=\"none\" style=\"width: 100%;\"><source src=\"{src}\"></audio>"
                );
            }
            MediaStyle::FileLink { icon } => {
                let _ = write!(out, "{icon} [{}]({})", self.label, link_destination(target));
            }
        }
    }
}

/// One piece of a fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    Media(Box<MediaSlot>),
}

/// Converted output for a block or subtree.
///
/// Text is final; media parts stay placeholders until [`Fragment::resolve`]
/// fills in local paths. Media parts always render on a single line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    parts: Vec<Part>,
}

impl Fragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(s: impl Into<String>) -> Self {
        let mut f = Self::new();
        f.push_str(&s.into());
        f
    }

    pub fn media(slot: MediaSlot) -> Self {
        Self {
            parts: vec![Part::Media(Box::new(slot))],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(|p| match p {
            Part::Text(s) => s.is_empty(),
            Part::Media(_) => false,
        })
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn push_str(&mut self, s: &str) {
        if s.is_empty() {
            return;
        }
        match self.parts.last_mut() {
            Some(Part::Text(last)) => last.push_str(s),
            _ => self.parts.push(Part::Text(s.to_string())),
        }
    }

    pub fn append(&mut self, other: Fragment) {
        for part in other.parts {
            match part {
                Part::Text(s) => self.push_str(&s),
                media => self.parts.push(media),
            }
        }
    }

    /// Prefix every line: `first` on the first line, `rest` on the others.
    /// Blank lines get the prefix with trailing whitespace trimmed.
    pub fn prefix_lines(self, first: &str, rest: &str) -> Fragment {
        let mut out = Fragment::new();
        let mut at_line_start = true;
        let mut on_first_line = true;

        let prefix = |on_first: bool| if on_first { first } else { rest };

        for part in self.parts {
            match part {
                Part::Text(s) => {
                    for (i, piece) in s.split('\n').enumerate() {
                        if i > 0 {
                            if at_line_start {
                                out.push_str(prefix(on_first_line).trim_end());
                            }
                            out.push_str("\n");
                            at_line_start = true;
                            on_first_line = false;
                        }
                        if !piece.is_empty() {
                            if at_line_start {
                                out.push_str(prefix(on_first_line));
                                at_line_start = false;
                            }
                            out.push_str(piece);
                        }
                    }
                }
                Part::Media(slot) => {
                    if at_line_start {
                        out.push_str(prefix(on_first_line));
                        at_line_start = false;
                    }
                    out.parts.push(Part::Media(slot));
                }
            }
        }

        if at_line_start {
            out.push_str(prefix(on_first_line).trim_end());
        }
        out
    }

    /// Every media placeholder, in document order.
    pub fn slots(&self) -> impl Iterator<Item = &MediaSlot> {
        self.parts.iter().filter_map(|p| match p {
            Part::Media(slot) => Some(slot.as_ref()),
            Part::Text(_) => None,
        })
    }

    /// Point every placeholder whose dedup key was resolved at its local path.
    /// Returns how many placeholders stayed unresolved.
    pub fn resolve(&mut self, resolved: &HashMap<String, String>) -> usize {
        let mut unresolved = 0;
        for part in &mut self.parts {
            if let Part::Media(slot) = part {
                slot.local_path = resolved.get(&slot.descriptor.dedup_key()).cloned();
                if slot.local_path.is_none() {
                    unresolved += 1;
                }
            }
        }
        unresolved
    }

    /// Final text, placeholders rendered in their current state.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(s) => out.push_str(s),
                Part::Media(slot) => slot.render(&mut out),
            }
        }
        out
    }
}

/// Markdown link destination, angle-bracketed when it would not parse bare.
pub(crate) fn link_destination(target: &str) -> String {
    if target.contains([' ', '(', ')', '<', '>']) {
        format!("<{}>", target.replace('<', "%3C").replace('>', "%3E"))
    } else {
        target.to_string()
    }
}

/// Escape a value for a double-quoted HTML attribute.
pub(crate) fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use docmirror_shared::MediaKind;

    fn image_slot(asset_id: &str) -> MediaSlot {
        MediaSlot {
            descriptor: MediaDescriptor::new(
                MediaKind::Image,
                MediaSource::Hosted {
                    asset_id: asset_id.into(),
                    url: format!("https://files.example.com/{asset_id}/a.png?sig=1"),
                },
            ),
            style: MediaStyle::Figure,
            alt: "A \"cat\"".into(),
            caption: "A *cat*".into(),
            label: String::new(),
            local_path: None,
        }
    }

    #[test]
    fn prefix_lines_handles_blank_lines_and_media() {
        let mut f = Fragment::text("quote\n\n");
        f.append(Fragment::media(image_slot("x")));
        let prefixed = f.prefix_lines("> ", "> ");
        let rendered = prefixed.render();
        assert_eq!(
            rendered,
            "> quote\n>\n> <!-- media unavailable: hosted:x -->"
        );
    }

    #[test]
    fn indent_leaves_blank_lines_empty() {
        let f = Fragment::text("a\n\nb").prefix_lines("    ", "    ");
        assert_eq!(f.render(), "    a\n\n    b");
    }

    #[test]
    fn resolve_rewrites_placeholders() {
        let mut f = Fragment::text("before\n");
        f.append(Fragment::media(image_slot("x")));
        f.append(Fragment::media(image_slot("y")));

        let mut resolved = HashMap::new();
        resolved.insert("hosted:x".to_string(), "/images/x.png".to_string());
        assert_eq!(f.resolve(&resolved), 1);

        let out = f.render();
        assert!(out.starts_with(
            "before\n<figure><img src=\"/images/x.png\" alt=\"A &quot;cat&quot;\"><figcaption>A *cat*</figcaption></figure>"
        ));
        assert!(out.ends_with("<!-- media unavailable: hosted:y -->"));
    }

    #[test]
    fn external_media_falls_back_to_url() {
        let slot = MediaSlot {
            descriptor: MediaDescriptor::new(
                MediaKind::Audio,
                MediaSource::External {
                    url: "https://cdn.example.com/a.mp3".into(),
                },
            ),
            style: MediaStyle::Audio,
            alt: String::new(),
            caption: String::new(),
            label: String::new(),
            local_path: None,
        };
        assert_eq!(
            Fragment::media(slot).render(),
            "<audio controls preload=\"none\" style=\"width: 100%;\"><source src=\"https://cdn.example.com/a.mp3\"></audio>"
        );
    }

    #[test]
    fn push_str_merges_text() {
        let mut f = Fragment::text("a");
        f.push_str("b");
        f.push_str("");
        assert_eq!(f.parts().len(), 1);
        assert!(!f.is_empty());
        assert!(Fragment::new().is_empty());
    }
}
