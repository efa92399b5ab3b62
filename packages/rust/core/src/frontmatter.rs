//! YAML metadata header for output documents.

use std::fmt::Write as _;

use docmirror_shared::DocumentProperties;

/// Everything the header needs, gathered after conversion and media resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontMatter {
    pub title: String,
    pub date: String,
    pub lastmod: String,
    pub slug: String,
    pub tags: Vec<String>,
    pub math: bool,
    pub mermaid: bool,
    /// Site path of the downloaded cover image.
    pub cover: Option<String>,
}

impl FrontMatter {
    pub fn new(
        properties: &DocumentProperties,
        math: bool,
        mermaid: bool,
        cover: Option<String>,
    ) -> Self {
        Self {
            title: properties.title.clone(),
            date: properties.date.to_rfc3339(),
            lastmod: properties.last_edited.to_rfc3339(),
            slug: properties.slug.clone(),
            tags: properties.tags.clone(),
            math,
            mermaid,
            cover,
        }
    }

    /// Render between `---` fences, trailing newline included.
    pub fn render(&self) -> String {
        let mut fm = String::from("---\n");
        let _ = writeln!(fm, "title: \"{}\"", escape_yaml_string(&self.title));
        let _ = writeln!(fm, "date: \"{}\"", self.date);
        let _ = writeln!(fm, "lastmod: \"{}\"", self.lastmod);
        let _ = writeln!(fm, "slug: \"{}\"", escape_yaml_string(&self.slug));

        if self.tags.is_empty() {
            fm.push_str("tags: []\n");
        } else {
            fm.push_str("tags:\n");
            for tag in &self.tags {
                let _ = writeln!(fm, "  - \"{}\"", escape_yaml_string(tag));
            }
        }

        fm.push_str("draft: false\n");
        let _ = writeln!(fm, "math: {}", self.math);
        if self.mermaid {
            fm.push_str("mermaid: true\n");
        }
        if let Some(image) = &self.cover {
            fm.push_str("cover:\n");
            let _ = writeln!(fm, "  image: \"{}\"", escape_yaml_string(image));
            let _ = writeln!(fm, "  alt: \"{}\"", escape_yaml_string(&self.title));
        }
        fm.push_str("---\n");
        fm
    }
}

/// Escape special characters in a double-quoted YAML scalar.
fn escape_yaml_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn properties() -> DocumentProperties {
        DocumentProperties {
            title: "Say \"hi\" \\ bye".into(),
            published: true,
            date: Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap().fixed_offset(),
            slug: "say-hi".into(),
            tags: vec!["rust".into(), "async io".into()],
            cover: None,
            last_edited: Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn renders_all_fields() {
        let fm = FrontMatter::new(&properties(), true, true, Some("/images/c.jpg".into()));
        assert_eq!(
            fm.render(),
            "---\n\
             title: \"Say \\\"hi\\\" \\\\ bye\"\n\
             date: \"2024-03-01T09:30:00+00:00\"\n\
             lastmod: \"2024-03-02T10:00:00+00:00\"\n\
             slug: \"say-hi\"\n\
             tags:\n  - \"rust\"\n  - \"async io\"\n\
             draft: false\n\
             math: true\n\
             mermaid: true\n\
             cover:\n  image: \"/images/c.jpg\"\n  alt: \"Say \\\"hi\\\" \\\\ bye\"\n\
             ---\n"
        );
    }

    #[test]
    fn optional_fields_omitted() {
        let mut props = properties();
        props.tags.clear();
        let out = FrontMatter::new(&props, false, false, None).render();
        assert!(out.contains("tags: []\n"));
        assert!(out.contains("math: false\n"));
        assert!(!out.contains("mermaid"));
        assert!(!out.contains("cover"));
    }
}
