//! Document Writer: renders output files and writes them only on change.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use docmirror_shared::{MirrorError, Result, sha256_hex};

use crate::frontmatter::FrontMatter;

/// Whether a write touched the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    Written,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub result: WriteResult,
    pub path: PathBuf,
    /// SHA-256 of the rendered file content.
    pub fingerprint: String,
}

/// Writes one Markdown file per document under `<content_dir>/<section>/`.
#[derive(Debug, Clone)]
pub struct DocumentWriter {
    section_dir: PathBuf,
}

impl DocumentWriter {
    pub fn new(content_dir: &Path, section: &str) -> Self {
        let section = section.trim_matches('/');
        let section_dir = if section.is_empty() {
            content_dir.to_path_buf()
        } else {
            content_dir.join(section)
        };
        Self { section_dir }
    }

    /// Deterministic output path for `slug`.
    pub fn output_path(&self, slug: &str) -> PathBuf {
        self.section_dir.join(format!("{slug}.md"))
    }

    /// Header followed by a blank line and the body.
    pub fn render(front_matter: &FrontMatter, body: &str) -> String {
        let mut content = front_matter.render();
        let body = body.trim_end();
        if !body.is_empty() {
            content.push('\n');
            content.push_str(body);
            content.push('\n');
        }
        content
    }

    /// Write the document for `slug` unless the file on disk already holds
    /// exactly this content.
    ///
    /// The on-disk fingerprint is recomputed on every call, so edits made
    /// outside the tool are overwritten.
    #[instrument(skip(self, front_matter, body))]
    pub async fn write(
        &self,
        slug: &str,
        front_matter: &FrontMatter,
        body: &str,
    ) -> Result<WriteOutcome> {
        let path = self.output_path(slug);
        let content = Self::render(front_matter, body);
        let fingerprint = sha256_hex(content.as_bytes());

        if let Ok(existing) = tokio::fs::read(&path).await {
            if sha256_hex(&existing) == fingerprint {
                debug!(path = %path.display(), "output unchanged");
                return Ok(WriteOutcome {
                    result: WriteResult::Unchanged,
                    path,
                    fingerprint,
                });
            }
        }

        tokio::fs::create_dir_all(&self.section_dir)
            .await
            .map_err(|e| MirrorError::write_failed(&self.section_dir, e))?;

        let temp = self.section_dir.join(format!(".{slug}.md.tmp"));
        tokio::fs::write(&temp, content.as_bytes())
            .await
            .map_err(|e| MirrorError::write_failed(&temp, e))?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(MirrorError::write_failed(&path, e));
        }

        info!(path = %path.display(), bytes = content.len(), "wrote document");
        Ok(WriteOutcome {
            result: WriteResult::Written,
            path,
            fingerprint,
        })
    }

    /// Delete a previously written output. Missing files are not an error.
    pub async fn remove(&self, path: &Path) -> Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                info!(path = %path.display(), "removed document");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MirrorError::io(path, e)),
        }
    }

    /// Delete every `.md` file directly under the section directory.
    pub async fn clean_section(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.section_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(MirrorError::io(&self.section_dir, e)),
        };

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MirrorError::io(&self.section_dir, e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "md") && path.is_file() {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| MirrorError::io(&path, e))?;
                removed += 1;
            }
        }
        info!(dir = %self.section_dir.display(), removed, "cleaned section");
        Ok(removed)
    }
}
