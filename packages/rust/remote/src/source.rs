//! The read contract the sync engine needs from a document store.

use std::future::Future;

use tracing::{debug, warn};

use docmirror_shared::{Block, DocumentProperties, DocumentSummary, Result};

/// Which documents the list operation returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DocumentFilter {
    /// Every document in the collection.
    All,
    /// Only documents whose published flag is set.
    #[default]
    Published,
}

impl DocumentFilter {
    pub fn matches(&self, properties: &DocumentProperties) -> bool {
        match self {
            Self::All => true,
            Self::Published => properties.published,
        }
    }
}

/// One page of a paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the following page; `None` on the last page.
    pub next_cursor: Option<String>,
}

/// Paginated read access to a hierarchical document store.
///
/// Implementations retry transient failures themselves; an `Err` from any
/// method means the retry budget is spent or the failure is permanent.
pub trait DocumentSource: Send + Sync {
    /// One page of documents matching `filter`, starting at `cursor`.
    fn query_documents(
        &self,
        filter: DocumentFilter,
        cursor: Option<&str>,
    ) -> impl Future<Output = Result<Page<DocumentSummary>>> + Send;

    /// Current property bag of one document.
    fn fetch_properties(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<DocumentProperties>> + Send;

    /// The document's top-level blocks, every descendant resolved.
    fn fetch_block_tree(&self, id: &str) -> impl Future<Output = Result<Vec<Block>>> + Send;
}

/// Lazy, page-at-a-time walk over a listing.
///
/// A failed page leaves the cursor where it was, so calling
/// [`next_page`](Self::next_page) again retries the same page.
pub struct DocumentPager<'a, S: ?Sized> {
    source: &'a S,
    filter: DocumentFilter,
    cursor: Option<String>,
    done: bool,
    pages: usize,
}

impl<'a, S: DocumentSource + ?Sized> DocumentPager<'a, S> {
    pub fn new(source: &'a S, filter: DocumentFilter) -> Self {
        Self {
            source,
            filter,
            cursor: None,
            done: false,
            pages: 0,
        }
    }

    /// Fetch the next page, or `None` once the listing is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<DocumentSummary>>> {
        if self.done {
            return Ok(None);
        }

        let page = self
            .source
            .query_documents(self.filter, self.cursor.as_deref())
            .await?;
        self.pages += 1;

        match page.next_cursor {
            Some(next) if Some(&next) == self.cursor.as_ref() => {
                warn!(cursor = %next, "listing returned the same cursor twice, stopping");
                self.done = true;
            }
            Some(next) => self.cursor = Some(next),
            None => self.done = true,
        }

        debug!(page = self.pages, items = page.items.len(), "listed documents");
        Ok(Some(page.items))
    }

    /// Drain every remaining page.
    pub async fn collect_all(mut self) -> Result<Vec<DocumentSummary>> {
        let mut all = Vec::new();
        while let Some(items) = self.next_page().await? {
            all.extend(items);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::{DateTime, Utc};
    use docmirror_shared::MirrorError;

    fn summary(id: &str, published: bool) -> DocumentSummary {
        let edited: DateTime<Utc> = "2024-03-01T00:00:00Z".parse().unwrap();
        DocumentSummary {
            id: id.into(),
            properties: DocumentProperties {
                title: id.into(),
                published,
                date: edited.fixed_offset(),
                slug: id.into(),
                tags: vec![],
                cover: None,
                last_edited: edited,
            },
        }
    }

    /// Three pages of two; page two fails once.
    struct PagedSource {
        failures_left: Mutex<u32>,
    }

    impl DocumentSource for PagedSource {
        async fn query_documents(
            &self,
            filter: DocumentFilter,
            cursor: Option<&str>,
        ) -> Result<Page<DocumentSummary>> {
            let (ids, next) = match cursor {
                None => (["a", "b"], Some("c2")),
                Some("c2") => {
                    let mut left = self.failures_left.lock().unwrap();
                    if *left > 0 {
                        *left -= 1;
                        return Err(MirrorError::unavailable("rate limited"));
                    }
                    (["c", "d"], Some("c3"))
                }
                Some(_) => (["e", "f"], None),
            };
            let items = ids
                .iter()
                .map(|id| summary(id, *id != "d"))
                .filter(|s| filter.matches(&s.properties))
                .collect();
            Ok(Page {
                items,
                next_cursor: next.map(str::to_string),
            })
        }

        async fn fetch_properties(&self, id: &str) -> Result<DocumentProperties> {
            Ok(summary(id, true).properties)
        }

        async fn fetch_block_tree(&self, _id: &str) -> Result<Vec<Block>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn pager_is_restartable_per_page() {
        let source = PagedSource {
            failures_left: Mutex::new(1),
        };
        let mut pager = DocumentPager::new(&source, DocumentFilter::All);

        assert_eq!(pager.next_page().await.unwrap().unwrap().len(), 2);
        assert!(pager.next_page().await.is_err());
        let retried = pager.next_page().await.unwrap().unwrap();
        assert_eq!(retried[0].id, "c");
        assert_eq!(pager.next_page().await.unwrap().unwrap()[1].id, "f");
        assert!(pager.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn collect_all_applies_filter() {
        let source = PagedSource {
            failures_left: Mutex::new(0),
        };
        let all = DocumentPager::new(&source, DocumentFilter::Published)
            .collect_all()
            .await
            .unwrap();
        let ids: Vec<&str> = all.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "e", "f"]);
    }
}
