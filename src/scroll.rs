//! Cursor-based pagination over the search index's scroll API.
//!
//! [`PageCursor`] walks an entire index page by page. The server keeps a
//! scroll context alive between fetches; that context is a real server-side
//! resource, so the cursor must be released exactly once on every exit path —
//! normal exhaustion, page-limit stop, or early abandonment. The
//! orchestrator calls [`PageCursor::release`] in a finally-style position;
//! the cursor guards against double release internally.

use crate::client::SearchIndex;
use crate::error::TransferError;
use crate::models::Hit;

/// How many pages to consume: the whole index, or a fixed count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLimit {
    All,
    Pages(usize),
}

impl PageLimit {
    fn reached(self, pages_seen: usize) -> bool {
        match self {
            PageLimit::All => false,
            PageLimit::Pages(limit) => pages_seen >= limit,
        }
    }
}

/// Sequential page iterator over one index. Single-consumer.
pub struct PageCursor<'a> {
    index: &'a dyn SearchIndex,
    index_name: String,
    page_size: usize,
    limit: PageLimit,
    scroll_id: Option<String>,
    pages_seen: usize,
    exhausted: bool,
}

impl<'a> PageCursor<'a> {
    pub fn new(
        index: &'a dyn SearchIndex,
        index_name: &str,
        page_size: usize,
        limit: PageLimit,
    ) -> Self {
        Self {
            index,
            index_name: index_name.to_string(),
            page_size,
            limit,
            scroll_id: None,
            pages_seen: 0,
            exhausted: false,
        }
    }

    /// Fetch the next page of hits. Returns `None` when the index is
    /// exhausted (a page with zero records) or the page limit is reached.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Hit>>, TransferError> {
        if self.exhausted || self.limit.reached(self.pages_seen) {
            self.exhausted = true;
            return Ok(None);
        }

        let page = match &self.scroll_id {
            None => {
                self.index
                    .scroll_start(&self.index_name, self.page_size)
                    .await?
            }
            Some(id) => self.index.scroll_next(id).await?,
        };
        self.scroll_id = Some(page.scroll_id);

        if page.hits.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }

        self.pages_seen += 1;
        Ok(Some(page.hits))
    }

    /// Pages consumed so far.
    pub fn pages_seen(&self) -> usize {
        self.pages_seen
    }

    /// Release the server-side scroll context. Idempotent: the token is
    /// taken on first call, so repeated calls are no-ops. Must be called on
    /// every exit path once consumption stops, including early aborts.
    pub async fn release(&mut self) -> Result<(), TransferError> {
        if let Some(id) = self.scroll_id.take() {
            self.index.clear_scroll(&id).await?;
        }
        Ok(())
    }
}
