//! Paged traversal of list endpoints
//!
//! Large collections come back in chunks: each page carries an opaque
//! `metadata.continue` token that resumes the traversal. [`PagedList`]
//! reconstructs the logical collection, either fully materialised
//! ([`PagedList::get`]) or as a lazy per-item sequence
//! ([`PagedList::stream`]).

use std::rc::Rc;

use serde_json::Value;

use crate::{
    client::transport::{Backend, Query},
    jsonpath, Result,
};

/// A paged view over one list endpoint
pub struct PagedList {
    backend: Rc<dyn Backend>,
    endpoint: String,
    params: Query,
}

impl PagedList {
    pub(crate) fn new(backend: Rc<dyn Backend>, endpoint: String, params: Query) -> Self {
        PagedList {
            backend,
            endpoint,
            params,
        }
    }

    /// Fetch and merge all pages into one list document
    ///
    /// Follows `metadata.continue` until the server stops handing one out,
    /// concatenating `items` in order. The merged document keeps the final
    /// page's `metadata`. A positive `max_pages` caps the traversal at
    /// exactly that many requests.
    pub fn get(&self, max_pages: usize) -> Result<Value> {
        let mut merged = self.fetch(None)?;
        let mut pages = 1usize;
        let mut token = continue_token(&merged);
        while let Some(t) = token {
            if max_pages > 0 && pages >= max_pages {
                break;
            }
            let page = self.fetch(Some(&t))?;
            pages += 1;
            token = continue_token(&page);
            merge_page(&mut merged, page);
        }
        tracing::debug!(endpoint = %self.endpoint, pages, "list traversal complete");
        Ok(merged)
    }

    /// Lazily yield every item, page by page
    ///
    /// Pages are fetched on demand; the full collection is never
    /// materialised. Yields exactly the concatenation of the `items`
    /// arrays that [`PagedList::get`] would merge.
    pub fn stream(&self, max_pages: usize) -> Items<'_> {
        Items {
            list: self,
            max_pages,
            pages: 0,
            cursor: Cursor::Start,
            items: Vec::new().into_iter(),
        }
    }

    fn fetch(&self, token: Option<&str>) -> Result<Value> {
        let mut params = self.params.clone();
        if let Some(t) = token {
            params.insert("continue".into(), t.into());
        }
        self.backend.get_json(&self.endpoint, &params)
    }
}

/// The continue token of a page, if the traversal should go on
fn continue_token(page: &Value) -> Option<String> {
    jsonpath::get(page, "metadata.continue")
        .ok()
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}

fn merge_page(merged: &mut Value, mut page: Value) {
    let new_items = match page.get_mut("items").map(Value::take) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };
    if let Some(Value::Array(items)) = merged.get_mut("items") {
        items.extend(new_items);
    }
    if let (Some(obj), Some(meta)) = (merged.as_object_mut(), page.get_mut("metadata")) {
        obj.insert("metadata".into(), meta.take());
    }
}

enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Lazy item sequence produced by [`PagedList::stream`]
pub struct Items<'a> {
    list: &'a PagedList,
    max_pages: usize,
    pages: usize,
    cursor: Cursor,
    items: std::vec::IntoIter<Value>,
}

impl Iterator for Items<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.items.next() {
                return Some(Ok(item));
            }
            let token = match &self.cursor {
                Cursor::Start => None,
                Cursor::Next(t) => Some(t.clone()),
                Cursor::Done => return None,
            };
            if self.max_pages > 0 && self.pages >= self.max_pages {
                self.cursor = Cursor::Done;
                return None;
            }
            match self.list.fetch(token.as_deref()) {
                Ok(mut page) => {
                    self.pages += 1;
                    self.cursor = match continue_token(&page) {
                        Some(t) => Cursor::Next(t),
                        None => Cursor::Done,
                    };
                    let items = match page.get_mut("items").map(Value::take) {
                        Some(Value::Array(items)) => items,
                        _ => Vec::new(),
                    };
                    self.items = items.into_iter();
                }
                Err(e) => {
                    self.cursor = Cursor::Done;
                    return Some(Err(e));
                }
            }
        }
    }
}
