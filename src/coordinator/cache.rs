//! Page cache
//!
//! Page-granular copy of a file's bytes served to cache-bound handles. The
//! cache of a file is only ever touched under that file's slot lock, and
//! every write drops it.

use std::collections::HashMap;

/// Upper bound on cached pages per file before the cache is recycled.
const MAX_PAGES_PER_FILE: usize = 256;

#[derive(Debug)]
pub struct PageCache {
    page_size: usize,
    pages: HashMap<u64, Vec<u8>>,
    hits: u64,
    misses: u64,
}

impl PageCache {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            pages: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Returns page `index`, loading it with `load` on a miss. A page shorter
    /// than the page size marks end of file.
    pub fn page_or_load<F>(&mut self, index: u64, load: F) -> std::io::Result<&[u8]>
    where
        F: FnOnce(u64, usize) -> std::io::Result<Vec<u8>>,
    {
        if self.pages.contains_key(&index) {
            self.hits += 1;
        } else {
            self.misses += 1;
            if self.pages.len() >= MAX_PAGES_PER_FILE {
                self.pages.clear();
            }
            let offset = index * self.page_size as u64;
            let page = load(offset, self.page_size)?;
            self.pages.insert(index, page);
        }
        Ok(self.pages.get(&index).map(Vec::as_slice).unwrap_or_default())
    }

    /// Drops every cached page.
    pub fn invalidate(&mut self) {
        self.pages.clear();
    }

    pub fn cached_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
