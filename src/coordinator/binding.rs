//! Binding table entries
//!
//! One slot per underlying file, keyed by file identity rather than path so
//! that a file keeps its bindings across renames.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::coordinator::cache::PageCache;
use crate::coordinator::BindingKind;

/// Identity of an underlying file.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileKey {
    dev: u64,
    ino: u64,
}

#[cfg(unix)]
impl FileKey {
    pub fn of(file: &File, _path: &Path) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;
        let meta = file.metadata()?;
        Ok(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    pub fn for_path(path: &Path) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }
}

/// Identity of an underlying file.
#[cfg(not(unix))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileKey {
    path: std::path::PathBuf,
}

#[cfg(not(unix))]
impl FileKey {
    pub fn of(_file: &File, path: &Path) -> io::Result<Self> {
        Self::for_path(path)
    }

    pub fn for_path(path: &Path) -> io::Result<Self> {
        Ok(Self {
            path: std::fs::canonicalize(path)?,
        })
    }
}

#[derive(Debug)]
pub(crate) struct SlotState {
    pub direct_refs: usize,
    pub cached_refs: usize,
    /// Set once the last reference is gone; a retired slot is never reused.
    pub retired: bool,
    pub cache: PageCache,
}

impl SlotState {
    /// Binding for a new open: direct for the first writer, cached otherwise.
    pub fn bind(&mut self, write_intent: bool) -> BindingKind {
        let kind = if write_intent && self.direct_refs == 0 {
            BindingKind::Direct
        } else {
            BindingKind::Cached
        };
        self.retain(kind);
        kind
    }

    pub fn retain(&mut self, kind: BindingKind) {
        match kind {
            BindingKind::Direct => self.direct_refs += 1,
            BindingKind::Cached => self.cached_refs += 1,
        }
    }

    /// Drops one reference; returns true when the slot has none left and
    /// has been retired.
    pub fn release(&mut self, kind: BindingKind) -> bool {
        match kind {
            BindingKind::Direct => self.direct_refs = self.direct_refs.saturating_sub(1),
            BindingKind::Cached => self.cached_refs = self.cached_refs.saturating_sub(1),
        }
        if self.direct_refs == 0 && self.cached_refs == 0 {
            self.retired = true;
            self.cache.invalidate();
        }
        self.retired
    }
}

#[derive(Debug)]
pub(crate) struct FileSlot {
    state: Mutex<SlotState>,
}

impl FileSlot {
    pub fn new(page_size: usize) -> Self {
        Self {
            state: Mutex::new(SlotState {
                direct_refs: 0,
                cached_refs: 0,
                retired: false,
                cache: PageCache::new(page_size),
            }),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
