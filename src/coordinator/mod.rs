//! Dual-path I/O coordinator
//!
//! Decides, per open, whether a handle binds straight to the lower file
//! (direct) or goes through the page cache (cached), and keeps both views of
//! a file coherent. At most one direct binding exists per file; every other
//! handle is cache-bound.
//!
//! The binding table is keyed per file and each file has its own lock, so
//! opens, closes and I/O on unrelated files never contend beyond the brief
//! table lookup.

mod binding;
mod cache;
mod handle;

use std::collections::HashMap;
use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, info};

use crate::error::ProtocolError;

pub use binding::FileKey;
pub use cache::PageCache;
pub use handle::OpenHandle;

use binding::FileSlot;

pub const DEFAULT_PAGE_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// Mapped straight to the lower filesystem.
    Direct,
    /// Served through the page cache.
    Cached,
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingKind::Direct => write!(f, "direct"),
            BindingKind::Cached => write!(f, "cached"),
        }
    }
}

/// How a file is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenMode {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub truncate: bool,
    pub create: bool,
    pub exclusive: bool,
}

impl OpenMode {
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            ..Self::default()
        }
    }

    pub fn write_only() -> Self {
        Self {
            write: true,
            ..Self::default()
        }
    }

    pub fn with_create(mut self) -> Self {
        self.create = true;
        self
    }

    pub fn with_truncate(mut self) -> Self {
        self.truncate = true;
        self
    }

    pub fn wants_write(&self) -> bool {
        self.write || self.append || self.truncate
    }
}

impl FromStr for OpenMode {
    type Err = ProtocolError;

    /// Parses mode letters: `r`ead, `w`rite, `a`ppend, `t`runcate,
    /// `c`reate, e`x`clusive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mode = OpenMode::default();
        for letter in s.chars() {
            match letter.to_ascii_lowercase() {
                'r' => mode.read = true,
                'w' => mode.write = true,
                'a' => mode.append = true,
                't' => mode.truncate = true,
                'c' => mode.create = true,
                'x' => mode.exclusive = true,
                _ => return Err(ProtocolError::InvalidMode(s.to_string())),
            }
        }

        if !mode.read && !mode.wants_write() {
            return Err(ProtocolError::InvalidMode(s.to_string()));
        }
        if mode.exclusive && !mode.create {
            return Err(ProtocolError::InvalidMode(s.to_string()));
        }
        Ok(mode)
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (set, letter) in [
            (self.read, 'r'),
            (self.write, 'w'),
            (self.append, 'a'),
            (self.truncate, 't'),
            (self.create, 'c'),
            (self.exclusive, 'x'),
        ] {
            if set {
                write!(f, "{}", letter)?;
            }
        }
        Ok(())
    }
}

/// Live references on one file's bindings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindingCounts {
    pub direct: usize,
    pub cached: usize,
}

#[derive(Debug)]
pub(crate) struct SlotTable {
    slots: RwLock<HashMap<FileKey, Arc<FileSlot>>>,
    page_size: usize,
}

impl SlotTable {
    fn get_or_insert(&self, key: &FileKey) -> Arc<FileSlot> {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
        {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(FileSlot::new(self.page_size))),
        )
    }

    fn get(&self, key: &FileKey) -> Option<Arc<FileSlot>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Removes `key` only if it still maps to `slot`.
    pub(crate) fn remove_if_same(&self, key: &FileKey, slot: &Arc<FileSlot>) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(key);
        }
    }

    fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[derive(Debug)]
pub struct Coordinator {
    table: Arc<SlotTable>,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl Coordinator {
    pub fn new(page_size: usize) -> Self {
        info!("I/O coordinator using {} byte pages", page_size);
        Self {
            table: Arc::new(SlotTable {
                slots: RwLock::new(HashMap::new()),
                page_size: page_size.max(1),
            }),
        }
    }

    pub fn page_size(&self) -> usize {
        self.table.page_size
    }

    /// Opens an existing file and binds the handle.
    ///
    /// Write intent takes the direct binding when no other handle holds it;
    /// everything else is cache-bound. Truncation happens after binding so
    /// that it invalidates the shared cache.
    pub fn open(&self, real_path: &Path, virtual_path: &str, mode: OpenMode) -> io::Result<OpenHandle> {
        let file = OpenOptions::new()
            .read(true)
            .write(mode.wants_write())
            .open(real_path)?;
        let key = FileKey::of(&file, real_path)?;

        let (slot, kind) = loop {
            let slot = self.table.get_or_insert(&key);
            let mut state = slot.lock();
            if state.retired {
                drop(state);
                self.table.remove_if_same(&key, &slot);
                continue;
            }
            let kind = state.bind(mode.wants_write());
            drop(state);
            break (slot, kind);
        };

        debug!("Bound {} as {} ({})", virtual_path, kind, mode);
        let mut handle = OpenHandle::new(
            file,
            kind,
            mode,
            virtual_path,
            key,
            slot,
            Arc::clone(&self.table),
        );

        if mode.truncate {
            handle.truncate(0)?;
        }
        Ok(handle)
    }

    /// Current binding references on the file at `real_path`.
    pub fn binding_counts(&self, real_path: &Path) -> io::Result<BindingCounts> {
        let key = FileKey::for_path(real_path)?;
        Ok(self
            .table
            .get(&key)
            .map(|slot| {
                let state = slot.lock();
                BindingCounts {
                    direct: state.direct_refs,
                    cached: state.cached_refs,
                }
            })
            .unwrap_or_default())
    }

    /// Number of files with at least one live handle.
    pub fn tracked_files(&self) -> usize {
        self.table.len()
    }
}
