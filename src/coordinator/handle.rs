//! Open handles
//!
//! An `OpenHandle` is one reference on its file's binding. Direct handles do
//! positional I/O on the lower file; cache-bound handles read through the
//! file's page cache. Writes from either kind go to the lower file under the
//! slot lock and drop the cache before the lock is released, so the next
//! read through any binding sees them.

use std::fs::File;
use std::io;
use std::sync::Arc;

use log::{debug, warn};

use crate::coordinator::binding::{FileKey, FileSlot};
use crate::coordinator::{BindingKind, OpenMode, SlotTable};
use crate::index::NO_ROW_ID;

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(unix)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(buf, offset)
}

#[cfg(windows)]
fn write_at(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(buf, offset)
}

/// Reads up to `len` bytes at `offset`, stopping early only at end of file.
pub(crate) fn read_full_at(file: &File, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        match read_at(file, &mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

fn write_all_at(file: &File, mut data: &[u8], mut offset: u64) -> io::Result<()> {
    while !data.is_empty() {
        match write_at(file, data, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ));
            }
            Ok(n) => {
                data = &data[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[derive(Debug)]
pub struct OpenHandle {
    file: File,
    kind: BindingKind,
    mode: OpenMode,
    path: String,
    key: FileKey,
    slot: Arc<FileSlot>,
    table: Arc<SlotTable>,
    row_id: i64,
    written: bool,
}

impl OpenHandle {
    pub(crate) fn new(
        file: File,
        kind: BindingKind,
        mode: OpenMode,
        path: &str,
        key: FileKey,
        slot: Arc<FileSlot>,
        table: Arc<SlotTable>,
    ) -> Self {
        Self {
            file,
            kind,
            mode,
            path: path.to_string(),
            key,
            slot,
            table,
            row_id: NO_ROW_ID,
            written: false,
        }
    }

    /// Virtual path the handle was opened with.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Row id of the ownership record seen at open, `NO_ROW_ID` for
    /// untracked files.
    pub fn row_id(&self) -> i64 {
        self.row_id
    }

    pub(crate) fn attach_record(&mut self, row_id: i64) {
        self.row_id = row_id;
    }

    pub fn binding(&self) -> BindingKind {
        self.kind
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// True once this handle has changed the file's contents or length.
    pub fn has_written(&self) -> bool {
        self.written
    }

    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        if !self.mode.read {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "handle not open for reading",
            ));
        }

        match self.kind {
            BindingKind::Direct => read_full_at(&self.file, offset, len),
            BindingKind::Cached => self.read_cached(offset, len),
        }
    }

    fn read_cached(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut state = self.slot.lock();
        let page_size = state.cache.page_size() as u64;
        let end = offset.saturating_add(len as u64);
        let mut out = Vec::with_capacity(len);
        let mut pos = offset;

        while pos < end {
            let index = pos / page_size;
            let within = (pos - index * page_size) as usize;
            let page = state
                .cache
                .page_or_load(index, |off, size| read_full_at(&self.file, off, size))?;
            if within >= page.len() {
                break;
            }
            let take = (page.len() - within).min((end - pos) as usize);
            out.extend_from_slice(&page[within..within + take]);
            pos += take as u64;
            if page.len() < page_size as usize {
                break;
            }
        }
        Ok(out)
    }

    /// Writes `data` at `offset` (or at end of file in append mode) and
    /// returns the offset actually written at.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<u64> {
        if !self.mode.wants_write() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "handle not open for writing",
            ));
        }

        let mut state = self.slot.lock();
        let offset = if self.mode.append { self.len()? } else { offset };
        let result = write_all_at(&self.file, data, offset);
        // Drop pages even after a partial write
        state.cache.invalidate();
        drop(state);

        result?;
        self.written = true;
        debug!(
            "{:?} write of {} bytes at {} on {}",
            self.kind,
            data.len(),
            offset,
            self.path
        );
        Ok(offset)
    }

    pub fn truncate(&mut self, size: u64) -> io::Result<()> {
        if !self.mode.wants_write() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "handle not open for writing",
            ));
        }

        let mut state = self.slot.lock();
        let result = self.file.set_len(size);
        state.cache.invalidate();
        drop(state);

        result?;
        self.written = true;
        Ok(())
    }

    /// Creates a second handle sharing this handle's binding.
    pub fn duplicate(&self) -> io::Result<OpenHandle> {
        let file = self.file.try_clone()?;
        self.slot.lock().retain(self.kind);
        debug!("Duplicated {:?} handle on {}", self.kind, self.path);
        let mut handle = OpenHandle::new(
            file,
            self.kind,
            self.mode,
            &self.path,
            self.key.clone(),
            Arc::clone(&self.slot),
            Arc::clone(&self.table),
        );
        handle.attach_record(self.row_id);
        Ok(handle)
    }
}

impl Drop for OpenHandle {
    fn drop(&mut self) {
        let mut state = self.slot.lock();
        let cached_pages = state.cache.cached_pages();
        let retired = state.release(self.kind);
        if retired {
            let (hits, misses) = state.cache.stats();
            debug!(
                "Retiring {}: {} cache hits, {} misses, {} pages dropped",
                self.path, hits, misses, cached_pages
            );
        }
        drop(state);
        debug!("Released {:?} binding on {}", self.kind, self.path);
        if retired {
            self.table.remove_if_same(&self.key, &self.slot);
        }
        if self.written {
            if let Err(e) = self.file.sync_data() {
                warn!("Failed to sync {}: {}", self.path, e);
            }
        }
    }
}
