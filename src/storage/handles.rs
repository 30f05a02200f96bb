//! Open and close
//!
//! Opening checks read and write access against the file's record, creating
//! the file first when asked to, and then hands the file to the coordinator
//! to pick a binding.

use std::fs;

use log::{debug, info, warn};

use crate::arbiter::Arbiter;
use crate::auth::CallerIdentity;
use crate::classify::classify;
use crate::coordinator::{OpenHandle, OpenMode};
use crate::error::{ArbiterError, IndexError};
use crate::index::{OwnershipUpdate, row_id_of};
use crate::policy::Operation;
use crate::storage::validation::normalize_virtual_path;

impl Arbiter {
    pub fn open(
        &self,
        caller: &CallerIdentity,
        path: &str,
        mode: OpenMode,
    ) -> Result<OpenHandle, ArbiterError> {
        let path = normalize_virtual_path(path)?;
        let caps = self.capabilities_of(caller);
        self.require_visible(&path, &caps)?;
        let _guard = self.locks.exact(&path);
        let real_path = self.real_path(&path);

        // 1. Existence, creating on demand
        match fs::metadata(&real_path) {
            Ok(meta) if meta.is_dir() => return Err(ArbiterError::IsADirectory(path)),
            Ok(_) if mode.create && mode.exclusive => {
                return Err(ArbiterError::AlreadyExists(path));
            }
            Ok(_) => {}
            Err(_) if mode.create => {
                self.create_locked(&caps, &path)?;
            }
            Err(e) => return Err(ArbiterError::from_io(&path, e)),
        }

        // 2. Access checks
        let facts = classify(&path);
        let record = self.owner_of(&path)?;
        if mode.read {
            self.authorize(Operation::Read, &facts, &caps, record.as_ref())?;
        }
        if mode.wants_write() {
            self.authorize(Operation::Write, &facts, &caps, record.as_ref())?;
        }

        // 3. Bind
        let mut handle = self
            .coordinator()
            .open(&real_path, &path, mode)
            .map_err(|e| ArbiterError::from_io(&path, e))?;
        handle.attach_record(row_id_of(record.as_ref()));
        info!(
            "{} opened {} ({}, {})",
            caps.package_name,
            path,
            mode,
            handle.binding()
        );
        Ok(handle)
    }

    /// Releases a handle. A handle that wrote refreshes the size stored in
    /// the file's record, provided the record at its path is still the one
    /// it opened.
    pub fn close(&self, handle: OpenHandle) -> Result<(), ArbiterError> {
        if !handle.has_written() {
            debug!("Closed {}", handle.path());
            return Ok(());
        }

        let path = handle.path().to_string();
        let row_id = handle.row_id();
        let size = handle.len().map_err(|e| ArbiterError::from_io(&path, e))?;
        drop(handle);

        let _guard = self.locks.exact(&path);
        match self.owner_of(&path)? {
            Some(record) if record.row_id == row_id => {}
            Some(record) => {
                warn!(
                    "Closed {} but its record is now row {} (opened as row {}); size not updated",
                    path, record.row_id, row_id
                );
                return Ok(());
            }
            None => {
                warn!("Closed {} with no record to update", path);
                return Ok(());
            }
        }

        match self.index().update(&path, &OwnershipUpdate::resized(size)) {
            Ok(()) => {
                debug!("Closed {} at {} bytes", path, size);
                Ok(())
            }
            Err(IndexError::MissingRecord(_)) => {
                warn!("Closed {} with no record to update", path);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
