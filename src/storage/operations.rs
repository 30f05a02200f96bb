//! Storage operations
//!
//! Create, mkdir, delete, readdir and stat handlers. Each one classifies the
//! path, computes the caller's capabilities, asks the policy evaluator for a
//! verdict and only then touches the disk and the content index.

use std::fs;
use std::io;

use log::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::arbiter::Arbiter;
use crate::auth::{CallerCapabilities, CallerIdentity};
use crate::classify::{PathFacts, classify, is_reserved_directory, mime_type_of};
use crate::error::ArbiterError;
use crate::index::{NO_ROW_ID, OwnershipRecord, row_id_of};
use crate::policy::{DenyReason, Operation, PolicyRequest, directory_visible, evaluate};
use crate::storage::results::{DeleteResult, DirEntry, EntryKind, StatResult};
use crate::storage::validation::{
    is_tombstone_name, join_virtual, normalize_virtual_path, parent_of, real_to_virtual_path,
};

/// Outcome of checking one file of a tree operation.
pub(crate) enum TreeCheck {
    Pass(Option<OwnershipRecord>),
    Fail(DenyReason),
}

impl Arbiter {
    /// Runs the policy evaluator and turns a denial into the caller-facing
    /// error for `path`.
    pub(crate) fn authorize(
        &self,
        operation: Operation,
        facts: &PathFacts,
        caps: &CallerCapabilities,
        record: Option<&OwnershipRecord>,
    ) -> Result<(), ArbiterError> {
        evaluate(&PolicyRequest::new(operation, facts, caps, record))
            .into_result()
            .map_err(|reason| ArbiterError::denied(&facts.path, reason))
    }

    /// Reports anything under another package's private directory as
    /// missing before the disk is consulted.
    pub(crate) fn require_visible(
        &self,
        path: &str,
        caps: &CallerCapabilities,
    ) -> Result<(), ArbiterError> {
        if directory_visible(&classify(path), caps) {
            Ok(())
        } else {
            Err(ArbiterError::NotFound(path.to_string()))
        }
    }

    /// Fails with `NotFound`/`NotADirectory` unless the parent of `path`
    /// is an existing directory.
    pub(crate) fn require_parent_dir(&self, path: &str) -> Result<(), ArbiterError> {
        let parent = parent_of(path);
        match fs::metadata(self.real_path(parent)) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(ArbiterError::NotADirectory(parent.to_string())),
            Err(e) => Err(ArbiterError::from_io(parent, e)),
        }
    }

    /// Creates an empty file owned by the caller.
    pub fn create(&self, caller: &CallerIdentity, path: &str) -> Result<OwnershipRecord, ArbiterError> {
        let path = normalize_virtual_path(path)?;
        let caps = self.capabilities_of(caller);
        let _guard = self.locks.exact(&path);
        self.create_locked(&caps, &path)
    }

    /// Create with the path lock already held.
    pub(crate) fn create_locked(
        &self,
        caps: &CallerCapabilities,
        path: &str,
    ) -> Result<OwnershipRecord, ArbiterError> {
        // 1. Verdict
        let facts = classify(path);
        self.authorize(Operation::Create, &facts, caps, None)?;

        // 2. Parent must exist, target must not
        self.require_parent_dir(path)?;
        let real_path = self.real_path(path);
        if fs::symlink_metadata(&real_path).is_ok() {
            return Err(ArbiterError::AlreadyExists(path.to_string()));
        }

        // 3. A record without a file is stale
        if self.owner_of(path)?.is_some() {
            warn!("Dropping stale ownership record for {}", path);
            self.index().delete(path)?;
        }

        // 4. Index first, storage second
        let record = self
            .index()
            .insert(path, &caps.package_name, facts.media_type, 0)?;

        if let Err(e) = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&real_path)
        {
            error!("Failed to create {}: {}", path, e);
            if let Err(rollback) = self.index().delete(path) {
                error!("Failed to drop record for {}: {}", path, rollback);
            }
            return Err(ArbiterError::from_io(path, e));
        }

        info!(
            "{} created {} ({}, row {})",
            caps.package_name, path, facts.media_type, record.row_id
        );
        Ok(record)
    }

    /// Creates a directory. Directories carry no ownership record.
    pub fn mkdir(&self, caller: &CallerIdentity, path: &str) -> Result<(), ArbiterError> {
        let path = normalize_virtual_path(path)?;
        let caps = self.capabilities_of(caller);
        let _guard = self.locks.exact(&path);

        let facts = classify(&path);
        self.authorize(Operation::CreateDirectory, &facts, &caps, None)?;
        self.require_parent_dir(&path)?;

        fs::create_dir(self.real_path(&path)).map_err(|e| ArbiterError::from_io(&path, e))?;
        info!("{} created directory {}", caps.package_name, path);
        Ok(())
    }

    /// Deletes a file, an empty directory, or with `recursive` a whole tree.
    ///
    /// A recursive delete checks every contained file before touching
    /// anything; one file the caller may not delete fails the whole call.
    pub fn delete(
        &self,
        caller: &CallerIdentity,
        path: &str,
        recursive: bool,
    ) -> Result<DeleteResult, ArbiterError> {
        let path = normalize_virtual_path(path)?;
        let caps = self.capabilities_of(caller);
        self.require_visible(&path, &caps)?;
        let _guard = self.locks.subtree(&path);

        let real_path = self.real_path(&path);
        let meta = fs::symlink_metadata(&real_path).map_err(|e| ArbiterError::from_io(&path, e))?;
        let facts = classify(&path);

        if !meta.is_dir() {
            // 1. Plain file
            let record = self.owner_of(&path)?;
            self.authorize(Operation::Delete, &facts, &caps, record.as_ref())?;
            let records: Vec<OwnershipRecord> = record.into_iter().collect();
            self.remove_tracked(&path, false, &records)?;
            info!("{} deleted {}", caps.package_name, path);
            return Ok(DeleteResult {
                path,
                files_removed: 1,
                records_removed: records.len(),
            });
        }

        // 2. Directory
        if is_reserved_directory(&path) {
            return Err(ArbiterError::denied(&path, DenyReason::ProtectedDirectory));
        }
        self.authorize(Operation::RemoveDirectory, &facts, &caps, None)?;

        if !recursive {
            let mut entries = fs::read_dir(&real_path).map_err(|e| ArbiterError::from_io(&path, e))?;
            if entries.next().is_some() {
                return Err(ArbiterError::DirectoryNotEmpty(path));
            }
            fs::remove_dir(&real_path).map_err(|e| ArbiterError::from_io(&path, e))?;
            info!("{} removed directory {}", caps.package_name, path);
            return Ok(DeleteResult {
                path,
                files_removed: 0,
                records_removed: 0,
            });
        }

        // 3. Pre-check every file, then remove the tree in one step
        let files = self.check_tree(&path, &caps, |file| {
            let record = self.owner_of(file)?;
            let facts = classify(file);
            let verdict = evaluate(&PolicyRequest::new(
                Operation::Delete,
                &facts,
                &caps,
                record.as_ref(),
            ));
            Ok(match verdict.into_result() {
                Ok(()) => TreeCheck::Pass(record),
                Err(reason) => TreeCheck::Fail(reason),
            })
        })?;

        let records: Vec<OwnershipRecord> = files.iter().filter_map(|(_, r)| r.clone()).collect();
        self.remove_tracked(&path, true, &records)?;
        info!(
            "{} deleted tree {} ({} files, {} records)",
            caps.package_name,
            path,
            files.len(),
            records.len()
        );
        Ok(DeleteResult {
            path,
            files_removed: files.len(),
            records_removed: records.len(),
        })
    }

    /// Walks every file under `root` and runs `check` on it. The first file
    /// that fails aborts the walk with `PartialOwnershipConflict`.
    pub(crate) fn check_tree<F>(
        &self,
        root: &str,
        caps: &CallerCapabilities,
        mut check: F,
    ) -> Result<Vec<(String, Option<OwnershipRecord>)>, ArbiterError>
    where
        F: FnMut(&str) -> Result<TreeCheck, ArbiterError>,
    {
        let mut files = Vec::new();
        for entry in WalkDir::new(self.real_path(root)).sort_by_file_name() {
            let entry = entry.map_err(|e| ArbiterError::from_io(root, io::Error::from(e)))?;
            if entry.file_type().is_dir() {
                continue;
            }
            let Some(file) = real_to_virtual_path(self.storage_root(), entry.path()) else {
                continue;
            };

            match check(&file)? {
                TreeCheck::Pass(record) => files.push((file, record)),
                TreeCheck::Fail(reason) => {
                    warn!(
                        "{} blocked on {} under {}: {}",
                        caps.package_name, file, root, reason
                    );
                    return Err(ArbiterError::PartialOwnershipConflict {
                        root: root.to_string(),
                        offending: file,
                        reason,
                    });
                }
            }
        }
        Ok(files)
    }

    /// Removes `path` and drops `records` as one step: the entry is parked
    /// under a tombstone, the records are dropped, then the tombstone is
    /// removed. An index failure puts the entry and the records back.
    fn remove_tracked(
        &self,
        path: &str,
        is_dir: bool,
        records: &[OwnershipRecord],
    ) -> Result<(), ArbiterError> {
        let real_path = self.real_path(path);
        let tombstone = self.real_path(&self.tombstone_for(path));
        fs::rename(&real_path, &tombstone).map_err(|e| ArbiterError::from_io(path, e))?;

        for (done, record) in records.iter().enumerate() {
            if let Err(e) = self.index().delete(&record.path) {
                error!("Index rejected delete of {}: {}; restoring", record.path, e);
                self.restore_records(&records[..done]);
                if let Err(restore) = fs::rename(&tombstone, &real_path) {
                    error!("Failed to restore {}: {}", path, restore);
                }
                return Err(e.into());
            }
        }

        let removed = if is_dir {
            fs::remove_dir_all(&tombstone)
        } else {
            fs::remove_file(&tombstone)
        };
        if let Err(e) = removed {
            // Invisible already; swept on the next start
            warn!("Failed to remove tombstone {}: {}", tombstone.display(), e);
        }
        Ok(())
    }

    pub(crate) fn restore_records(&self, records: &[OwnershipRecord]) {
        for record in records {
            if let Err(e) = self.index().insert(
                &record.path,
                &record.owner_package,
                record.media_type,
                record.size,
            ) {
                error!("Failed to restore record for {}: {}", record.path, e);
            }
        }
    }

    /// Lists the entries of `path` the caller may see, sorted by name.
    pub fn readdir(&self, caller: &CallerIdentity, path: &str) -> Result<Vec<DirEntry>, ArbiterError> {
        let path = normalize_virtual_path(path)?;
        let caps = self.capabilities_of(caller);
        self.require_visible(&path, &caps)?;

        let real_path = self.real_path(&path);
        let meta = fs::metadata(&real_path).map_err(|e| ArbiterError::from_io(&path, e))?;
        if !meta.is_dir() {
            return Err(ArbiterError::NotADirectory(path));
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&real_path).map_err(|e| ArbiterError::from_io(&path, e))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_tombstone_name(&name) {
                continue;
            }
            let child = join_virtual(&path, &name);
            let facts = classify(&child);
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                // Removed while listing
                Err(_) => continue,
            };

            if meta.is_dir() {
                if directory_visible(&facts, &caps) {
                    entries.push(DirEntry {
                        name,
                        kind: EntryKind::Directory,
                        size: 0,
                        media_type: None,
                    });
                }
                continue;
            }

            let record = self.owner_of(&child)?;
            let verdict = evaluate(&PolicyRequest::new(
                Operation::List,
                &facts,
                &caps,
                record.as_ref(),
            ));
            if verdict.is_allowed() {
                entries.push(DirEntry {
                    name,
                    kind: EntryKind::File,
                    size: meta.len(),
                    media_type: Some(facts.media_type),
                });
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(
            "Listed {} for {}: {} visible entries",
            path,
            caps.package_name,
            entries.len()
        );
        Ok(entries)
    }

    /// Existence and metadata of a single path. Anything the caller may not
    /// see is reported as missing.
    pub fn stat(&self, caller: &CallerIdentity, path: &str) -> Result<StatResult, ArbiterError> {
        let path = normalize_virtual_path(path)?;
        let caps = self.capabilities_of(caller);
        let facts = classify(&path);

        let meta = fs::metadata(self.real_path(&path)).map_err(|e| ArbiterError::from_io(&path, e))?;
        if meta.is_dir() {
            if !directory_visible(&facts, &caps) {
                return Err(ArbiterError::NotFound(path));
            }
            return Ok(StatResult {
                path,
                kind: EntryKind::Directory,
                size: 0,
                media_type: None,
                mime_type: None,
                row_id: NO_ROW_ID,
                owner: None,
            });
        }

        let record = self.owner_of(&path)?;
        if self
            .authorize(Operation::Lookup, &facts, &caps, record.as_ref())
            .is_err()
        {
            return Err(ArbiterError::NotFound(path));
        }

        let row_id = row_id_of(record.as_ref());
        let owner = match self.authorize(Operation::Read, &facts, &caps, record.as_ref()) {
            Ok(()) => record.map(|r| r.owner_package),
            Err(_) => None,
        };
        Ok(StatResult {
            mime_type: Some(mime_type_of(&path)),
            path,
            kind: EntryKind::File,
            size: meta.len(),
            media_type: Some(facts.media_type),
            row_id,
            owner,
        })
    }
}
