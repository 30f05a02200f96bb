//! Rename handler
//!
//! Moves a file or a whole directory tree. The source must pass the
//! ownership rules and the destination the type conformity rules, evaluated
//! against the media type the destination name implies. Tree renames check
//! every contained file first and mutate nothing if any of them fails.

use std::fs;

use log::{error, info, warn};

use crate::arbiter::Arbiter;
use crate::auth::{CallerCapabilities, CallerIdentity};
use crate::classify::{classify, is_reserved_directory};
use crate::error::{ArbiterError, RenameViolation};
use crate::index::{OwnershipRecord, OwnershipUpdate};
use crate::policy::{Operation, PolicyRequest, evaluate};
use crate::storage::locks::PathClaim;
use crate::storage::operations::TreeCheck;
use crate::storage::results::RenameResult;
use crate::storage::validation::{is_strict_descendant, normalize_virtual_path, rebase};

impl Arbiter {
    pub fn rename(
        &self,
        caller: &CallerIdentity,
        from: &str,
        to: &str,
    ) -> Result<RenameResult, ArbiterError> {
        let from = normalize_virtual_path(from)?;
        let to = normalize_virtual_path(to)?;
        let caps = self.capabilities_of(caller);
        self.require_visible(&from, &caps)?;
        self.require_visible(&to, &caps)?;

        // 1. Structural checks that no grant overrides
        if is_reserved_directory(&from) || is_reserved_directory(&to) {
            return Err(ArbiterError::invalid_rename(
                &from,
                &to,
                RenameViolation::ProtectedDirectory,
            ));
        }
        if is_strict_descendant(&from, &to) {
            return Err(ArbiterError::invalid_rename(&from, &to, RenameViolation::Cycle));
        }

        let _guard = self.locks.acquire(vec![
            PathClaim::Subtree(from.clone()),
            PathClaim::Subtree(to.clone()),
        ]);

        let source_meta =
            fs::symlink_metadata(self.real_path(&from)).map_err(|e| ArbiterError::from_io(&from, e))?;
        let dest_meta = fs::symlink_metadata(self.real_path(&to)).ok();

        if from == to {
            return Ok(RenameResult {
                from,
                to,
                records_updated: 0,
                replaced: false,
            });
        }

        if source_meta.is_dir() {
            self.rename_tree(&caps, &from, &to, dest_meta.as_ref())
        } else {
            self.rename_file(&caps, &from, &to, dest_meta.as_ref())
        }
    }

    fn rename_file(
        &self,
        caps: &CallerCapabilities,
        from: &str,
        to: &str,
        dest_meta: Option<&fs::Metadata>,
    ) -> Result<RenameResult, ArbiterError> {
        if dest_meta.is_some_and(|m| m.is_dir()) {
            return Err(ArbiterError::invalid_rename(
                from,
                to,
                RenameViolation::FileOntoDirectory,
            ));
        }

        // 1. Source ownership, destination conformity
        let source_record = self.owner_of(from)?;
        let source_facts = classify(from);
        let dest_facts = classify(to);
        self.authorize(
            Operation::RenameSource,
            &source_facts,
            caps,
            source_record.as_ref(),
        )?;
        self.authorize(
            Operation::RenameDestination,
            &dest_facts,
            caps,
            source_record.as_ref(),
        )?;
        self.require_parent_dir(to)?;

        // 2. Overwriting requires the right to delete what is there
        let dest_record = match dest_meta {
            Some(_) => {
                let record = self.owner_of(to)?;
                self.authorize(Operation::Delete, &dest_facts, caps, record.as_ref())?;
                record
            }
            None => {
                if self.owner_of(to)?.is_some() {
                    warn!("Dropping stale ownership record for {}", to);
                    self.index().delete(to)?;
                }
                None
            }
        };

        // 3. Park the destination, move, then commit to the index
        let real_from = self.real_path(from);
        let real_to = self.real_path(to);
        let parked = match dest_meta {
            Some(_) => {
                let tombstone = self.real_path(&self.tombstone_for(to));
                fs::rename(&real_to, &tombstone).map_err(|e| ArbiterError::from_io(to, e))?;
                Some(tombstone)
            }
            None => None,
        };
        let unpark = || {
            if let Some(tombstone) = &parked {
                if let Err(e) = fs::rename(tombstone, &real_to) {
                    error!("Failed to restore {}: {}", to, e);
                }
            }
        };

        if let Err(e) = fs::rename(&real_from, &real_to) {
            unpark();
            return Err(ArbiterError::from_io(from, e));
        }
        let move_back = || {
            if let Err(e) = fs::rename(&real_to, &real_from) {
                error!("Failed to move {} back to {}: {}", to, from, e);
            }
            unpark();
        };

        if let Some(record) = &dest_record {
            if let Err(e) = self.index().delete(&record.path) {
                error!("Index rejected delete of {}: {}", record.path, e);
                move_back();
                return Err(e.into());
            }
        }

        let mut records_updated = 0;
        if source_record.is_some() {
            let size = fs::metadata(&real_to).map(|m| m.len()).ok();
            let update = OwnershipUpdate::moved_to(to, dest_facts.media_type).with_size(size);
            if let Err(e) = self.index().update(from, &update) {
                error!("Index rejected move of {}: {}", from, e);
                self.restore_records(dest_record.as_slice());
                move_back();
                return Err(e.into());
            }
            records_updated = 1;
        }

        if let Some(tombstone) = &parked {
            if let Err(e) = fs::remove_file(tombstone) {
                warn!("Failed to remove tombstone {}: {}", tombstone.display(), e);
            }
        }

        info!(
            "{} renamed {} to {} ({} -> {})",
            caps.package_name, from, to, source_facts.media_type, dest_facts.media_type
        );
        Ok(RenameResult {
            from: from.to_string(),
            to: to.to_string(),
            records_updated,
            replaced: dest_meta.is_some(),
        })
    }

    fn rename_tree(
        &self,
        caps: &CallerCapabilities,
        from: &str,
        to: &str,
        dest_meta: Option<&fs::Metadata>,
    ) -> Result<RenameResult, ArbiterError> {
        // 1. Structural checks on the destination
        match dest_meta {
            Some(meta) if !meta.is_dir() => {
                return Err(ArbiterError::invalid_rename(
                    from,
                    to,
                    RenameViolation::DirectoryOntoFile,
                ));
            }
            Some(_) => {
                let mut entries =
                    fs::read_dir(self.real_path(to)).map_err(|e| ArbiterError::from_io(to, e))?;
                if entries.next().is_some() {
                    return Err(ArbiterError::invalid_rename(
                        from,
                        to,
                        RenameViolation::DestinationNotEmpty,
                    ));
                }
            }
            None => {}
        }

        // 2. The directories themselves
        self.authorize(Operation::RemoveDirectory, &classify(from), caps, None)?;
        self.authorize(Operation::CreateDirectory, &classify(to), caps, None)?;
        self.require_parent_dir(to)?;

        // 3. Every file must leave its old place and fit its new one
        let files = self.check_tree(from, caps, |file| {
            let record = self.owner_of(file)?;
            let source = classify(file);
            let dest = classify(&rebase(file, from, to));
            for (operation, facts) in [
                (Operation::RenameSource, &source),
                (Operation::RenameDestination, &dest),
            ] {
                let verdict = evaluate(&PolicyRequest::new(operation, facts, caps, record.as_ref()));
                if let Err(reason) = verdict.into_result() {
                    return Ok(TreeCheck::Fail(reason));
                }
            }
            Ok(TreeCheck::Pass(record))
        })?;

        // 4. Move the tree, then rewrite its records
        let real_from = self.real_path(from);
        let real_to = self.real_path(to);
        fs::rename(&real_from, &real_to).map_err(|e| ArbiterError::from_io(from, e))?;

        let records: Vec<&OwnershipRecord> = files.iter().filter_map(|(_, r)| r.as_ref()).collect();
        for (done, record) in records.iter().enumerate() {
            let new_path = rebase(&record.path, from, to);
            let size = fs::metadata(self.real_path(&new_path)).map(|m| m.len()).ok();
            let update = OwnershipUpdate::moved_to(&new_path, classify(&new_path).media_type)
                .with_size(size);
            if let Err(e) = self.index().update(&record.path, &update) {
                error!("Index rejected move of {}: {}; rolling back", record.path, e);
                self.revert_moves(&records[..done], from, to);
                if let Err(restore) = fs::rename(&real_to, &real_from) {
                    error!("Failed to move {} back to {}: {}", to, from, restore);
                }
                return Err(e.into());
            }
        }

        info!(
            "{} renamed tree {} to {} ({} files, {} records)",
            caps.package_name,
            from,
            to,
            files.len(),
            records.len()
        );
        Ok(RenameResult {
            from: from.to_string(),
            to: to.to_string(),
            records_updated: records.len(),
            replaced: false,
        })
    }

    fn revert_moves(&self, records: &[&OwnershipRecord], from: &str, to: &str) {
        for record in records {
            let moved = rebase(&record.path, from, to);
            let update = OwnershipUpdate::moved_to(&record.path, record.media_type);
            if let Err(e) = self.index().update(&moved, &update) {
                error!("Failed to restore record for {}: {}", record.path, e);
            }
        }
    }
}
