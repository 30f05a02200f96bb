//! In-memory content index
//!
//! A thread-safe [`ContentIndex`] kept in a map. The daemon uses it as its
//! index when no external one is wired in, and tests use its fault injection
//! to exercise the arbiter's rollback paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use log::debug;

use crate::classify::MediaType;
use crate::error::IndexError;
use crate::index::{ContentIndex, OwnershipRecord, OwnershipUpdate};

#[derive(Debug)]
pub struct InMemoryIndex {
    records: RwLock<HashMap<String, OwnershipRecord>>,
    next_row_id: AtomicI64,
    available: AtomicBool,
    mutation_budget: Mutex<Option<MutationFault>>,
}

/// A scheduled mutation failure.
#[derive(Debug, Clone, Copy)]
struct MutationFault {
    /// Mutations still allowed before the failure.
    remaining: usize,
    /// Recover after failing once instead of failing every later mutation.
    once: bool,
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            next_row_id: AtomicI64::new(1),
            available: AtomicBool::new(true),
            mutation_budget: Mutex::new(None),
        }
    }
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail (or succeed again) with `Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Lets `mutations` more inserts/updates/deletes succeed, then fails all
    /// further mutations until [`InMemoryIndex::clear_faults`] is called.
    pub fn fail_after_mutations(&self, mutations: usize) {
        *self.budget() = Some(MutationFault {
            remaining: mutations,
            once: false,
        });
    }

    /// Lets `mutations` more mutations succeed, fails the next one, then
    /// behaves normally again. Rollback paths can run after the failure.
    pub fn fail_once_after_mutations(&self, mutations: usize) {
        *self.budget() = Some(MutationFault {
            remaining: mutations,
            once: true,
        });
    }

    pub fn clear_faults(&self) {
        self.set_available(true);
        *self.budget() = None;
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Records whose path lies at or below `prefix`, sorted by path.
    pub fn records_under(&self, prefix: &str) -> Vec<OwnershipRecord> {
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        let mut records: Vec<OwnershipRecord> = self
            .read()
            .values()
            .filter(|r| r.path == prefix || r.path.starts_with(&dir))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records
    }

    fn check_available(&self) -> Result<(), IndexError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(IndexError::Unavailable("index offline".into()))
        }
    }

    fn check_mutation(&self) -> Result<(), IndexError> {
        self.check_available()?;
        let mut budget = self.budget();
        let Some(fault) = budget.as_mut() else {
            return Ok(());
        };
        if fault.remaining > 0 {
            fault.remaining -= 1;
            return Ok(());
        }
        if fault.once {
            *budget = None;
        }
        Err(IndexError::Unavailable("index stopped accepting writes".into()))
    }

    fn budget(&self) -> std::sync::MutexGuard<'_, Option<MutationFault>> {
        self.mutation_budget
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, OwnershipRecord>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, OwnershipRecord>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ContentIndex for InMemoryIndex {
    fn lookup(&self, path: &str) -> Result<Option<OwnershipRecord>, IndexError> {
        self.check_available()?;
        Ok(self.read().get(path).cloned())
    }

    fn insert(
        &self,
        path: &str,
        owner_package: &str,
        media_type: MediaType,
        size: u64,
    ) -> Result<OwnershipRecord, IndexError> {
        self.check_mutation()?;
        let mut records = self.write();
        if records.contains_key(path) {
            return Err(IndexError::DuplicateRecord(path.to_string()));
        }

        let record = OwnershipRecord {
            path: path.to_string(),
            owner_package: owner_package.to_string(),
            media_type,
            size,
            row_id: self.next_row_id.fetch_add(1, Ordering::SeqCst),
        };
        records.insert(path.to_string(), record.clone());
        debug!("Index insert {} (row {})", path, record.row_id);
        Ok(record)
    }

    fn update(&self, path: &str, update: &OwnershipUpdate) -> Result<(), IndexError> {
        self.check_mutation()?;
        let mut records = self.write();

        if let Some(new_path) = &update.new_path {
            if new_path != path && records.contains_key(new_path) {
                return Err(IndexError::DuplicateRecord(new_path.clone()));
            }
        }

        let mut record = records
            .remove(path)
            .ok_or_else(|| IndexError::MissingRecord(path.to_string()))?;
        if let Some(new_path) = &update.new_path {
            record.path = new_path.clone();
        }
        if let Some(media_type) = update.new_media_type {
            record.media_type = media_type;
        }
        if let Some(size) = update.new_size {
            record.size = size;
        }
        debug!("Index update {} -> {}", path, record.path);
        records.insert(record.path.clone(), record);
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<(), IndexError> {
        self.check_mutation()?;
        if self.write().remove(path).is_some() {
            debug!("Index delete {}", path);
        }
        Ok(())
    }
}
