//! The arbiter service
//!
//! Wires the classifier, capability resolver, policy evaluator, per-path
//! locks and the I/O coordinator around one storage root and one injected
//! content index. The operation handlers themselves live in `storage`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{info, warn};
use walkdir::WalkDir;

use crate::auth::{CallerCapabilities, CallerIdentity, GrantRegistry, capabilities_of};
use crate::classify::{DEFAULT_DIRECTORIES, PRIVATE_FILES_ROOT, PRIVATE_MEDIA_ROOT, RESERVED_ROOT};
use crate::coordinator::{BindingCounts, Coordinator, DEFAULT_PAGE_SIZE};
use crate::error::ArbiterError;
use crate::index::{ContentIndex, OwnershipRecord};
use crate::storage::locks::PathLockTable;
use crate::storage::validation::{
    TOMBSTONE_PREFIX, file_name_of, is_tombstone_name, join_virtual, parent_of,
    virtual_to_real_path,
};

pub struct Arbiter {
    storage_root: PathBuf,
    index: Arc<dyn ContentIndex>,
    grants: Arc<GrantRegistry>,
    pub(crate) locks: PathLockTable,
    coordinator: Coordinator,
    tombstones: AtomicU64,
}

impl Arbiter {
    pub fn new(
        storage_root: impl Into<PathBuf>,
        index: Arc<dyn ContentIndex>,
        grants: Arc<GrantRegistry>,
    ) -> Self {
        Self::with_page_size(storage_root, index, grants, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(
        storage_root: impl Into<PathBuf>,
        index: Arc<dyn ContentIndex>,
        grants: Arc<GrantRegistry>,
        page_size: usize,
    ) -> Self {
        Self {
            storage_root: storage_root.into(),
            index,
            grants,
            locks: PathLockTable::new(),
            coordinator: Coordinator::new(page_size),
            tombstones: AtomicU64::new(0),
        }
    }

    /// Creates the storage root, the default media directories and the
    /// reserved private roots, and sweeps tombstones left by an interrupted
    /// deletion.
    pub fn prepare_layout(&self) -> io::Result<()> {
        fs::create_dir_all(&self.storage_root)?;
        for name in DEFAULT_DIRECTORIES {
            fs::create_dir_all(self.storage_root.join(name))?;
        }
        for private_root in [PRIVATE_FILES_ROOT, PRIVATE_MEDIA_ROOT] {
            fs::create_dir_all(self.storage_root.join(RESERVED_ROOT).join(private_root))?;
        }

        let mut leftovers = Vec::new();
        let mut walker = WalkDir::new(&self.storage_root).min_depth(1).into_iter();
        while let Some(entry) = walker.next() {
            let Ok(entry) = entry else { continue };
            if is_tombstone_name(&entry.file_name().to_string_lossy()) {
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                leftovers.push(entry.into_path());
            }
        }
        for tombstone in leftovers {
            let removed = if tombstone.is_dir() {
                fs::remove_dir_all(&tombstone)
            } else {
                fs::remove_file(&tombstone)
            };
            match removed {
                Ok(()) => info!("Swept stale tombstone {}", tombstone.display()),
                Err(e) => warn!("Failed to sweep {}: {}", tombstone.display(), e),
            }
        }

        info!("Storage root ready at {}", self.storage_root.display());
        Ok(())
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    pub fn index(&self) -> &Arc<dyn ContentIndex> {
        &self.index
    }

    pub fn grants(&self) -> &Arc<GrantRegistry> {
        &self.grants
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Effective capabilities of `caller`, recomputed on every call so grant
    /// changes apply to the next request.
    pub fn capabilities_of(&self, caller: &CallerIdentity) -> CallerCapabilities {
        capabilities_of(caller, &self.grants)
    }

    pub fn owner_of(&self, path: &str) -> Result<Option<OwnershipRecord>, ArbiterError> {
        Ok(self.index.lookup(path)?)
    }

    /// Binding references currently held on the file at `path`.
    pub fn binding_counts(&self, path: &str) -> Result<BindingCounts, ArbiterError> {
        self.coordinator
            .binding_counts(&self.real_path(path))
            .map_err(|e| ArbiterError::from_io(path, e))
    }

    pub(crate) fn real_path(&self, virtual_path: &str) -> PathBuf {
        virtual_to_real_path(&self.storage_root, virtual_path)
    }

    /// A fresh hidden name beside `path` to park it under while a deletion
    /// or overwrite is committed to the index.
    pub(crate) fn tombstone_for(&self, path: &str) -> String {
        let n = self.tombstones.fetch_add(1, Ordering::SeqCst);
        let name = format!(
            "{}{}-{}-{}",
            TOMBSTONE_PREFIX,
            std::process::id(),
            n,
            hex::encode(file_name_of(path).as_bytes())
                .chars()
                .take(16)
                .collect::<String>()
        );
        join_virtual(parent_of(path), &name)
    }
}
