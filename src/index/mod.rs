//! Content index interface
//!
//! The content index is an external collaborator tracking, for every file it
//! knows about, the owning package and the media type. The arbiter reaches it
//! only through the narrow [`ContentIndex`] trait so that any backing store,
//! or the in-memory fake used in tests, can be injected.

pub mod memory;

use serde::{Deserialize, Serialize};

use crate::classify::MediaType;
use crate::error::IndexError;

pub use memory::InMemoryIndex;

/// Row identity reported for paths without a record.
pub const NO_ROW_ID: i64 = -1;

/// Ownership facts persisted per existing file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub path: String,
    pub owner_package: String,
    pub media_type: MediaType,
    pub size: u64,
    pub row_id: i64,
}

/// Fields to change on an existing record; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnershipUpdate {
    pub new_path: Option<String>,
    pub new_media_type: Option<MediaType>,
    pub new_size: Option<u64>,
}

impl OwnershipUpdate {
    pub fn moved_to(path: &str, media_type: MediaType) -> Self {
        Self {
            new_path: Some(path.to_string()),
            new_media_type: Some(media_type),
            new_size: None,
        }
    }

    pub fn with_size(mut self, size: Option<u64>) -> Self {
        self.new_size = size;
        self
    }

    pub fn resized(size: u64) -> Self {
        Self {
            new_size: Some(size),
            ..Self::default()
        }
    }
}

/// Row id of an optional record, `NO_ROW_ID` when absent.
pub fn row_id_of(record: Option<&OwnershipRecord>) -> i64 {
    record.map_or(NO_ROW_ID, |r| r.row_id)
}

/// Lookup and update interface consumed from the content index.
///
/// Every method may fail with [`IndexError::Unavailable`]; callers treat that
/// as transient and abort the request.
pub trait ContentIndex: Send + Sync {
    fn lookup(&self, path: &str) -> Result<Option<OwnershipRecord>, IndexError>;

    fn insert(
        &self,
        path: &str,
        owner_package: &str,
        media_type: MediaType,
        size: u64,
    ) -> Result<OwnershipRecord, IndexError>;

    fn update(&self, path: &str, update: &OwnershipUpdate) -> Result<(), IndexError>;

    /// Removes the record for `path`; removing an absent record succeeds.
    fn delete(&self, path: &str) -> Result<(), IndexError>;
}
