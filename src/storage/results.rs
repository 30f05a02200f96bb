//! Storage result types
//!
//! Defines result structures returned by the operation handlers.

use crate::classify::MediaType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One visible entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub media_type: Option<MediaType>,
}

impl DirEntry {
    /// Listing form: directories carry a trailing `/`.
    pub fn display_name(&self) -> String {
        match self.kind {
            EntryKind::Directory => format!("{}/", self.name),
            EntryKind::File => self.name.clone(),
        }
    }
}

/// Result of a stat operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatResult {
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub media_type: Option<MediaType>,
    pub mime_type: Option<&'static str>,
    /// Content index row of the file, `NO_ROW_ID` when untracked.
    pub row_id: i64,
    /// Only reported when the caller may access the file's content.
    pub owner: Option<String>,
}

/// Result of a file or directory deletion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteResult {
    pub path: String,
    pub files_removed: usize,
    pub records_removed: usize,
}

/// Result of a rename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameResult {
    pub from: String,
    pub to: String,
    pub records_updated: usize,
    /// True when an existing destination file was replaced.
    pub replaced: bool,
}
