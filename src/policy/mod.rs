//! Policy evaluation
//!
//! A pure decision function over path facts, caller capabilities and the
//! ownership record of the target. It never performs I/O and never fails:
//! every question has an `Allow` or a `Deny` with a reason.

mod rules;

use std::fmt;

use crate::auth::CallerCapabilities;
use crate::classify::{Category, MediaType, PathFacts};
use crate::index::OwnershipRecord;

pub use rules::{directory_visible, evaluate};

/// The operation a verdict is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    CreateDirectory,
    RemoveDirectory,
    Read,
    Write,
    Delete,
    RenameSource,
    RenameDestination,
    /// Existence check on a single path (stat).
    Lookup,
    /// Per-entry filter of a directory listing.
    List,
}

impl Operation {
    /// Operations that only reveal that a name exists.
    pub fn is_visibility(self) -> bool {
        matches!(self, Operation::Lookup | Operation::List)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// Nothing may be created directly under the storage root.
    TopLevelEntry,
    TypeMismatch {
        category: Category,
        media_type: MediaType,
    },
    ForeignPrivateDirectory,
    NotOwner,
    /// The file has no ownership record and the caller does not own it.
    Untracked,
    /// A gallery-only caller tried to turn a file into a type it holds no
    /// grant for.
    GalleryTypeEscape,
    ProtectedDirectory,
    Hidden,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::TopLevelEntry => write!(f, "entries cannot be created at the storage root"),
            DenyReason::TypeMismatch {
                category,
                media_type,
            } => write!(f, "{} files are not allowed in {}", media_type, category),
            DenyReason::ForeignPrivateDirectory => {
                write!(f, "path belongs to another package's private directory")
            }
            DenyReason::NotOwner => write!(f, "file is owned by another package"),
            DenyReason::Untracked => write!(f, "file has no owner record"),
            DenyReason::GalleryTypeEscape => {
                write!(f, "destination type is not covered by the media grant")
            }
            DenyReason::ProtectedDirectory => write!(f, "directory is protected"),
            DenyReason::Hidden => write!(f, "file is not visible to the caller"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny(DenyReason),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    /// Converts the verdict into a `Result` so handlers can use `?`.
    pub fn into_result(self) -> Result<(), DenyReason> {
        match self {
            Verdict::Allow => Ok(()),
            Verdict::Deny(reason) => Err(reason),
        }
    }
}

/// Everything the evaluator looks at for one decision.
///
/// For `RenameDestination`, `record` is the record of the file being moved,
/// not of whatever currently occupies the destination.
#[derive(Debug, Clone, Copy)]
pub struct PolicyRequest<'a> {
    pub operation: Operation,
    pub facts: &'a PathFacts,
    pub caller: &'a CallerCapabilities,
    pub record: Option<&'a OwnershipRecord>,
}

impl<'a> PolicyRequest<'a> {
    pub fn new(
        operation: Operation,
        facts: &'a PathFacts,
        caller: &'a CallerCapabilities,
        record: Option<&'a OwnershipRecord>,
    ) -> Self {
        Self {
            operation,
            facts,
            caller,
            record,
        }
    }
}
