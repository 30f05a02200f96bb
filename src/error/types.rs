//! Error types
//!
//! Defines the error taxonomy for each layer of the arbiter: the content
//! index, caller authentication, the operation handlers and the control
//! protocol.

use std::io;

use thiserror::Error;

use crate::policy::DenyReason;

/// Failures reported by a content index implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// The index could not be reached; the request may be retried.
    #[error("content index unavailable: {0}")]
    Unavailable(String),

    #[error("no ownership record for {0}")]
    MissingRecord(String),

    #[error("ownership record already exists for {0}")]
    DuplicateRecord(String),
}

/// Caller authentication errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("malformed caller token: {0}")]
    MalformedToken(String),

    #[error("no package registered for uid {0}")]
    UnknownCaller(u32),

    #[error("caller not authenticated")]
    NotAuthenticated,
}

/// Structural reasons a rename is refused regardless of the caller's grants.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RenameViolation {
    #[error("destination is inside the source directory")]
    Cycle,

    #[error("cannot replace a directory with a file")]
    FileOntoDirectory,

    #[error("cannot replace a file with a directory")]
    DirectoryOntoFile,

    #[error("destination directory is not empty")]
    DestinationNotEmpty,

    #[error("default directories cannot be moved or replaced")]
    ProtectedDirectory,
}

/// Errors surfaced by the operation handlers to the immediate caller.
#[derive(Debug, Error)]
pub enum ArbiterError {
    /// A policy rule failed; surfaced as EPERM and never retried.
    #[error("operation not permitted on {path}: {reason}")]
    PermissionDenied { path: String, reason: DenyReason },

    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("file exists: {0}")]
    AlreadyExists(String),

    #[error("cannot rename {from} to {to}: {violation}")]
    InvalidRename {
        from: String,
        to: String,
        violation: RenameViolation,
    },

    /// The content index could not be reached; storage was left untouched.
    #[error("content index unavailable: {0}")]
    IndexUnavailable(String),

    /// A directory-tree operation was aborted before any mutation because
    /// `offending` failed its check.
    #[error("ownership conflict under {root}: {offending} ({reason})")]
    PartialOwnershipConflict {
        root: String,
        offending: String,
        reason: DenyReason,
    },

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid handle: {0}")]
    InvalidHandle(u64),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ArbiterError {
    /// Builds the error for a policy denial.
    ///
    /// Denials caused by another package's private directory are reported as
    /// a missing path so that installed package names do not leak.
    pub fn denied(path: &str, reason: DenyReason) -> Self {
        match reason {
            DenyReason::ForeignPrivateDirectory => ArbiterError::NotFound(path.to_string()),
            reason => ArbiterError::PermissionDenied {
                path: path.to_string(),
                reason,
            },
        }
    }

    /// Maps a storage error for `path`, keeping the typed variants for the
    /// kinds callers branch on.
    pub fn from_io(path: &str, error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => ArbiterError::NotFound(path.to_string()),
            io::ErrorKind::AlreadyExists => ArbiterError::AlreadyExists(path.to_string()),
            _ => ArbiterError::Io(error),
        }
    }

    pub fn invalid_rename(from: &str, to: &str, violation: RenameViolation) -> Self {
        ArbiterError::InvalidRename {
            from: from.to_string(),
            to: to.to_string(),
            violation,
        }
    }
}

impl From<IndexError> for ArbiterError {
    fn from(error: IndexError) -> Self {
        match error {
            IndexError::Unavailable(msg) => ArbiterError::IndexUnavailable(msg),
            IndexError::MissingRecord(path) => ArbiterError::NotFound(path),
            IndexError::DuplicateRecord(path) => ArbiterError::AlreadyExists(path),
        }
    }
}

/// Malformed control-protocol input
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("invalid number: {0}")]
    InvalidNumber(String),

    #[error("invalid open mode: {0}")]
    InvalidMode(String),

    #[error("invalid hex payload")]
    InvalidPayload,

    #[error("command too long ({0} bytes)")]
    CommandTooLong(usize),
}
