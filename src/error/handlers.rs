//! Error handlers
//!
//! Translates arbiter errors into the errno a filesystem caller observes and
//! into control-protocol reply codes.

use log::{error, warn};

use crate::error::types::{ArbiterError, ProtocolError};
use crate::protocol::responses;

pub const EPERM: i32 = 1;
pub const ENOENT: i32 = 2;
pub const EIO: i32 = 5;
pub const EBADF: i32 = 9;
pub const EACCES: i32 = 13;
pub const EEXIST: i32 = 17;
pub const ENOTDIR: i32 = 20;
pub const EISDIR: i32 = 21;
pub const EINVAL: i32 = 22;
pub const ENOTEMPTY: i32 = 39;

impl ArbiterError {
    /// The POSIX errno for this failure.
    pub fn errno(&self) -> i32 {
        match self {
            ArbiterError::PermissionDenied { .. } => EPERM,
            ArbiterError::PartialOwnershipConflict { .. } => EPERM,
            ArbiterError::NotFound(_) => ENOENT,
            ArbiterError::AlreadyExists(_) => EEXIST,
            ArbiterError::InvalidRename { .. } => EINVAL,
            ArbiterError::IndexUnavailable(_) => EIO,
            ArbiterError::DirectoryNotEmpty(_) => ENOTEMPTY,
            ArbiterError::NotADirectory(_) => ENOTDIR,
            ArbiterError::IsADirectory(_) => EISDIR,
            ArbiterError::InvalidPath(_) => EINVAL,
            ArbiterError::InvalidHandle(_) => EBADF,
            ArbiterError::Auth(_) => EACCES,
            ArbiterError::Io(e) => e.raw_os_error().unwrap_or(match e.kind() {
                std::io::ErrorKind::NotFound => ENOENT,
                std::io::ErrorKind::PermissionDenied => EACCES,
                std::io::ErrorKind::AlreadyExists => EEXIST,
                _ => EIO,
            }),
        }
    }

    /// The control-protocol reply code for this failure.
    pub fn reply_code(&self) -> u16 {
        match self {
            ArbiterError::PermissionDenied { .. } => responses::PERMISSION_DENIED,
            ArbiterError::PartialOwnershipConflict { .. } => responses::OWNERSHIP_CONFLICT,
            ArbiterError::NotFound(_) => responses::NOT_FOUND,
            ArbiterError::AlreadyExists(_) => responses::ALREADY_EXISTS,
            ArbiterError::InvalidRename { .. } => responses::INVALID_RENAME,
            ArbiterError::IndexUnavailable(_) => responses::INDEX_UNAVAILABLE,
            ArbiterError::Auth(_) => responses::NOT_AUTHENTICATED,
            ArbiterError::InvalidPath(_) | ArbiterError::InvalidHandle(_) => {
                responses::SYNTAX_ERROR
            }
            ArbiterError::DirectoryNotEmpty(_)
            | ArbiterError::NotADirectory(_)
            | ArbiterError::IsADirectory(_)
            | ArbiterError::Io(_) => responses::LOCAL_ERROR,
        }
    }
}

/// Logs an operation failure at a level matching its severity and renders
/// the reply line.
pub fn handle_error(err: &ArbiterError) -> String {
    match err {
        ArbiterError::Io(_) | ArbiterError::IndexUnavailable(_) => error!("Request failed: {}", err),
        _ => warn!("Request refused: {}", err),
    }
    responses::format_response(err.reply_code(), &err.to_string())
}

/// Renders the reply line for a malformed command.
pub fn handle_protocol_error(err: &ProtocolError) -> String {
    warn!("Malformed command: {}", err);
    responses::format_response(responses::SYNTAX_ERROR, &err.to_string())
}
