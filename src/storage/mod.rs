//! Operation handlers
//!
//! Create, delete, rename, readdir, stat and open/close, plus the path
//! validation and the per-path lock table they rely on.

pub mod handles;
pub mod locks;
pub mod operations;
pub mod rename;
pub mod results;
pub mod validation;

pub use locks::{PathClaim, PathLockGuard, PathLockTable};
pub use results::{DeleteResult, DirEntry, EntryKind, RenameResult, StatResult};
pub use validation::{normalize_virtual_path, virtual_to_real_path};
