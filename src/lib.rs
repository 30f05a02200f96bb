//! Scoped storage arbiter
//!
//! Mediates every access to a shared storage tree on behalf of identified
//! caller packages: classifies the path, resolves the caller's capabilities,
//! evaluates the access policy and keeps the content index consistent with
//! the filesystem.

pub mod arbiter;
pub mod auth;
pub mod classify;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod index;
pub mod policy;
pub mod protocol;
pub mod server;
pub mod storage;

pub use arbiter::Arbiter;
pub use auth::{AppOp, CallerIdentity, GrantRegistry, PackageGrants, Permission};
pub use config::ServerConfig;
pub use coordinator::{BindingKind, OpenMode};
pub use error::ArbiterError;
pub use index::{ContentIndex, InMemoryIndex, OwnershipRecord};
pub use server::Server;
