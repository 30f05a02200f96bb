//! Server core functionality
//!
//! The control listener: accepts connections, authenticates callers and
//! hands each session to its own task.

pub mod core;

pub use core::Server;
