//! Error handling
//!
//! Defines error types and their mapping to errno values and reply codes.

pub mod handlers;
pub mod types;

pub use types::*;
