//! Control protocol
//!
//! Handles command parsing, dispatch and reply formatting.

pub mod commands;
pub mod handlers;
pub mod responses;

pub use commands::{Command, CommandResult, CommandStatus, parse_command};
pub use handlers::{close_all, handle_auth_command, handle_command};
