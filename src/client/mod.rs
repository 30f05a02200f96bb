//! Client session management
//!
//! Per-connection session state, the session loop and the registry of
//! live sessions.

pub mod handler;
pub mod registry;
pub mod state;

pub use handler::handle_client;
pub use registry::SessionRegistry;
pub use state::Session;
