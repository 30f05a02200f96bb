//! Caller identity and capabilities
//!
//! Handles caller authentication, the grant registry and the per-request
//! capability computation.

pub mod capabilities;
pub mod registry;
pub mod validator;

pub use capabilities::{CallerCapabilities, CallerIdentity, FIRST_APPLICATION_UID, capabilities_of};
pub use registry::{AppOp, GrantRegistry, PackageGrants, Permission};
pub use validator::validate_caller;
