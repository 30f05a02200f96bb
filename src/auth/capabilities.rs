//! Caller capabilities
//!
//! Derives the effective capability set of a caller once per request, from
//! its identity, its granted permissions and app-ops, and the privileged-mode
//! flag carried by system uids.

use std::collections::BTreeSet;

use crate::auth::registry::{AppOp, GrantRegistry, Permission};
use crate::classify::MediaType;

/// Uids below this value belong to the platform (root, system, shell) and run
/// in privileged mode.
pub const FIRST_APPLICATION_UID: u32 = 10_000;

/// Who is asking: the identity carried by a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerIdentity {
    pub uid: u32,
    pub package_name: String,
}

impl CallerIdentity {
    pub fn new(uid: u32, package_name: &str) -> Self {
        Self {
            uid,
            package_name: package_name.to_string(),
        }
    }
}

/// Effective capabilities of a caller for a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerCapabilities {
    pub package_name: String,
    pub uid: u32,
    pub has_read_external_storage: bool,
    /// Privileged mode: bypasses every policy rule.
    pub has_manage_external_storage: bool,
    /// Media types the caller may access as if it owned them. Only ever
    /// contains `Image` and `Video`.
    pub system_gallery_media_types: BTreeSet<MediaType>,
    /// The caller's own package plus any package sharing its identity.
    pub owned_packages: BTreeSet<String>,
}

impl CallerCapabilities {
    /// The minimal capability set: owns its own package, nothing else.
    pub fn minimal(caller: &CallerIdentity) -> Self {
        Self {
            package_name: caller.package_name.clone(),
            uid: caller.uid,
            has_read_external_storage: false,
            has_manage_external_storage: false,
            system_gallery_media_types: BTreeSet::new(),
            owned_packages: BTreeSet::from([caller.package_name.clone()]),
        }
    }

    pub fn owns_package(&self, package: &str) -> bool {
        self.owned_packages.contains(package)
    }

    /// True when the system-gallery grant covers `media_type`.
    pub fn gallery_covers(&self, media_type: MediaType) -> bool {
        self.system_gallery_media_types.contains(&media_type)
    }
}

fn gallery_media_type(op: AppOp) -> Option<MediaType> {
    match op {
        AppOp::WriteMediaImages => Some(MediaType::Image),
        AppOp::WriteMediaVideo => Some(MediaType::Video),
        // Audio is never part of the system-gallery grant.
        AppOp::WriteMediaAudio => None,
    }
}

/// Computes the capabilities of `caller`. Never fails: a caller without
/// registered grants gets the minimal set.
pub fn capabilities_of(caller: &CallerIdentity, registry: &GrantRegistry) -> CallerCapabilities {
    let mut caps = CallerCapabilities::minimal(caller);

    if let Some(grants) = registry.grants_for(caller.uid) {
        caps.has_read_external_storage = grants
            .permissions
            .contains(&Permission::ReadExternalStorage);
        caps.has_manage_external_storage = grants
            .permissions
            .contains(&Permission::ManageExternalStorage);
        caps.system_gallery_media_types = grants
            .app_ops
            .iter()
            .filter_map(|op| gallery_media_type(*op))
            .collect();
        caps.owned_packages
            .extend(grants.shared_packages.iter().cloned());
    }

    if caller.uid < FIRST_APPLICATION_UID {
        caps.has_manage_external_storage = true;
    }

    caps
}
