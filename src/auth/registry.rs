//! Grant registry
//!
//! Holds the identity and granted permissions/app-ops of every package known
//! to the arbiter. Grants may change at runtime; capabilities are recomputed
//! from the registry on every request.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use log::info;
use serde::Deserialize;

use crate::auth::capabilities::CallerIdentity;
use crate::error::AuthError;

/// Runtime permissions relevant to shared storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    ReadExternalStorage,
    ManageExternalStorage,
}

/// App-ops granting write access to a media collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppOp {
    WriteMediaImages,
    WriteMediaVideo,
    WriteMediaAudio,
}

/// One registered package and its grants.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PackageGrants {
    pub name: String,
    pub uid: u32,
    #[serde(default)]
    pub permissions: BTreeSet<Permission>,
    #[serde(default)]
    pub app_ops: BTreeSet<AppOp>,
    /// Packages sharing this package's identity.
    #[serde(default)]
    pub shared_packages: Vec<String>,
}

impl PackageGrants {
    pub fn new(name: &str, uid: u32) -> Self {
        Self {
            name: name.to_string(),
            uid,
            permissions: BTreeSet::new(),
            app_ops: BTreeSet::new(),
            shared_packages: Vec::new(),
        }
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.insert(permission);
        self
    }

    pub fn with_app_op(mut self, op: AppOp) -> Self {
        self.app_ops.insert(op);
        self
    }

    pub fn with_shared_package(mut self, package: &str) -> Self {
        self.shared_packages.push(package.to_string());
        self
    }
}

/// Registry of packages keyed by uid
#[derive(Debug, Default)]
pub struct GrantRegistry {
    packages: RwLock<HashMap<u32, PackageGrants>>,
}

impl GrantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_packages(packages: impl IntoIterator<Item = PackageGrants>) -> Self {
        let registry = Self::new();
        for grants in packages {
            registry.register(grants);
        }
        registry
    }

    /// Registers or replaces a package.
    pub fn register(&self, grants: PackageGrants) {
        info!("Registered package {} (uid {})", grants.name, grants.uid);
        self.write().insert(grants.uid, grants);
    }

    /// Resolves a uid to the caller identity it authenticates as.
    pub fn resolve(&self, uid: u32) -> Result<CallerIdentity, AuthError> {
        self.read()
            .get(&uid)
            .map(|grants| CallerIdentity::new(uid, &grants.name))
            .ok_or(AuthError::UnknownCaller(uid))
    }

    /// Snapshot of the grants registered for `uid`.
    pub fn grants_for(&self, uid: u32) -> Option<PackageGrants> {
        self.read().get(&uid).cloned()
    }

    pub fn grant_permission(&self, uid: u32, permission: Permission) -> bool {
        self.modify(uid, |grants| {
            grants.permissions.insert(permission);
        })
    }

    pub fn revoke_permission(&self, uid: u32, permission: Permission) -> bool {
        self.modify(uid, |grants| {
            grants.permissions.remove(&permission);
        })
    }

    pub fn allow_app_op(&self, uid: u32, op: AppOp) -> bool {
        self.modify(uid, |grants| {
            grants.app_ops.insert(op);
        })
    }

    pub fn deny_app_op(&self, uid: u32, op: AppOp) -> bool {
        self.modify(uid, |grants| {
            grants.app_ops.remove(&op);
        })
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn modify(&self, uid: u32, change: impl FnOnce(&mut PackageGrants)) -> bool {
        match self.write().get_mut(&uid) {
            Some(grants) => {
                change(grants);
                info!("Updated grants for {} (uid {})", grants.name, uid);
                true
            }
            None => false,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<u32, PackageGrants>> {
        self.packages.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<u32, PackageGrants>> {
        self.packages.write().unwrap_or_else(PoisonError::into_inner)
    }
}
