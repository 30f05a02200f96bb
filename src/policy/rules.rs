//! Policy rules
//!
//! Rules apply in priority order: the manage bypass, the private-directory
//! gate, then the per-operation rule (type conformity for write-introducing
//! operations, ownership for content access, visibility for listing).

use log::debug;

use crate::auth::CallerCapabilities;
use crate::classify::{Category, PathFacts};
use crate::index::OwnershipRecord;
use crate::policy::{DenyReason, Operation, PolicyRequest, Verdict};

/// Decides whether `request` may proceed.
pub fn evaluate(request: &PolicyRequest<'_>) -> Verdict {
    let verdict = decide(request);
    if let Verdict::Deny(reason) = &verdict {
        debug!(
            "{:?} on {} denied for {}: {}",
            request.operation, request.facts.path, request.caller.package_name, reason
        );
    }
    verdict
}

/// Whether a directory shows up at all: only another package's private
/// directories are concealed.
pub fn directory_visible(facts: &PathFacts, caller: &CallerCapabilities) -> bool {
    caller.has_manage_external_storage
        || facts
            .category
            .private_package()
            .is_none_or(|package| caller.owns_package(package))
}

fn decide(request: &PolicyRequest<'_>) -> Verdict {
    let caller = request.caller;
    let facts = request.facts;

    // 1. Privileged callers skip arbitration entirely
    if caller.has_manage_external_storage {
        return Verdict::Allow;
    }

    // 2. App-private directories belong to exactly one package
    if let Some(package) = facts.category.private_package() {
        if caller.owns_package(package) {
            return match request.operation {
                Operation::RenameDestination => gallery_escape(facts, caller, request.record),
                _ => Verdict::Allow,
            };
        }
        return Verdict::Deny(DenyReason::ForeignPrivateDirectory);
    }

    // 3. Per-operation rule
    match request.operation {
        Operation::Create => conformity(facts, caller),
        Operation::RenameDestination => match conformity(facts, caller) {
            Verdict::Allow => gallery_escape(facts, caller, request.record),
            deny => deny,
        },
        Operation::CreateDirectory => {
            if facts.category == Category::TopLevel {
                Verdict::Deny(DenyReason::TopLevelEntry)
            } else {
                Verdict::Allow
            }
        }
        Operation::RemoveDirectory => Verdict::Allow,
        Operation::Read | Operation::Write | Operation::Delete | Operation::RenameSource => {
            content_access(caller, request.record)
        }
        Operation::List => listing(facts, caller, request.record),
        Operation::Lookup => match listing(facts, caller, request.record) {
            Verdict::Allow => Verdict::Allow,
            _ if facts.category.is_default_media_directory() => Verdict::Allow,
            deny => deny,
        },
    }
}

/// Type conformity for operations that introduce a file at `facts.path`.
fn conformity(facts: &PathFacts, caller: &CallerCapabilities) -> Verdict {
    let category = &facts.category;
    if *category == Category::TopLevel {
        return Verdict::Deny(DenyReason::TopLevelEntry);
    }
    if category.accepts(facts.media_type) {
        return Verdict::Allow;
    }
    // A gallery may place its media types in any default directory
    if category.is_default_media_directory() && caller.gallery_covers(facts.media_type) {
        return Verdict::Allow;
    }
    Verdict::Deny(DenyReason::TypeMismatch {
        category: category.clone(),
        media_type: facts.media_type,
    })
}

/// A caller reaching the moved file only through its gallery grant must
/// keep it within the granted types.
fn gallery_escape(
    destination: &PathFacts,
    caller: &CallerCapabilities,
    source: Option<&OwnershipRecord>,
) -> Verdict {
    match source {
        Some(record)
            if !caller.owns_package(&record.owner_package)
                && !caller.gallery_covers(destination.media_type) =>
        {
            Verdict::Deny(DenyReason::GalleryTypeEscape)
        }
        _ => Verdict::Allow,
    }
}

fn content_access(caller: &CallerCapabilities, record: Option<&OwnershipRecord>) -> Verdict {
    match record {
        Some(record) if caller.owns_package(&record.owner_package) => Verdict::Allow,
        Some(record) if caller.gallery_covers(record.media_type) => Verdict::Allow,
        Some(_) => Verdict::Deny(DenyReason::NotOwner),
        None => Verdict::Deny(DenyReason::Untracked),
    }
}

fn listing(
    facts: &PathFacts,
    caller: &CallerCapabilities,
    record: Option<&OwnershipRecord>,
) -> Verdict {
    let default_directory = facts.category.is_default_media_directory();
    let visible = match record {
        Some(record) => {
            caller.owns_package(&record.owner_package)
                || caller.gallery_covers(record.media_type)
                || (caller.has_read_external_storage
                    && record.media_type.is_media()
                    && default_directory)
        }
        None => caller.has_read_external_storage || default_directory,
    };

    if visible {
        Verdict::Allow
    } else {
        Verdict::Deny(DenyReason::Hidden)
    }
}
