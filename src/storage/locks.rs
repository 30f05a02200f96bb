//! Per-path lock table
//!
//! Serialises mutations of the same path. A request states every path it
//! will touch up front and acquires all of them at once, so two requests can
//! never hold part of each other's claims and deadlock. Tree operations
//! claim a whole subtree, which conflicts with any claim inside it.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::storage::validation::is_within;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathClaim {
    /// A single path.
    Exact(String),
    /// A path and everything below it.
    Subtree(String),
}

impl PathClaim {
    fn path(&self) -> &str {
        match self {
            PathClaim::Exact(path) | PathClaim::Subtree(path) => path,
        }
    }

    fn conflicts_with(&self, other: &PathClaim) -> bool {
        match (self, other) {
            (PathClaim::Exact(a), PathClaim::Exact(b)) => a == b,
            (PathClaim::Subtree(tree), PathClaim::Exact(path))
            | (PathClaim::Exact(path), PathClaim::Subtree(tree)) => is_within(tree, path),
            (PathClaim::Subtree(a), PathClaim::Subtree(b)) => is_within(a, b) || is_within(b, a),
        }
    }
}

#[derive(Debug)]
struct HeldClaims {
    id: u64,
    claims: Vec<PathClaim>,
}

#[derive(Debug, Default)]
struct LockState {
    held: Vec<HeldClaims>,
    next_id: u64,
}

#[derive(Debug, Default)]
pub struct PathLockTable {
    state: Mutex<LockState>,
    released: Condvar,
}

impl PathLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until none of `claims` conflicts with a claim held by another
    /// request, then holds all of them until the guard drops.
    pub fn acquire(&self, claims: Vec<PathClaim>) -> PathLockGuard<'_> {
        let mut state = self.lock_state();
        loop {
            let blocked = state.held.iter().any(|held| {
                held.claims
                    .iter()
                    .any(|h| claims.iter().any(|c| c.conflicts_with(h)))
            });
            if !blocked {
                break;
            }
            debug!("Waiting for path claims {:?}", claims);
            state = self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        let id = state.next_id;
        state.next_id += 1;
        state.held.push(HeldClaims { id, claims });
        PathLockGuard { table: self, id }
    }

    pub fn exact(&self, path: &str) -> PathLockGuard<'_> {
        self.acquire(vec![PathClaim::Exact(path.to_string())])
    }

    pub fn subtree(&self, path: &str) -> PathLockGuard<'_> {
        self.acquire(vec![PathClaim::Subtree(path.to_string())])
    }

    /// Number of requests currently holding claims.
    pub fn holders(&self) -> usize {
        self.lock_state().held.len()
    }

    /// True when a claim on `path` would have to wait.
    pub fn is_claimed(&self, path: &str) -> bool {
        let probe = PathClaim::Exact(path.to_string());
        self.lock_state()
            .held
            .iter()
            .any(|held| held.claims.iter().any(|c| c.conflicts_with(&probe)))
    }

    fn release(&self, id: u64) {
        let mut state = self.lock_state();
        if let Some(pos) = state.held.iter().position(|held| held.id == id) {
            let held = state.held.swap_remove(pos);
            debug!(
                "Released path claims {:?}",
                held.claims.iter().map(PathClaim::path).collect::<Vec<_>>()
            );
        }
        drop(state);
        self.released.notify_all();
    }

    fn lock_state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds a request's claims; releases them on drop.
#[derive(Debug)]
pub struct PathLockGuard<'a> {
    table: &'a PathLockTable,
    id: u64,
}

impl Drop for PathLockGuard<'_> {
    fn drop(&mut self) {
        self.table.release(self.id);
    }
}
