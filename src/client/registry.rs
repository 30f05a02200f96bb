//! Session registry
//!
//! Tracks which caller each live connection acts as.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::auth::CallerIdentity;

/// Registry of authenticated connections
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SocketAddr, CallerIdentity>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, addr: SocketAddr, caller: CallerIdentity) {
        self.sessions.insert(addr, caller);
    }

    pub fn remove(&mut self, addr: &SocketAddr) -> Option<CallerIdentity> {
        self.sessions.remove(addr)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
