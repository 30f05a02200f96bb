//! Session state
//!
//! Defines the `Session` struct: the authenticated caller of one control
//! connection and the handles it currently holds open.

use std::collections::HashMap;

use crate::auth::CallerIdentity;
use crate::coordinator::OpenHandle;

/// State of one control connection.
#[derive(Debug, Default)]
pub struct Session {
    caller: Option<CallerIdentity>,
    handles: HashMap<u64, OpenHandle>,
    next_handle: u64,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.caller.is_some()
    }

    pub fn caller(&self) -> Option<&CallerIdentity> {
        self.caller.as_ref()
    }

    pub fn set_caller(&mut self, caller: CallerIdentity) {
        self.caller = Some(caller);
    }

    /// Stores `handle` and returns the id the client refers to it by.
    pub fn insert_handle(&mut self, handle: OpenHandle) -> u64 {
        self.next_handle += 1;
        self.handles.insert(self.next_handle, handle);
        self.next_handle
    }

    pub fn handle(&self, id: u64) -> Option<&OpenHandle> {
        self.handles.get(&id)
    }

    pub fn handle_mut(&mut self, id: u64) -> Option<&mut OpenHandle> {
        self.handles.get_mut(&id)
    }

    pub fn take_handle(&mut self, id: u64) -> Option<OpenHandle> {
        self.handles.remove(&id)
    }

    /// Removes every open handle, e.g. when the connection ends.
    pub fn drain_handles(&mut self) -> Vec<OpenHandle> {
        self.handles.drain().map(|(_, handle)| handle).collect()
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }
}
