//! Ordered subscriber registry.
//!
//! Handlers are kept in registration order and identified by a monotonically
//! increasing [`HandlerId`]. Registering the same `Arc` twice returns the
//! existing id; removing an unknown id is a no-op.
//!
//! Dispatch always works on a cloned list so a handler may add or remove
//! handlers without deadlocking or invalidating the iteration.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Identifier returned when a handler is registered.
pub type HandlerId = u64;

/// Ordered set of shared handlers.
pub struct Registry<H: ?Sized> {
    entries: Vec<(HandlerId, Arc<H>)>,
    next_id: HandlerId,
}

impl<H: ?Sized> Default for Registry<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }
}

impl<H: ?Sized> Registry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler at the end of the list.
    pub fn add(&mut self, handler: Arc<H>) -> HandlerId {
        if let Some(id) = self.find(&handler) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, handler));
        id
    }

    /// Remove a handler by id. Returns whether anything was removed.
    pub fn remove(&mut self, id: HandlerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    /// Remove a handler by identity.
    pub fn remove_handler(&mut self, handler: &Arc<H>) -> bool {
        match self.find(handler) {
            Some(id) => self.remove(id),
            None => false,
        }
    }

    fn find(&self, handler: &Arc<H>) -> Option<HandlerId> {
        // Compare data pointers only; vtable pointers are not unique
        let target = Arc::as_ptr(handler) as *const ();
        self.entries
            .iter()
            .find(|(_, h)| Arc::as_ptr(h) as *const () == target)
            .map(|(id, _)| *id)
    }

    pub fn contains(&self, id: HandlerId) -> bool {
        self.entries.iter().any(|(entry_id, _)| *entry_id == id)
    }

    /// Handlers in registration order, cloned for dispatch.
    pub fn handlers(&self) -> Vec<(HandlerId, Arc<H>)> {
        self.entries.clone()
    }

    pub fn ids(&self) -> Vec<HandlerId> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Run `f`, turning both an `Err` and a panic into an error message.
pub fn isolate<E, F>(f: F) -> Result<(), String>
where
    E: std::fmt::Display,
    F: FnOnce() -> Result<(), E>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
