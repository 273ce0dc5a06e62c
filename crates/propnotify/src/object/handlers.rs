#![forbid(unsafe_code)]

//! Synchronous change handlers.
//!
//! Each notifying object keeps one [`HandlerList`] per direction
//! ("changing" and "changed"). Handlers run in registration order on the
//! thread that raised the change. A failing handler does not stop the others;
//! every failure is collected and handed back to the caller for routing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use super::record::PropertyChange;
use crate::error::HandlerError;
use crate::sync::lock;

type Handler = Arc<dyn Fn(&PropertyChange) -> Result<(), HandlerError> + Send + Sync>;
type Entries = Mutex<Vec<(u64, Handler)>>;

#[derive(Default)]
pub(crate) struct HandlerList {
    entries: Arc<Entries>,
    next_id: AtomicU64,
}

impl HandlerList {
    pub(crate) fn register(
        &self,
        handler: impl Fn(&PropertyChange) -> Result<(), HandlerError> + Send + Sync + 'static,
    ) -> HandlerGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.entries).push((id, Arc::new(handler)));
        HandlerGuard {
            entries: Arc::downgrade(&self.entries),
            id,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Invoke every handler with `record`, returning the failures in
    /// registration order.
    pub(crate) fn invoke(&self, record: &PropertyChange) -> Vec<HandlerError> {
        let handlers: Vec<Handler> = lock(&self.entries)
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        handlers
            .iter()
            .filter_map(|handler| handler(record).err())
            .collect()
    }
}

/// Registration of a change handler. Dropping it removes the handler.
#[must_use = "dropping the guard unregisters the handler"]
pub struct HandlerGuard {
    entries: Weak<Entries>,
    id: u64,
}

impl HandlerGuard {
    /// Keep the handler registered for the lifetime of the object.
    pub fn detach(self) {
        let mut this = self;
        this.entries = Weak::new();
    }
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        if let Some(entries) = self.entries.upgrade() {
            lock(&entries).retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for HandlerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerGuard").field("id", &self.id).finish()
    }
}
