#![forbid(unsafe_code)]

//! RAII subscription handles.

use std::sync::Mutex;

use crate::sync::lock;

type Teardown = Box<dyn FnOnce() + Send>;

/// Handle to an active subscription.
///
/// Dropping the handle (or calling [`unsubscribe`](Self::unsubscribe))
/// runs the teardown exactly once. Later calls are no-ops.
pub struct Subscription {
    teardown: Mutex<Option<Teardown>>,
}

impl Subscription {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    /// A subscription with nothing to tear down.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            teardown: Mutex::new(None),
        }
    }

    /// Combine several subscriptions; tearing down the result tears down
    /// each of them in order.
    #[must_use]
    pub fn from_many(subscriptions: Vec<Subscription>) -> Self {
        Self::new(move || {
            for sub in subscriptions {
                sub.unsubscribe();
            }
        })
    }

    pub fn unsubscribe(&self) {
        // Take first so the teardown runs without the lock held.
        let teardown = lock(&self.teardown).take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    /// True once the teardown has run (or there never was one).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.teardown).is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.is_closed())
            .finish()
    }
}
