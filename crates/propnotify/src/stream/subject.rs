#![forbid(unsafe_code)]

//! Thread-safe multicast subject.
//!
//! A [`Subject<T>`] is both an entry point (`next`/`error`/`complete`) and a
//! hot [`Source`]: every value pushed is delivered to the observers attached
//! at that moment, in attachment order.
//!
//! Delivery happens on the pushing thread, outside the subject's lock, so an
//! observer may subscribe, unsubscribe, or push again from inside a callback.
//! An observer removed while a delivery is in flight may still see that one
//! value.

use std::sync::{Arc, Mutex, Weak};

use super::{Observer, Source, Subscription};
use crate::error::HandlerError;
use crate::sync::lock;

#[derive(Clone)]
enum Terminal {
    Completed,
    Errored(HandlerError),
}

struct SubjectInner<T> {
    observers: Vec<(u64, Arc<dyn Observer<T>>)>,
    next_id: u64,
    terminal: Option<Terminal>,
}

/// A multicast channel. Cloning yields another handle to the same channel.
pub struct Subject<T> {
    inner: Arc<Mutex<SubjectInner<T>>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Subject<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("Subject")
            .field("subscriber_count", &inner.observers.len())
            .field("stopped", &inner.terminal.is_some())
            .finish()
    }
}

impl<T> Subject<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SubjectInner {
                observers: Vec::new(),
                next_id: 0,
                terminal: None,
            })),
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).observers.len()
    }

    #[must_use]
    pub fn has_observers(&self) -> bool {
        self.subscriber_count() > 0
    }

    /// True after `error` or `complete`.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        lock(&self.inner).terminal.is_some()
    }

    fn snapshot(&self) -> Option<Vec<Arc<dyn Observer<T>>>> {
        let inner = lock(&self.inner);
        if inner.terminal.is_some() {
            return None;
        }
        Some(inner.observers.iter().map(|(_, o)| Arc::clone(o)).collect())
    }

    /// Stop the subject with `terminal`, returning the observers to notify.
    fn stop(&self, terminal: Terminal) -> Vec<Arc<dyn Observer<T>>> {
        let mut inner = lock(&self.inner);
        if inner.terminal.is_some() {
            return Vec::new();
        }
        inner.terminal = Some(terminal);
        inner.observers.drain(..).map(|(_, o)| o).collect()
    }

    /// Fail every observer and stop the subject.
    pub fn error(&self, error: HandlerError) {
        for observer in self.stop(Terminal::Errored(Arc::clone(&error))) {
            observer.on_error(Arc::clone(&error));
        }
    }

    /// Complete every observer and stop the subject.
    pub fn complete(&self) {
        for observer in self.stop(Terminal::Completed) {
            observer.on_completed();
        }
    }
}

impl<T: Clone> Subject<T> {
    /// Deliver `value` to every current observer. Ignored once stopped.
    pub fn next(&self, value: T) {
        let Some(observers) = self.snapshot() else {
            return;
        };
        for observer in observers {
            observer.on_next(value.clone());
        }
    }
}

fn remove_observer<T>(inner: &Weak<Mutex<SubjectInner<T>>>, id: u64) {
    if let Some(inner) = inner.upgrade() {
        lock(&inner).observers.retain(|(oid, _)| *oid != id);
    }
}

impl<T: Clone + Send + 'static> Source<T> for Subject<T> {
    fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Subscription {
        let mut inner = lock(&self.inner);
        if let Some(terminal) = inner.terminal.clone() {
            drop(inner);
            match terminal {
                Terminal::Completed => observer.on_completed(),
                Terminal::Errored(err) => observer.on_error(err),
            }
            return Subscription::empty();
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.observers.push((id, observer));
        drop(inner);

        let weak = Arc::downgrade(&self.inner);
        Subscription::new(move || remove_observer(&weak, id))
    }
}
