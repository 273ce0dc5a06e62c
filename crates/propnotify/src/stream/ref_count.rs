#![forbid(unsafe_code)]

//! Reference-counted multicast.
//!
//! A [`RefCountStream<T>`] shares one upstream connection among all of its
//! subscribers:
//!
//! ```text
//! idle (0 subscribers) --subscribe--> active (>=1) --last unsubscribe--> idle
//! ```
//!
//! The 0→1 edge calls the `connect` hook, which wires the upstream into the
//! shared output and returns the connection. The 1→0 edge drops that
//! connection. The cycle may repeat any number of times; every reconnect is a
//! fresh call to `connect`.

use std::sync::{Arc, Mutex};

use super::{Observer, Source, Subject, Subscription};
use crate::sync::lock;

type ConnectFn<T> = Box<dyn Fn(&Subject<T>) -> Subscription + Send + Sync>;

struct RefCountState {
    subscribers: usize,
    connection: Option<Subscription>,
    connects: u64,
}

struct RefCountInner<T> {
    output: Subject<T>,
    state: Mutex<RefCountState>,
    connect: ConnectFn<T>,
}

impl<T> RefCountInner<T> {
    fn release(&self) {
        let connection = {
            let mut state = lock(&self.state);
            state.subscribers = state.subscribers.saturating_sub(1);
            if state.subscribers == 0 {
                state.connection.take()
            } else {
                None
            }
        };
        if connection.is_some() {
            tracing::debug!(message = "ref_count.disconnect");
        }
        drop(connection);
    }
}

/// A multicast stream that is connected upstream only while observed.
pub struct RefCountStream<T> {
    inner: Arc<RefCountInner<T>>,
}

impl<T> Clone for RefCountStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for RefCountStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("RefCountStream")
            .field("subscribers", &state.subscribers)
            .field("connected", &state.connection.is_some())
            .field("connects", &state.connects)
            .finish()
    }
}

impl<T> RefCountStream<T> {
    /// Build a stream whose upstream is attached by `connect`.
    ///
    /// `connect` receives the shared output subject and must return the
    /// subscription that keeps the upstream attached.
    pub fn new(connect: impl Fn(&Subject<T>) -> Subscription + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(RefCountInner {
                output: Subject::new(),
                state: Mutex::new(RefCountState {
                    subscribers: 0,
                    connection: None,
                    connects: 0,
                }),
                connect: Box::new(connect),
            }),
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.state).subscribers
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        lock(&self.inner.state).connection.is_some()
    }

    /// Number of times the upstream has been connected.
    #[must_use]
    pub fn connect_count(&self) -> u64 {
        lock(&self.inner.state).connects
    }

    /// Complete all subscribers and drop the upstream connection for good.
    pub fn complete(&self) {
        let connection = lock(&self.inner.state).connection.take();
        drop(connection);
        self.inner.output.complete();
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.inner.output.is_stopped()
    }
}

impl<T: Clone + Send + 'static> Source<T> for RefCountStream<T> {
    fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Subscription {
        if self.inner.output.is_stopped() {
            return self.inner.output.subscribe(observer);
        }
        let downstream = self.inner.output.subscribe(observer);
        {
            let mut state = lock(&self.inner.state);
            state.subscribers += 1;
            if state.subscribers == 1 {
                state.connection = Some((self.inner.connect)(&self.inner.output));
                state.connects += 1;
                tracing::debug!(message = "ref_count.connect", connects = state.connects);
            }
        }

        let inner = Arc::clone(&self.inner);
        Subscription::new(move || {
            downstream.unsubscribe();
            inner.release();
        })
    }
}
