#![forbid(unsafe_code)]

//! Push-based streams.
//!
//! The notification pipelines and derived properties are built from a small
//! set of stream primitives:
//!
//! - [`Source`]: anything that can be subscribed to with an [`Observer`].
//! - [`Subject`]: a thread-safe multicast channel, the usual upstream
//!   producer and the intake of every pipeline.
//! - [`RefCountStream`]: a multicast stream that connects to its upstream
//!   while at least one subscriber is attached.
//! - [`SourceExt`]: combinators (`start_with`, `distinct_until_changed`,
//!   `observe_on`, `map`, `filter`).
//!
//! Everything runs on the thread that pushes the value. Nothing here spawns
//! threads or blocks; redirecting delivery is the job of a
//! [`Scheduler`](crate::Scheduler).

pub mod ops;
pub mod ref_count;
pub mod subject;
pub mod subscription;

use std::sync::Arc;

use crate::error::HandlerError;
use crate::scheduler::Scheduler;

pub use ops::{DistinctUntilChanged, Filter, FromIter, Map, ObserveOn, StartWith, from_iter};
pub use ref_count::RefCountStream;
pub use subject::Subject;
pub use subscription::Subscription;

/// Receiver of stream notifications.
///
/// `on_error` and `on_completed` are terminal; a well-behaved source sends
/// nothing after either.
pub trait Observer<T>: Send + Sync {
    fn on_next(&self, value: T);

    fn on_error(&self, _error: HandlerError) {}

    fn on_completed(&self) {}
}

/// A subscribable stream of `T`.
pub trait Source<T>: Send + Sync {
    fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Subscription;
}

/// Type-erased, shareable source.
pub type BoxSource<T> = Arc<dyn Source<T>>;

impl<T, S: Source<T> + ?Sized> Source<T> for Arc<S> {
    fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Subscription {
        (**self).subscribe(observer)
    }
}

type NextFn<T> = Box<dyn Fn(T) + Send + Sync>;
type ErrorFn = Box<dyn Fn(HandlerError) + Send + Sync>;
type CompletedFn = Box<dyn Fn() + Send + Sync>;

/// Closure-backed [`Observer`].
pub struct FnObserver<T> {
    next: NextFn<T>,
    error: Option<ErrorFn>,
    completed: Option<CompletedFn>,
}

impl<T> FnObserver<T> {
    pub fn new(next: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            next: Box::new(next),
            error: None,
            completed: None,
        }
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Fn(HandlerError) + Send + Sync + 'static) -> Self {
        self.error = Some(Box::new(error));
        self
    }

    #[must_use]
    pub fn with_completed(mut self, completed: impl Fn() + Send + Sync + 'static) -> Self {
        self.completed = Some(Box::new(completed));
        self
    }
}

impl<T> Observer<T> for FnObserver<T> {
    fn on_next(&self, value: T) {
        (self.next)(value);
    }

    fn on_error(&self, error: HandlerError) {
        if let Some(on_error) = &self.error {
            on_error(error);
        }
    }

    fn on_completed(&self) {
        if let Some(on_completed) = &self.completed {
            on_completed();
        }
    }
}

/// Combinators available on every [`Source`].
pub trait SourceExt<T>: Source<T> + Sized {
    /// Subscribe with a closure that only cares about values.
    fn subscribe_fn(&self, next: impl Fn(T) + Send + Sync + 'static) -> Subscription
    where
        T: 'static,
    {
        self.subscribe(Arc::new(FnObserver::new(next)))
    }

    /// Emit `seed` to each new subscriber before the source's own values.
    fn start_with(self, seed: T) -> StartWith<Self, T> {
        StartWith::new(self, seed)
    }

    /// Drop values equal to the one delivered just before them.
    fn distinct_until_changed(self) -> DistinctUntilChanged<Self> {
        DistinctUntilChanged::new(self)
    }

    /// Redeliver every notification through `scheduler`.
    fn observe_on(self, scheduler: Arc<dyn Scheduler>) -> ObserveOn<Self> {
        ObserveOn::new(self, scheduler)
    }

    fn map<U, F>(self, f: F) -> Map<Self, F, T>
    where
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        Map::new(self, f)
    }

    fn filter<F>(self, predicate: F) -> Filter<Self, F>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Filter::new(self, predicate)
    }

    fn boxed(self) -> BoxSource<T>
    where
        Self: 'static,
    {
        Arc::new(self)
    }
}

impl<T, S: Source<T>> SourceExt<T> for S {}
