#![forbid(unsafe_code)]

//! Stream combinators.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use super::{Observer, Source, Subscription};
use crate::error::HandlerError;
use crate::scheduler::Scheduler;
use crate::sync::lock;

// ─── from_iter ───────────────────────────────────────────────────────────────

/// Cold source replaying a fixed sequence to each subscriber, then completing.
pub struct FromIter<T> {
    values: Vec<T>,
}

pub fn from_iter<T>(values: impl IntoIterator<Item = T>) -> FromIter<T> {
    FromIter {
        values: values.into_iter().collect(),
    }
}

impl<T: Clone + Send + Sync> Source<T> for FromIter<T> {
    fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Subscription {
        for value in &self.values {
            observer.on_next(value.clone());
        }
        observer.on_completed();
        Subscription::empty()
    }
}

// ─── start_with ──────────────────────────────────────────────────────────────

pub struct StartWith<S, T> {
    source: S,
    seed: T,
}

impl<S, T> StartWith<S, T> {
    pub(crate) fn new(source: S, seed: T) -> Self {
        Self { source, seed }
    }
}

impl<S, T> Source<T> for StartWith<S, T>
where
    S: Source<T>,
    T: Clone + Send + Sync,
{
    fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Subscription {
        observer.on_next(self.seed.clone());
        self.source.subscribe(observer)
    }
}

// ─── distinct_until_changed ──────────────────────────────────────────────────

pub struct DistinctUntilChanged<S> {
    source: S,
}

impl<S> DistinctUntilChanged<S> {
    pub(crate) fn new(source: S) -> Self {
        Self { source }
    }
}

/// Per-subscription state: the last value forwarded downstream.
struct DistinctObserver<T> {
    downstream: Arc<dyn Observer<T>>,
    last: Mutex<Option<T>>,
}

impl<T: Clone + PartialEq + Send> Observer<T> for DistinctObserver<T> {
    fn on_next(&self, value: T) {
        {
            let mut last = lock(&self.last);
            if last.as_ref() == Some(&value) {
                return;
            }
            *last = Some(value.clone());
        }
        self.downstream.on_next(value);
    }

    fn on_error(&self, error: HandlerError) {
        self.downstream.on_error(error);
    }

    fn on_completed(&self) {
        self.downstream.on_completed();
    }
}

impl<S, T> Source<T> for DistinctUntilChanged<S>
where
    S: Source<T>,
    T: Clone + PartialEq + Send + 'static,
{
    fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Subscription {
        self.source.subscribe(Arc::new(DistinctObserver {
            downstream: observer,
            last: Mutex::new(None),
        }))
    }
}

// ─── observe_on ──────────────────────────────────────────────────────────────

pub struct ObserveOn<S> {
    source: S,
    scheduler: Arc<dyn Scheduler>,
}

impl<S> ObserveOn<S> {
    pub(crate) fn new(source: S, scheduler: Arc<dyn Scheduler>) -> Self {
        Self { source, scheduler }
    }
}

struct ScheduledObserver<T> {
    downstream: Arc<dyn Observer<T>>,
    scheduler: Arc<dyn Scheduler>,
}

impl<T: Send + 'static> Observer<T> for ScheduledObserver<T> {
    fn on_next(&self, value: T) {
        let downstream = Arc::clone(&self.downstream);
        self.scheduler
            .schedule(Box::new(move || downstream.on_next(value)));
    }

    fn on_error(&self, error: HandlerError) {
        let downstream = Arc::clone(&self.downstream);
        self.scheduler
            .schedule(Box::new(move || downstream.on_error(error)));
    }

    fn on_completed(&self) {
        let downstream = Arc::clone(&self.downstream);
        self.scheduler
            .schedule(Box::new(move || downstream.on_completed()));
    }
}

impl<S, T> Source<T> for ObserveOn<S>
where
    S: Source<T>,
    T: Send + 'static,
{
    fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Subscription {
        self.source.subscribe(Arc::new(ScheduledObserver {
            downstream: observer,
            scheduler: Arc::clone(&self.scheduler),
        }))
    }
}

// ─── map / filter ────────────────────────────────────────────────────────────

pub struct Map<S, F, T> {
    source: S,
    f: Arc<F>,
    _input: PhantomData<fn(T)>,
}

impl<S, F, T> Map<S, F, T> {
    pub(crate) fn new(source: S, f: F) -> Self {
        Self {
            source,
            f: Arc::new(f),
            _input: PhantomData,
        }
    }
}

struct MapObserver<F, U> {
    downstream: Arc<dyn Observer<U>>,
    f: Arc<F>,
}

impl<T, U, F> Observer<T> for MapObserver<F, U>
where
    F: Fn(T) -> U + Send + Sync,
{
    fn on_next(&self, value: T) {
        self.downstream.on_next((self.f)(value));
    }

    fn on_error(&self, error: HandlerError) {
        self.downstream.on_error(error);
    }

    fn on_completed(&self) {
        self.downstream.on_completed();
    }
}

impl<S, F, T, U> Source<U> for Map<S, F, T>
where
    S: Source<T>,
    F: Fn(T) -> U + Send + Sync + 'static,
    T: 'static,
    U: 'static,
{
    fn subscribe(&self, observer: Arc<dyn Observer<U>>) -> Subscription {
        self.source.subscribe(Arc::new(MapObserver {
            downstream: observer,
            f: Arc::clone(&self.f),
        }))
    }
}

pub struct Filter<S, F> {
    source: S,
    predicate: Arc<F>,
}

impl<S, F> Filter<S, F> {
    pub(crate) fn new(source: S, predicate: F) -> Self {
        Self {
            source,
            predicate: Arc::new(predicate),
        }
    }
}

struct FilterObserver<T, F> {
    downstream: Arc<dyn Observer<T>>,
    predicate: Arc<F>,
}

impl<T, F> Observer<T> for FilterObserver<T, F>
where
    F: Fn(&T) -> bool + Send + Sync,
{
    fn on_next(&self, value: T) {
        if (self.predicate)(&value) {
            self.downstream.on_next(value);
        }
    }

    fn on_error(&self, error: HandlerError) {
        self.downstream.on_error(error);
    }

    fn on_completed(&self) {
        self.downstream.on_completed();
    }
}

impl<S, F, T> Source<T> for Filter<S, F>
where
    S: Source<T>,
    F: Fn(&T) -> bool + Send + Sync + 'static,
    T: 'static,
{
    fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Subscription {
        self.source.subscribe(Arc::new(FilterObserver {
            downstream: observer,
            predicate: Arc::clone(&self.predicate),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::DispatchQueue;
    use crate::stream::{SourceExt, Subject};

    fn collect<S: Source<i32>>(source: &S) -> (Arc<Mutex<Vec<i32>>>, Subscription) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let sub = source.subscribe_fn(move |v| sink.lock().unwrap().push(v));
        (log, sub)
    }

    #[test]
    fn from_iter_replays_per_subscriber() {
        let source = from_iter([1, 2, 3]);
        let (first, _a) = collect(&source);
        let (second, _b) = collect(&source);
        assert_eq!(*first.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(*second.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn start_with_emits_seed_first() {
        let subject = Subject::<i32>::new();
        let source = subject.clone().start_with(0);
        let (log, _sub) = collect(&source);
        subject.next(7);
        assert_eq!(*log.lock().unwrap(), vec![0, 7]);
    }

    #[test]
    fn distinct_until_changed_drops_consecutive_repeats() {
        let source = from_iter([1, 1, 2, 2, 3, 1]).distinct_until_changed();
        let (log, _sub) = collect(&source);
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3, 1]);
    }

    #[test]
    fn distinct_state_is_per_subscriber() {
        let source = from_iter([4, 4]).distinct_until_changed();
        let (a, _sa) = collect(&source);
        let (b, _sb) = collect(&source);
        assert_eq!(*a.lock().unwrap(), vec![4]);
        assert_eq!(*b.lock().unwrap(), vec![4]);
    }

    #[test]
    fn map_and_filter_compose() {
        let source = from_iter(1..=6).filter(|v| v % 2 == 0).map(|v| v * 10);
        let (log, _sub) = collect(&source);
        assert_eq!(*log.lock().unwrap(), vec![20, 40, 60]);
    }

    #[test]
    fn observe_on_defers_until_queue_runs() {
        let queue = Arc::new(DispatchQueue::new());
        let subject = Subject::<i32>::new();
        let source = subject.clone().observe_on(queue.clone());
        let (log, _sub) = collect(&source);

        subject.next(1);
        subject.next(2);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(queue.pending(), 2);

        assert_eq!(queue.run_pending(), 2);
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn errors_pass_through_operators() {
        let subject: Subject<i32> = Subject::new();
        let source = subject.clone().map(|v| v + 1).distinct_until_changed();
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        let _sub = source.subscribe(Arc::new(
            crate::stream::FnObserver::new(|_: i32| {})
                .with_error(move |e| *s.lock().unwrap() = Some(e.to_string())),
        ));
        subject.error(crate::error::MessageError::shared("bad"));
        assert_eq!(seen.lock().unwrap().as_deref(), Some("bad"));
    }
}
