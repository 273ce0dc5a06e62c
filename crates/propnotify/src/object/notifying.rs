#![forbid(unsafe_code)]

//! The notifying object: synchronous change events plus change streams.
//!
//! # Design
//!
//! [`NotifyingObject`] is the notification half of a view model. The view
//! model owns its fields; it routes every mutation through
//! [`raise_and_set_if_changed`](NotifyingObject::raise_and_set_if_changed),
//! which compares, raises "changing", writes, and raises "changed".
//!
//! Raising a change does three things, in order:
//!
//! 1. Fetch the memoized record for the property name.
//! 2. Run the synchronous handlers for that direction.
//! 3. Push the record into the direction's pipeline, if one was ever built.
//!
//! Step 3 is skipped entirely for a direction nobody has asked a stream for.
//!
//! # Delay and suppression
//!
//! - [`suppress_change_notifications`](NotifyingObject::suppress_change_notifications):
//!   while any guard is held, raising is a no-op. Field writes still happen.
//! - [`delay_change_notifications`](NotifyingObject::delay_change_notifications):
//!   while any guard is held, handlers still run immediately, but pipeline
//!   records are buffered and released, deduplicated, when the last guard
//!   drops.
//!
//! Both are counters, so guards nest. Only the thread that moves the delay
//! counter across 0↔1 signals the pipelines' batch boundary.
//!
//! # Failure routing
//!
//! A handler that returns `Err` never stops the other handlers. Its failure is
//! logged and pushed to [`thrown_exceptions`](NotifyingObject::thrown_exceptions)
//! if that stream has ever been requested; otherwise the first failure is
//! returned to the mutator as [`NotifyError::Handler`] and the pipeline push
//! for that raise is skipped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use super::handlers::{HandlerGuard, HandlerList};
use super::pipeline::{ChangePipeline, ChangeStream};
use super::record::{ObjectId, PropertyChange, RecordCache};
use crate::config::NotifyConfig;
use crate::derived::DerivedPropertyBuilder;
use crate::error::{HandlerError, NotifyError, Result};
use crate::stream::{BoxSource, Source, Subject};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Changing,
    Changed,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Changing => "changing",
            Self::Changed => "changed",
        }
    }
}

/// Per-direction state.
struct Channel {
    handlers: HandlerList,
    records: RecordCache,
    pipeline: OnceLock<ChangePipeline>,
}

impl Channel {
    fn new(sender: ObjectId) -> Self {
        Self {
            handlers: HandlerList::default(),
            records: RecordCache::new(sender),
            pipeline: OnceLock::new(),
        }
    }
}

pub(crate) struct ObjectInner {
    id: ObjectId,
    config: NotifyConfig,
    suppressed: AtomicUsize,
    delayed: Arc<AtomicUsize>,
    changing: Channel,
    changed: Channel,
    thrown: OnceLock<Subject<HandlerError>>,
}

impl ObjectInner {
    fn channel(&self, direction: Direction) -> &Channel {
        match direction {
            Direction::Changing => &self.changing,
            Direction::Changed => &self.changed,
        }
    }

    fn pipeline(&self, direction: Direction) -> &ChangePipeline {
        self.channel(direction).pipeline.get_or_init(|| {
            tracing::debug!(
                message = "pipeline.build",
                object_id = self.id.get(),
                direction = direction.as_str()
            );
            ChangePipeline::new(direction.as_str(), Arc::clone(&self.delayed))
        })
    }

    fn signal_boundaries(&self) {
        for channel in [&self.changing, &self.changed] {
            if let Some(pipeline) = channel.pipeline.get() {
                pipeline.signal_boundary();
            }
        }
    }
}

impl Drop for ObjectInner {
    fn drop(&mut self) {
        for channel in [&self.changing, &self.changed] {
            if let Some(pipeline) = channel.pipeline.get() {
                pipeline.complete();
            }
        }
        if let Some(thrown) = self.thrown.get() {
            thrown.complete();
        }
    }
}

/// A shared handle to an object that raises property change notifications.
///
/// Cloning yields another handle to the same object. The object's streams
/// complete when the last handle is dropped.
#[derive(Clone)]
pub struct NotifyingObject {
    inner: Arc<ObjectInner>,
}

impl Default for NotifyingObject {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NotifyingObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyingObject")
            .field("id", &self.inner.id)
            .field("suppressed", &self.inner.suppressed.load(Ordering::Relaxed))
            .field("delayed", &self.inner.delayed.load(Ordering::Relaxed))
            .finish()
    }
}

impl NotifyingObject {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(NotifyConfig::default())
    }

    #[must_use]
    pub fn with_config(config: NotifyConfig) -> Self {
        let id = ObjectId::next();
        Self {
            inner: Arc::new(ObjectInner {
                id,
                config,
                suppressed: AtomicUsize::new(0),
                delayed: Arc::new(AtomicUsize::new(0)),
                changing: Channel::new(id),
                changed: Channel::new(id),
                thrown: OnceLock::new(),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    #[must_use]
    pub fn config(&self) -> &NotifyConfig {
        &self.inner.config
    }

    /// False while any suppression guard is held.
    #[must_use]
    pub fn are_change_notifications_enabled(&self) -> bool {
        self.inner.suppressed.load(Ordering::Acquire) == 0
    }

    /// True while any delay guard is held.
    #[must_use]
    pub fn are_change_notifications_delayed(&self) -> bool {
        self.inner.delayed.load(Ordering::Acquire) > 0
    }

    // ── Synchronous events ──────────────────────────────────────────────

    /// Register a handler for "changing" events (before the write).
    pub fn subscribe_changing(
        &self,
        handler: impl Fn(&PropertyChange) -> std::result::Result<(), HandlerError>
        + Send
        + Sync
        + 'static,
    ) -> HandlerGuard {
        self.inner.changing.handlers.register(handler)
    }

    /// Register a handler for "changed" events (after the write).
    pub fn subscribe_changed(
        &self,
        handler: impl Fn(&PropertyChange) -> std::result::Result<(), HandlerError>
        + Send
        + Sync
        + 'static,
    ) -> HandlerGuard {
        self.inner.changed.handlers.register(handler)
    }

    // ── Streams ─────────────────────────────────────────────────────────

    /// Stream of "changing" records. Built on first call.
    #[must_use]
    pub fn changing(&self) -> ChangeStream {
        self.inner.pipeline(Direction::Changing).stream().clone()
    }

    /// Stream of "changed" records. Built on first call.
    #[must_use]
    pub fn changed(&self) -> ChangeStream {
        self.inner.pipeline(Direction::Changed).stream().clone()
    }

    /// Failures raised by change handlers.
    ///
    /// Requesting this stream changes failure routing for the rest of the
    /// object's life: failures are no longer returned to the mutator.
    #[must_use]
    pub fn thrown_exceptions(&self) -> BoxSource<HandlerError> {
        Arc::new(self.inner.thrown.get_or_init(Subject::new).clone())
    }

    // ── Raising ─────────────────────────────────────────────────────────

    pub fn raise_property_changing(&self, property_name: &str) -> Result<()> {
        self.raise(Direction::Changing, property_name)
    }

    pub fn raise_property_changed(&self, property_name: &str) -> Result<()> {
        self.raise(Direction::Changed, property_name)
    }

    fn raise(&self, direction: Direction, property_name: &str) -> Result<()> {
        if !self.are_change_notifications_enabled() {
            return Ok(());
        }
        let channel = self.inner.channel(direction);
        let record = channel.records.get_or_insert(property_name);
        if self.inner.config.trace_notifications {
            tracing::trace!(
                message = "property.raise",
                object_id = self.inner.id.get(),
                direction = direction.as_str(),
                property = property_name
            );
        }

        let failures = channel.handlers.invoke(&record);
        self.route_failures(property_name, failures)?;

        if let Some(pipeline) = channel.pipeline.get() {
            pipeline.push(record);
        }
        Ok(())
    }

    fn route_failures(&self, property_name: &str, failures: Vec<HandlerError>) -> Result<()> {
        if failures.is_empty() {
            return Ok(());
        }
        let Some(thrown) = self.inner.thrown.get() else {
            let mut failures = failures.into_iter();
            let first = failures.next();
            for extra in failures {
                tracing::debug!(
                    message = "handler.failure.extra",
                    object_id = self.inner.id.get(),
                    property = property_name,
                    error = %extra
                );
            }
            return match first {
                Some(first) => Err(NotifyError::handler(property_name, first)),
                None => Ok(()),
            };
        };
        for failure in failures {
            tracing::warn!(
                message = "handler.failure",
                object_id = self.inner.id.get(),
                property = property_name,
                error = %failure
            );
            thrown.next(failure);
        }
        Ok(())
    }

    /// Write `new_value` into `field` with notifications, if it differs.
    ///
    /// Equal values return immediately with no notification of any kind.
    /// Otherwise raises "changing", writes, raises "changed". A handler
    /// failure returned from "changing" leaves the field untouched.
    pub fn raise_and_set_if_changed<T>(
        &self,
        field: &mut T,
        new_value: T,
        property_name: &str,
    ) -> Result<T>
    where
        T: PartialEq + Clone,
    {
        if *field == new_value {
            return Ok(new_value);
        }
        self.raise_property_changing(property_name)?;
        *field = new_value.clone();
        self.raise_property_changed(property_name)?;
        Ok(new_value)
    }

    // ── Scoped controls ─────────────────────────────────────────────────

    /// Buffer stream delivery until the returned guard (and every other
    /// delay guard) is dropped.
    pub fn delay_change_notifications(&self) -> DelayGuard {
        if self.inner.delayed.fetch_add(1, Ordering::AcqRel) == 0 {
            tracing::debug!(message = "delay.begin", object_id = self.inner.id.get());
            self.inner.signal_boundaries();
        }
        DelayGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Silence all notifications until the returned guard (and every other
    /// suppression guard) is dropped.
    pub fn suppress_change_notifications(&self) -> SuppressGuard {
        self.inner.suppressed.fetch_add(1, Ordering::AcqRel);
        SuppressGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    // ── Derived properties ──────────────────────────────────────────────

    /// Start building a derived property owned by this object.
    pub fn derive<T, S>(&self, source: S, property_name: impl Into<String>) -> DerivedPropertyBuilder<T>
    where
        S: Source<T> + 'static,
        T: 'static,
    {
        DerivedPropertyBuilder::new(source, self, property_name)
    }

    pub(crate) fn downgrade(&self) -> WeakObject {
        WeakObject(Arc::downgrade(&self.inner))
    }
}

/// Non-owning handle, used by derived properties so their upstream
/// subscriptions never keep the owner alive.
#[derive(Clone)]
pub(crate) struct WeakObject(std::sync::Weak<ObjectInner>);

impl WeakObject {
    pub(crate) fn upgrade(&self) -> Option<NotifyingObject> {
        self.0.upgrade().map(|inner| NotifyingObject { inner })
    }
}

/// Held while stream delivery is delayed. Dropping it releases the delay.
#[must_use = "the delay ends as soon as the guard is dropped"]
pub struct DelayGuard {
    inner: Arc<ObjectInner>,
}

impl DelayGuard {
    /// Release the delay now.
    pub fn release(self) {}
}

impl Drop for DelayGuard {
    fn drop(&mut self) {
        if self.inner.delayed.fetch_sub(1, Ordering::AcqRel) == 1 {
            tracing::debug!(message = "delay.end", object_id = self.inner.id.get());
            self.inner.signal_boundaries();
        }
    }
}

impl std::fmt::Debug for DelayGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayGuard")
            .field("object_id", &self.inner.id)
            .finish()
    }
}

/// Held while notifications are suppressed. Dropping it lifts the
/// suppression.
#[must_use = "suppression ends as soon as the guard is dropped"]
pub struct SuppressGuard {
    inner: Arc<ObjectInner>,
}

impl SuppressGuard {
    /// Lift the suppression now.
    pub fn release(self) {}
}

impl Drop for SuppressGuard {
    fn drop(&mut self) {
        self.inner.suppressed.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for SuppressGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuppressGuard")
            .field("object_id", &self.inner.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MessageError;
    use crate::stream::{FnObserver, SourceExt, Subscription};
    use std::sync::Mutex;
    use tracing_test::traced_test;

    type Log = Arc<Mutex<Vec<String>>>;

    fn log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn record_events(obj: &NotifyingObject, log: &Log) -> (HandlerGuard, HandlerGuard) {
        let a = Arc::clone(log);
        let b = Arc::clone(log);
        (
            obj.subscribe_changing(move |r| {
                a.lock().unwrap().push(format!("changing:{}", r.property_name()));
                Ok(())
            }),
            obj.subscribe_changed(move |r| {
                b.lock().unwrap().push(format!("changed:{}", r.property_name()));
                Ok(())
            }),
        )
    }

    fn record_stream(stream: &ChangeStream, log: &Log) -> Subscription {
        let l = Arc::clone(log);
        stream.subscribe_fn(move |r: Arc<PropertyChange>| {
            l.lock().unwrap().push(r.property_name().to_string());
        })
    }

    #[test]
    fn set_if_changed_raises_changing_then_changed() {
        let obj = NotifyingObject::new();
        let events = log();
        let _guards = record_events(&obj, &events);

        let mut count = 0;
        assert_eq!(obj.raise_and_set_if_changed(&mut count, 5, "Count").unwrap(), 5);
        assert_eq!(count, 5);
        assert_eq!(*events.lock().unwrap(), vec!["changing:Count", "changed:Count"]);

        assert_eq!(obj.raise_and_set_if_changed(&mut count, 5, "Count").unwrap(), 5);
        assert_eq!(events.lock().unwrap().len(), 2);
    }

    #[test]
    fn records_carry_sender_and_are_memoized() {
        let obj = NotifyingObject::new();
        let seen: Arc<Mutex<Vec<Arc<PropertyChange>>>> = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let _sub = obj.changed().subscribe_fn(move |r| s.lock().unwrap().push(r));

        obj.raise_property_changed("Name").unwrap();
        obj.raise_property_changed("Name").unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].sender(), obj.id());
        assert!(Arc::ptr_eq(&seen[0], &seen[1]));
    }

    #[test]
    fn suppression_silences_everything_but_writes() {
        let obj = NotifyingObject::new();
        let events = log();
        let _guards = record_events(&obj, &events);
        let stream_log = log();
        let _sub = record_stream(&obj.changed(), &stream_log);

        let mut name = String::from("a");
        {
            let _quiet = obj.suppress_change_notifications();
            assert!(!obj.are_change_notifications_enabled());
            obj.raise_and_set_if_changed(&mut name, "b".to_string(), "Name")
                .unwrap();
        }
        assert_eq!(name, "b");
        assert!(events.lock().unwrap().is_empty());
        assert!(stream_log.lock().unwrap().is_empty());
        assert!(obj.are_change_notifications_enabled());
    }

    #[test]
    fn suppression_nests() {
        let obj = NotifyingObject::new();
        let outer = obj.suppress_change_notifications();
        let inner = obj.suppress_change_notifications();
        inner.release();
        assert!(!obj.are_change_notifications_enabled());
        outer.release();
        assert!(obj.are_change_notifications_enabled());
    }

    #[test]
    fn delay_buffers_stream_but_not_handlers() {
        let obj = NotifyingObject::new();
        let events = log();
        let _guards = record_events(&obj, &events);
        let stream_log = log();
        let _sub = record_stream(&obj.changed(), &stream_log);

        let mut x = 0;
        let delay = obj.delay_change_notifications();
        for v in 1..=4 {
            obj.raise_and_set_if_changed(&mut x, v, "X").unwrap();
        }
        assert_eq!(events.lock().unwrap().len(), 8);
        assert!(stream_log.lock().unwrap().is_empty());

        drop(delay);
        assert_eq!(*stream_log.lock().unwrap(), vec!["X"]);
    }

    #[test]
    fn nested_delay_flushes_on_outermost_release() {
        let obj = NotifyingObject::new();
        let stream_log = log();
        let _sub = record_stream(&obj.changed(), &stream_log);

        let outer = obj.delay_change_notifications();
        let inner = obj.delay_change_notifications();
        obj.raise_property_changed("A").unwrap();
        obj.raise_property_changed("B").unwrap();
        obj.raise_property_changed("A").unwrap();
        inner.release();
        assert!(obj.are_change_notifications_delayed());
        assert!(stream_log.lock().unwrap().is_empty());
        outer.release();
        assert_eq!(*stream_log.lock().unwrap(), vec!["B", "A"]);
    }

    #[test]
    fn unobserved_pipelines_are_never_built() {
        let obj = NotifyingObject::new();
        obj.raise_property_changed("A").unwrap();
        assert!(obj.inner.changed.pipeline.get().is_none());
        assert!(obj.inner.changing.pipeline.get().is_none());
        let _ = obj.changing();
        assert!(obj.inner.changing.pipeline.get().is_some());
        assert!(obj.inner.changed.pipeline.get().is_none());
    }

    #[test]
    fn handler_failure_is_returned_without_failure_stream() {
        let obj = NotifyingObject::new();
        let _g = obj.subscribe_changing(|_| Err(MessageError::shared("nope")));
        let stream_log = log();
        let _sub = record_stream(&obj.changing(), &stream_log);

        let mut v = 1;
        let err = obj.raise_and_set_if_changed(&mut v, 2, "V").unwrap_err();
        assert!(matches!(err, NotifyError::Handler { ref property, .. } if property == "V"));
        assert_eq!(v, 1);
        assert!(stream_log.lock().unwrap().is_empty());
    }

    #[test]
    fn handler_failure_is_routed_once_failure_stream_exists() {
        let obj = NotifyingObject::new();
        let _g = obj.subscribe_changed(|_| Err(MessageError::shared("boom")));
        let errors = log();
        let e = Arc::clone(&errors);
        let _errs = obj
            .thrown_exceptions()
            .subscribe_fn(move |err: HandlerError| e.lock().unwrap().push(err.to_string()));

        let mut v = 1;
        assert_eq!(obj.raise_and_set_if_changed(&mut v, 2, "V").unwrap(), 2);
        assert_eq!(v, 2);
        assert_eq!(*errors.lock().unwrap(), vec!["boom"]);
    }

    #[test]
    #[traced_test]
    fn routed_failures_are_logged() {
        let obj = NotifyingObject::new();
        let _g = obj.subscribe_changed(|_| Err(MessageError::shared("disk full")));
        let _errs = obj.thrown_exceptions();
        obj.raise_property_changed("Path").unwrap();
        assert!(logs_contain("handler.failure"));
        assert!(logs_contain("disk full"));
    }

    #[test]
    #[traced_test]
    fn delay_transitions_are_logged() {
        let obj = NotifyingObject::new();
        let outer = obj.delay_change_notifications();
        let inner = obj.delay_change_notifications();
        drop(inner);
        assert!(logs_contain("delay.begin"));
        assert!(!logs_contain("delay.end"));
        drop(outer);
        assert!(logs_contain("delay.end"));
    }

    #[test]
    fn failure_stream_swallows_even_without_subscribers() {
        let obj = NotifyingObject::new();
        let _g = obj.subscribe_changed(|_| Err(MessageError::shared("boom")));
        drop(obj.thrown_exceptions());
        assert!(obj.raise_property_changed("V").is_ok());
    }

    #[test]
    fn streams_complete_when_object_dropped() {
        let obj = NotifyingObject::new();
        let done = Arc::new(Mutex::new(0));
        let d = Arc::clone(&done);
        let _sub = obj.changed().subscribe(Arc::new(
            FnObserver::new(|_: Arc<PropertyChange>| {})
                .with_completed(move || *d.lock().unwrap() += 1),
        ));
        drop(obj);
        assert_eq!(*done.lock().unwrap(), 1);
    }

    #[test]
    fn restartable_after_all_subscribers_leave() {
        let obj = NotifyingObject::new();
        let first = log();
        let sub = record_stream(&obj.changed(), &first);
        obj.raise_property_changed("A").unwrap();
        drop(sub);
        obj.raise_property_changed("B").unwrap();

        let second = log();
        let _sub = record_stream(&obj.changed(), &second);
        obj.raise_property_changed("C").unwrap();

        assert_eq!(*first.lock().unwrap(), vec!["A"]);
        assert_eq!(*second.lock().unwrap(), vec!["C"]);
        assert_eq!(obj.changed().connect_count(), 2);
    }
}
