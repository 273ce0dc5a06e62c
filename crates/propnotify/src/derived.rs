#![forbid(unsafe_code)]

//! Derived properties: an upstream stream presented as a polled, notifying value.
//!
//! # Design
//!
//! A [`DerivedProperty<T>`] caches the latest value of an upstream
//! [`Source<T>`] and raises "changing"/"changed" on its owning
//! [`NotifyingObject`] each time that value moves. The upstream is composed
//! once, at construction:
//!
//! ```text
//! source ──► start_with(seed) ──► [observe_on] ──► gate (distinct + changing/store/changed)
//! ```
//!
//! The gate is the duplicate filter and the cache write in one critical
//! section, so producers on different threads cannot reorder a compare and
//! its store. A value pushed from inside a handler on the delivering thread
//! is queued and delivered after the current one instead of deadlocking.
//!
//! # Activation
//!
//! Eager properties subscribe during construction. Deferred properties
//! subscribe on the first [`value`](DerivedProperty::value) read; until then
//! the upstream sees no subscriber at all. Activation is a single
//! compare-and-swap, so concurrent first reads subscribe exactly once. Losing
//! readers never wait for the winner; they return whatever is cached.
//!
//! # Failure Modes
//!
//! - **Upstream error**: pushed to
//!   [`thrown_exceptions`](DerivedProperty::thrown_exceptions), never raised
//!   as a change and never returned from `value()`. The upstream is not
//!   resubscribed; the cached value stays where it was.
//! - **Owner dropped**: values are still cached, but nothing is raised.
//! - **Handler failure on the owner**: logged, and forwarded to this
//!   property's failure stream if it was ever requested.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread::{self, ThreadId};

use arc_swap::ArcSwap;

use crate::error::{HandlerError, NotifyError, Result};
use crate::object::{NotifyingObject, WeakObject};
use crate::scheduler::Scheduler;
use crate::stream::{BoxSource, Observer, Source, SourceExt, Subject, Subscription};
use crate::sync::lock;

const IDLE: u8 = 0;
const ACTIVATING: u8 = 1;
const ACTIVE: u8 = 2;

struct DerivedInner<T> {
    property_name: Arc<str>,
    owner: Option<WeakObject>,
    value: ArcSwap<T>,
    source: Option<BoxSource<T>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    activation: AtomicU8,
    disposed: AtomicBool,
    subscription: Mutex<Option<Subscription>>,
    thrown: OnceLock<Subject<HandlerError>>,
    /// Last value let through the gate; held for a whole delivery.
    delivered: Mutex<Option<T>>,
    delivering_on: Mutex<Option<ThreadId>>,
    reentrant: Mutex<VecDeque<T>>,
}

/// Clears the delivering thread on every exit path.
struct DeliveringOn<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for DeliveringOn<'_> {
    fn drop(&mut self) {
        *lock(self.0) = None;
    }
}

impl<T> DerivedInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn activate(self: &Arc<Self>) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        if self
            .activation
            .compare_exchange(IDLE, ACTIVATING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let Some(source) = &self.source else {
            self.activation.store(ACTIVE, Ordering::Release);
            return;
        };
        tracing::debug!(
            message = "derived.activate",
            property = &*self.property_name,
            scheduled = self.scheduler.is_some()
        );

        let observer: Arc<dyn Observer<T>> = Arc::new(DeliveryObserver {
            inner: Arc::downgrade(self),
        });
        let subscription = match &self.scheduler {
            Some(scheduler) => Arc::clone(source)
                .observe_on(Arc::clone(scheduler))
                .subscribe(observer),
            None => source.subscribe(observer),
        };
        self.activation.store(ACTIVE, Ordering::Release);

        let mut slot = lock(&self.subscription);
        if self.disposed.load(Ordering::Acquire) {
            drop(slot);
            subscription.unsubscribe();
        } else {
            *slot = Some(subscription);
        }
    }

    fn deliver(&self, value: T) {
        let me = thread::current().id();
        if *lock(&self.delivering_on) == Some(me) {
            lock(&self.reentrant).push_back(value);
            return;
        }
        let mut delivered = lock(&self.delivered);
        *lock(&self.delivering_on) = Some(me);
        let _delivering = DeliveringOn(&self.delivering_on);

        let mut next = Some(value);
        while let Some(value) = next {
            if delivered.as_ref() != Some(&value) {
                *delivered = Some(value.clone());
                self.publish(value);
            }
            next = lock(&self.reentrant).pop_front();
        }
    }

    fn publish(&self, value: T) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let owner = self.owner.as_ref().and_then(WeakObject::upgrade);
        if let Some(owner) = &owner
            && let Err(err) = owner.raise_property_changing(&self.property_name)
        {
            self.report_handler_failure(err);
        }
        self.value.store(Arc::new(value));
        if let Some(owner) = &owner
            && let Err(err) = owner.raise_property_changed(&self.property_name)
        {
            self.report_handler_failure(err);
        }
    }
}

impl<T> DerivedInner<T> {
    fn thrown(&self) -> &Subject<HandlerError> {
        self.thrown.get_or_init(Subject::new)
    }

    fn report_handler_failure(&self, err: NotifyError) {
        tracing::warn!(
            message = "derived.handler_failure",
            property = &*self.property_name,
            error = %err
        );
        if let (Some(thrown), Some(source)) = (self.thrown.get(), err.inner()) {
            thrown.next(Arc::clone(source));
        }
    }

    fn fail(&self, error: HandlerError) {
        tracing::warn!(
            message = "derived.upstream_error",
            property = &*self.property_name,
            error = %error
        );
        self.thrown().next(error);
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let subscription = lock(&self.subscription).take();
        drop(subscription);
        tracing::debug!(message = "derived.dispose", property = &*self.property_name);
    }
}

impl<T> Drop for DerivedInner<T> {
    fn drop(&mut self) {
        if let Some(thrown) = self.thrown.get() {
            thrown.complete();
        }
    }
}

struct DeliveryObserver<T> {
    inner: Weak<DerivedInner<T>>,
}

impl<T> Observer<T> for DeliveryObserver<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn on_next(&self, value: T) {
        if let Some(inner) = self.inner.upgrade() {
            inner.deliver(value);
        }
    }

    fn on_error(&self, error: HandlerError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.fail(error);
        }
    }

    fn on_completed(&self) {
        if let Some(inner) = self.inner.upgrade() {
            tracing::debug!(message = "derived.upstream_completed", property = &*inner.property_name);
        }
    }
}

/// A cached, change-notifying view of an upstream stream.
///
/// Cloning yields another handle to the same cache. The upstream
/// subscription is released by [`dispose`](Self::dispose) or when the last
/// handle is dropped.
pub struct DerivedProperty<T> {
    inner: Arc<DerivedInner<T>>,
}

impl<T> Clone for DerivedProperty<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for DerivedProperty<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedProperty")
            .field("property_name", &self.inner.property_name)
            .field("value", &self.inner.value.load_full())
            .field("activation", &self.inner.activation.load(Ordering::Relaxed))
            .field("disposed", &self.inner.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T> DerivedProperty<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Derive `property_name` on `owner` from `source`.
    ///
    /// `initial_value` (or `T::default()`) is reported until the upstream
    /// produces something. With `deferred`, nothing subscribes to `source`
    /// until the first [`value`](Self::value) read. With a `scheduler`, every
    /// upstream value is redelivered through it before being cached.
    ///
    /// # Errors
    ///
    /// [`NotifyError::MissingArgument`] if `property_name` is empty.
    pub fn new<S>(
        source: S,
        owner: &NotifyingObject,
        property_name: impl Into<String>,
        initial_value: Option<T>,
        deferred: bool,
        scheduler: Option<Arc<dyn Scheduler>>,
    ) -> Result<Self>
    where
        S: Source<T> + 'static,
        T: Default,
    {
        let property_name: String = property_name.into();
        if property_name.is_empty() {
            return Err(NotifyError::MissingArgument {
                argument: "property_name",
            });
        }
        let seed = initial_value.unwrap_or_default();
        let composed = source.start_with(seed.clone()).boxed();

        let property = Self {
            inner: Arc::new(DerivedInner {
                property_name: Arc::from(property_name),
                owner: Some(owner.downgrade()),
                value: ArcSwap::from_pointee(seed),
                source: Some(composed),
                scheduler,
                activation: AtomicU8::new(IDLE),
                disposed: AtomicBool::new(false),
                subscription: Mutex::new(None),
                thrown: OnceLock::new(),
                delivered: Mutex::new(None),
                delivering_on: Mutex::new(None),
                reentrant: Mutex::new(VecDeque::new()),
            }),
        };
        if !deferred {
            property.inner.activate();
        }
        Ok(property)
    }

    /// A property that always reports `value`. Already activated, never
    /// notifies.
    #[must_use]
    pub fn constant(value: T) -> Self {
        Self {
            inner: Arc::new(DerivedInner {
                property_name: Arc::from(""),
                owner: None,
                value: ArcSwap::from_pointee(value),
                source: None,
                scheduler: None,
                activation: AtomicU8::new(ACTIVE),
                disposed: AtomicBool::new(false),
                subscription: Mutex::new(None),
                thrown: OnceLock::new(),
                delivered: Mutex::new(None),
                delivering_on: Mutex::new(None),
                reentrant: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// The cached value, activating the property on first call.
    #[must_use]
    pub fn value(&self) -> T {
        self.inner.activate();
        T::clone(&self.inner.value.load())
    }

    /// Borrow the cached value, activating the property on first call.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.activate();
        f(&self.inner.value.load())
    }
}

impl<T> DerivedProperty<T> {
    #[must_use]
    pub fn property_name(&self) -> &str {
        &self.inner.property_name
    }

    /// True once activation has begun, whether or not a value has arrived.
    #[must_use]
    pub fn is_activated(&self) -> bool {
        self.inner.activation.load(Ordering::Acquire) != IDLE
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Upstream failures (and handler failures raised while delivering).
    #[must_use]
    pub fn thrown_exceptions(&self) -> BoxSource<HandlerError> {
        Arc::new(self.inner.thrown().clone())
    }

    /// Release the upstream subscription. Idempotent. The cached value stays
    /// readable; nothing is raised afterwards.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

/// Builder for [`DerivedProperty`], obtained from
/// [`NotifyingObject::derive`].
pub struct DerivedPropertyBuilder<T> {
    source: BoxSource<T>,
    owner: NotifyingObject,
    property_name: String,
    initial_value: Option<T>,
    deferred: Option<bool>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl<T: 'static> DerivedPropertyBuilder<T> {
    pub(crate) fn new<S>(source: S, owner: &NotifyingObject, property_name: impl Into<String>) -> Self
    where
        S: Source<T> + 'static,
    {
        Self {
            source: Arc::new(source),
            owner: owner.clone(),
            property_name: property_name.into(),
            initial_value: None,
            deferred: None,
            scheduler: None,
        }
    }

    /// Value reported before the upstream produces one.
    #[must_use]
    pub fn initial_value(mut self, value: T) -> Self {
        self.initial_value = Some(value);
        self
    }

    /// Subscribe on first read instead of at build time. Defaults to the
    /// owner's [`NotifyConfig::defer_derived_by_default`](crate::NotifyConfig).
    #[must_use]
    pub fn deferred(mut self, deferred: bool) -> Self {
        self.deferred = Some(deferred);
        self
    }

    /// Redeliver upstream values through `scheduler`.
    #[must_use]
    pub fn deliver_on(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

impl<T> DerivedPropertyBuilder<T>
where
    T: Clone + PartialEq + Default + Send + Sync + 'static,
{
    /// # Errors
    ///
    /// [`NotifyError::MissingArgument`] if the property name is empty.
    pub fn build(self) -> Result<DerivedProperty<T>> {
        let deferred = self
            .deferred
            .unwrap_or(self.owner.config().defer_derived_by_default);
        DerivedProperty::new(
            self.source,
            &self.owner,
            self.property_name,
            self.initial_value,
            deferred,
            self.scheduler,
        )
    }
}
