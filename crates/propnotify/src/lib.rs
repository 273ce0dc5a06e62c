#![forbid(unsafe_code)]

//! Change notification for reactive view-model objects.
//!
//! Two components share one notification contract:
//!
//! - [`NotifyingObject`]: turns property writes into synchronous
//!   "changing"/"changed" events and into two subscribable [`ChangeStream`]s
//!   with batching, deduplication, delay and suppression.
//! - [`DerivedProperty`]: caches the latest value of an upstream
//!   [`Source`] and raises changes on its owner, with eager or on-first-read
//!   activation and an optional delivery [`Scheduler`].
//!
//! # Example
//!
//! ```
//! use propnotify::{NotifyingObject, PropertyChange, SourceExt, Subject};
//! use std::sync::{Arc, Mutex};
//!
//! struct Counter {
//!     notify: NotifyingObject,
//!     count: i32,
//! }
//!
//! let mut vm = Counter { notify: NotifyingObject::new(), count: 0 };
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! let _sub = vm.notify.changed().subscribe_fn(move |change: Arc<PropertyChange>| {
//!     sink.lock().unwrap().push(change.property_name().to_string());
//! });
//!
//! {
//!     let _batch = vm.notify.delay_change_notifications();
//!     for n in 1..=3 {
//!         vm.notify.raise_and_set_if_changed(&mut vm.count, n, "Count").unwrap();
//!     }
//! }
//! assert_eq!(*seen.lock().unwrap(), vec!["Count"]);
//!
//! let upstream = Subject::new();
//! let doubled = vm.notify.derive(upstream.clone().map(|n: i32| n * 2), "Doubled")
//!     .deferred(true)
//!     .build()
//!     .unwrap();
//! assert_eq!(upstream.subscriber_count(), 0);
//! assert_eq!(doubled.value(), 0);
//! upstream.next(21);
//! assert_eq!(doubled.value(), 42);
//! ```

pub mod config;
pub mod derived;
pub mod error;
pub mod object;
pub mod scheduler;
pub mod stream;

mod sync;

pub use config::NotifyConfig;
pub use derived::{DerivedProperty, DerivedPropertyBuilder};
pub use error::{HandlerError, MessageError, NotifyError, Result, handler_error};
pub use object::{
    ChangeStream, DelayGuard, HandlerGuard, NotifyingObject, ObjectId, PropertyChange,
    SuppressGuard, dedup,
};
pub use scheduler::{DispatchQueue, ImmediateScheduler, Scheduler};
pub use stream::{BoxSource, FnObserver, Observer, Source, SourceExt, Subject, Subscription};
