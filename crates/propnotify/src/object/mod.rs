#![forbid(unsafe_code)]

//! Notifying objects.
//!
//! - [`NotifyingObject`]: raises "changing"/"changed" events and exposes them
//!   as deduplicating, delay-aware [`ChangeStream`]s.
//! - [`PropertyChange`]: the immutable `{sender, property_name}` record.
//! - [`HandlerGuard`], [`DelayGuard`], [`SuppressGuard`]: RAII handles.
//!
//! # Invariants
//!
//! 1. Writing a value equal to the current one raises nothing.
//! 2. Each distinct write raises exactly one "changing" then one "changed".
//! 3. While suppressed, nothing is raised; the write still happens.
//! 4. While delayed, handlers run immediately and each stream delivers at
//!    most one record per property when the delay ends.
//! 5. A direction whose stream was never requested costs only its handlers.

mod handlers;
mod notifying;
mod pipeline;
mod record;

pub use handlers::HandlerGuard;
pub use notifying::{DelayGuard, NotifyingObject, SuppressGuard};
pub use pipeline::{ChangeStream, dedup};
pub use record::{ObjectId, PropertyChange};

pub(crate) use notifying::WeakObject;
