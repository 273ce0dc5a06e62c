#![forbid(unsafe_code)]

//! Runtime configuration for notifying objects.
//!
//! Defaults suit production use. [`NotifyConfig::from_env`] layers
//! environment overrides on top:
//!
//! | Variable                   | Field                       |
//! |----------------------------|-----------------------------|
//! | `PROPNOTIFY_TRACE`         | `trace_notifications`       |
//! | `PROPNOTIFY_DEFER_DERIVED` | `defer_derived_by_default`  |
//!
//! Boolean variables accept `1`/`true`/`yes`/`on` and `0`/`false`/`no`/`off`
//! (case-insensitive). Unparseable values are ignored.

use std::env;

pub const ENV_TRACE: &str = "PROPNOTIFY_TRACE";
pub const ENV_DEFER_DERIVED: &str = "PROPNOTIFY_DEFER_DERIVED";

/// Configuration for a [`NotifyingObject`](crate::NotifyingObject).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyConfig {
    /// Emit a `TRACE` event for every raised record.
    /// Default: false.
    pub trace_notifications: bool,

    /// Activation mode used by derived-property builders that do not call
    /// [`deferred`](crate::DerivedPropertyBuilder::deferred) explicitly.
    /// Default: false (eager).
    pub defer_derived_by_default: bool,
}

impl NotifyConfig {
    /// Defaults overridden by `PROPNOTIFY_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(val) = lookup(ENV_TRACE).as_deref().and_then(parse_bool) {
            self.trace_notifications = val;
        }
        if let Some(val) = lookup(ENV_DEFER_DERIVED).as_deref().and_then(parse_bool) {
            self.defer_derived_by_default = val;
        }
        self
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
