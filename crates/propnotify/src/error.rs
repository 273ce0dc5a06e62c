#![forbid(unsafe_code)]

//! Error types shared by the notification core and derived properties.

use std::sync::Arc;

use thiserror::Error;

/// A failure raised by a change handler or an upstream producer.
///
/// Shared (`Arc`) so a single failure can be fanned out to every subscriber
/// of a failure stream.
pub type HandlerError = Arc<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, NotifyError>;

#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    /// A required constructor argument was empty.
    #[error("missing required argument: {argument}")]
    MissingArgument { argument: &'static str },

    /// A synchronous change handler failed and no failure stream was
    /// observing the object.
    #[error("change handler for `{property}` failed: {source}")]
    Handler {
        property: String,
        #[source]
        source: HandlerError,
    },
}

impl NotifyError {
    /// Build a handler failure for `property`.
    #[must_use]
    pub fn handler(property: impl Into<String>, source: HandlerError) -> Self {
        Self::Handler {
            property: property.into(),
            source,
        }
    }

    /// The underlying handler failure, if any.
    #[must_use]
    pub fn inner(&self) -> Option<&HandlerError> {
        match self {
            Self::Handler { source, .. } => Some(source),
            Self::MissingArgument { .. } => None,
        }
    }
}

/// Convenience for turning any error into a [`HandlerError`].
pub fn handler_error<E>(err: E) -> HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    Arc::new(err)
}

/// A plain-message failure, for handlers that have no richer error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct MessageError(pub String);

impl MessageError {
    #[must_use]
    pub fn shared(message: impl Into<String>) -> HandlerError {
        Arc::new(Self(message.into()))
    }
}
