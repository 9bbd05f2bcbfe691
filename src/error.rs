//! Error taxonomy for the context, resolution and dispatch layers
//!
//! None of these errors ever reach the monitored host. They exist so that
//! backends and handlers can report *why* they degraded, and so the
//! degradation can be logged before it is turned into `None` or a no-op.

use thiserror::Error;

/// Failure while reading or writing a context storage backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage '{backend}' cannot provide a carrier right now")]
    Unavailable { backend: String },

    #[error("storage '{backend}' lock was poisoned")]
    Poisoned { backend: String },

    #[error("value stored under '{key}' has an unexpected type")]
    TypeMismatch { key: String },

    #[error("thread-local storage has already been destroyed on this thread")]
    ThreadLocalDestroyed,

    #[error("storage construction failed: {0}")]
    Construction(String),
}

/// Reason a backend factory was excluded during probing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    #[error("factory '{factory}' reported itself invalid")]
    Invalid { factory: String },

    #[error("factory '{factory}' failed to construct storage: {source}")]
    Construction {
        factory: String,
        #[source]
        source: StorageError,
    },

    #[error("factory '{factory}' panicked while probing: {message}")]
    Panicked { factory: String, message: String },
}

impl ProbeFailure {
    /// Name of the factory that was rejected
    pub fn factory(&self) -> &str {
        match self {
            Self::Invalid { factory }
            | Self::Construction { factory, .. }
            | Self::Panicked { factory, .. } => factory,
        }
    }
}

/// Failure raised by an instrumentation handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("handler '{handler}' failed: {message}")]
    Failed { handler: String, message: String },

    #[error("handler '{handler}' panicked: {message}")]
    Panicked { handler: String, message: String },
}

impl HandlerError {
    pub fn failed(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            handler: handler.into(),
            message: message.into(),
        }
    }
}

/// Render a caught panic payload as text for logging
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
