//! Instrumentation handlers
//!
//! A handler runs before an instrumented call and returns a continuation
//! that runs after it. Handlers are supplied by the embedding agent; this
//! module only defines the contract, the no-op handler, and the failure
//! counter wrapped around every resolved handler.

use super::method::InstrumentedMethod;
use crate::error::HandlerError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// How the instrumented call ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Returned,
    Failed(String),
}

impl CallOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, CallOutcome::Failed(_))
    }
}

/// Work to run once the instrumented call has finished
pub type Continuation = Box<dyn FnOnce(&CallOutcome) -> Result<(), HandlerError> + Send>;

/// Continuation that does nothing
pub fn noop_continuation() -> Continuation {
    Box::new(|_| Ok(()))
}

pub trait Handler<Tx>: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this handler applies to `method`; used as the resolution predicate
    fn can_handle(&self, method: &InstrumentedMethod) -> bool;

    /// Handlers that require a transaction are skipped when none is current
    fn requires_transaction(&self) -> bool {
        true
    }

    fn before_call(
        &self,
        method: &InstrumentedMethod,
        transaction: Option<&Tx>,
    ) -> Result<Continuation, HandlerError>;
}

/// Handles everything by doing nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

pub const NOOP_HANDLER_NAME: &str = "noop";

impl<Tx> Handler<Tx> for NoOpHandler {
    fn name(&self) -> &str {
        NOOP_HANDLER_NAME
    }

    fn can_handle(&self, _method: &InstrumentedMethod) -> bool {
        true
    }

    fn requires_transaction(&self) -> bool {
        false
    }

    fn before_call(
        &self,
        _method: &InstrumentedMethod,
        _transaction: Option<&Tx>,
    ) -> Result<Continuation, HandlerError> {
        Ok(noop_continuation())
    }
}

/// A handler plus its run of consecutive failures
pub struct TrackedHandler<Tx> {
    handler: Arc<dyn Handler<Tx>>,
    consecutive_failures: AtomicU32,
}

impl<Tx> TrackedHandler<Tx> {
    pub fn new(handler: Arc<dyn Handler<Tx>>) -> Self {
        TrackedHandler {
            handler,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn handler(&self) -> &dyn Handler<Tx> {
        self.handler.as_ref()
    }

    pub fn name(&self) -> &str {
        self.handler.name()
    }

    pub fn is_noop(&self) -> bool {
        self.handler.name() == NOOP_HANDLER_NAME
    }

    pub fn notice_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Record a failure, returning the updated run length
    pub fn notice_failure(&self) -> u32 {
        self.consecutive_failures
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

impl<Tx> std::fmt::Debug for TrackedHandler<Tx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedHandler")
            .field("handler", &self.name())
            .field("consecutive_failures", &self.consecutive_failures())
            .finish()
    }
}
