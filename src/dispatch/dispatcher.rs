//! Entering and leaving instrumented calls
//!
//! On entry the dispatcher resolves the method's handler, reads the current
//! transaction from the [`AmbientContext`], and runs the handler's
//! `before_call`. The returned [`CallGuard`] runs the continuation when the
//! call finishes. Handler errors and panics are caught here: they are
//! counted against the handler, and once a handler reaches the failure limit
//! the method is pinned to the no-op handler. The instrumented call itself
//! always proceeds.

use super::handler::{CallOutcome, Continuation, Handler, TrackedHandler};
use super::map::HandlerMap;
use super::method::InstrumentedMethod;
use crate::config::CoreConfig;
use crate::context::{AmbientContext, TRANSACTION_KEY};
use crate::error::{panic_message, HandlerError};
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, trace, warn};

pub struct Dispatcher<Tx> {
    handlers: HandlerMap<Tx>,
    context: AmbientContext<Tx>,
    exception_limit: u32,
}

impl<Tx> Dispatcher<Tx>
where
    Tx: Clone + Send + Sync + 'static,
{
    pub fn new(
        handlers: HandlerMap<Tx>,
        context: AmbientContext<Tx>,
        exception_limit: u32,
    ) -> Self {
        Dispatcher {
            handlers,
            context,
            exception_limit: exception_limit.max(1),
        }
    }

    /// Dispatcher for the transaction key using the configured storages and limit
    pub fn from_config(
        config: &CoreConfig,
        handlers: impl IntoIterator<Item = Arc<dyn Handler<Tx>>>,
        default: Option<Arc<dyn Handler<Tx>>>,
    ) -> Self {
        let context = AmbientContext::new(TRANSACTION_KEY, &config.storage_factories::<Tx>());
        Dispatcher::new(
            HandlerMap::new(handlers, default),
            context,
            config.dispatch.handler_exception_limit,
        )
    }

    pub fn handlers(&self) -> &HandlerMap<Tx> {
        &self.handlers
    }

    pub fn context(&self) -> &AmbientContext<Tx> {
        &self.context
    }

    pub fn exception_limit(&self) -> u32 {
        self.exception_limit
    }

    /// Run the method's handler ahead of the call
    pub fn before_call<'a>(&'a self, method: &'a InstrumentedMethod) -> CallGuard<'a, Tx> {
        let tracked = self.handlers.get(method);
        let transaction = self.context.current();

        if tracked.handler().requires_transaction() && transaction.is_none() {
            trace!(method = %method, handler = %tracked.name(), "no transaction, skipping handler");
            return CallGuard::inert(self, method);
        }

        let handler = tracked.handler();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            handler.before_call(method, transaction.as_ref())
        }))
        .unwrap_or_else(|payload| {
            Err(HandlerError::Panicked {
                handler: handler.name().to_string(),
                message: panic_message(payload.as_ref()),
            })
        });

        match result {
            Ok(continuation) => CallGuard {
                dispatcher: self,
                method,
                tracked: Some(tracked),
                continuation: Some(continuation),
            },
            Err(err) => {
                self.handle_failure(method, &tracked, &err);
                CallGuard::inert(self, method)
            }
        }
    }

    /// Wrap `call` with the method's handler
    ///
    /// The call's result is returned untouched; the handler only observes it.
    pub fn invoke<R, E, F>(&self, method: &InstrumentedMethod, call: F) -> Result<R, E>
    where
        F: FnOnce() -> Result<R, E>,
        E: Display,
    {
        let guard = self.before_call(method);
        let result = call();
        let outcome = match &result {
            Ok(_) => CallOutcome::Returned,
            Err(err) => CallOutcome::Failed(err.to_string()),
        };
        guard.finish(&outcome);
        result
    }

    fn handle_failure(
        &self,
        method: &InstrumentedMethod,
        tracked: &TrackedHandler<Tx>,
        err: &HandlerError,
    ) {
        if tracked.is_noop() {
            return;
        }
        let failures = tracked.notice_failure();
        warn!(
            method = %method,
            handler = %tracked.name(),
            failures,
            error = %err,
            "handler failed"
        );

        if failures >= self.exception_limit {
            error!(
                method = %method,
                handler = %tracked.name(),
                limit = self.exception_limit,
                "handler reached its failure limit and is disabled for this method"
            );
            self.handlers.disable(method);
        }
    }
}

impl<Tx> std::fmt::Debug for Dispatcher<Tx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.handlers)
            .field("context", &self.context)
            .field("exception_limit", &self.exception_limit)
            .finish()
    }
}

/// An in-flight instrumented call
///
/// Dropping the guard without [`finish`](CallGuard::finish) discards the
/// continuation.
#[must_use = "call finish() when the instrumented call returns"]
pub struct CallGuard<'a, Tx> {
    dispatcher: &'a Dispatcher<Tx>,
    method: &'a InstrumentedMethod,
    tracked: Option<Arc<TrackedHandler<Tx>>>,
    continuation: Option<Continuation>,
}

impl<'a, Tx> CallGuard<'a, Tx>
where
    Tx: Clone + Send + Sync + 'static,
{
    fn inert(dispatcher: &'a Dispatcher<Tx>, method: &'a InstrumentedMethod) -> Self {
        CallGuard {
            dispatcher,
            method,
            tracked: None,
            continuation: None,
        }
    }

    /// Whether a handler continuation is pending
    pub fn is_active(&self) -> bool {
        self.continuation.is_some()
    }

    /// Name of the handler whose continuation is pending
    pub fn handler_name(&self) -> Option<&str> {
        self.tracked.as_deref().map(TrackedHandler::name)
    }

    /// Run the continuation for a finished call
    pub fn finish(mut self, outcome: &CallOutcome) {
        let (Some(tracked), Some(continuation)) = (self.tracked.take(), self.continuation.take())
        else {
            return;
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| continuation(outcome)))
            .unwrap_or_else(|payload| {
                Err(HandlerError::Panicked {
                    handler: tracked.name().to_string(),
                    message: panic_message(payload.as_ref()),
                })
            });

        match result {
            Ok(()) => tracked.notice_success(),
            Err(err) => self.dispatcher.handle_failure(self.method, &tracked, &err),
        }
    }
}
