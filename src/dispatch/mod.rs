//! Instrumented call dispatch
//!
//! Ties the resolution cache and the ambient context together: resolve the
//! handler for a method, read the current transaction, run the handler
//! around the call, and keep a misbehaving handler from ever reaching the
//! host.

pub mod dispatcher;
pub mod handler;
pub mod map;
pub mod method;
pub mod scoped;

pub use dispatcher::{CallGuard, Dispatcher};
pub use handler::{
    noop_continuation, CallOutcome, Continuation, Handler, NoOpHandler, TrackedHandler,
    NOOP_HANDLER_NAME,
};
pub use map::HandlerMap;
pub use method::InstrumentedMethod;
pub use scoped::PatternScopedHandler;
