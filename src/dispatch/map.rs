//! Which handler serves a method
//!
//! Registered handlers are tried in registration order through a
//! [`LazyMap`], so each method is matched at most once. The default handler
//! and then the no-op handler close the candidate list: a method no
//! registered handler claims resolves to the default when it can handle it,
//! to the no-op otherwise, and that answer is cached like any other.

use super::handler::{Handler, NoOpHandler, TrackedHandler};
use super::method::InstrumentedMethod;
use crate::resolve::LazyMap;
use std::sync::Arc;
use tracing::debug;

pub struct HandlerMap<Tx> {
    resolved: LazyMap<InstrumentedMethod, Arc<TrackedHandler<Tx>>>,
    registered: usize,
    default: Option<Arc<TrackedHandler<Tx>>>,
    noop: Arc<TrackedHandler<Tx>>,
}

impl<Tx: 'static> HandlerMap<Tx> {
    pub fn new(
        handlers: impl IntoIterator<Item = Arc<dyn Handler<Tx>>>,
        default: Option<Arc<dyn Handler<Tx>>>,
    ) -> Self {
        let mut chain: Vec<Arc<TrackedHandler<Tx>>> = handlers
            .into_iter()
            .map(|handler| Arc::new(TrackedHandler::new(handler)))
            .collect();
        let registered = chain.len();
        debug!(handlers = registered, has_default = default.is_some(), "handler map created");

        let default = default.map(|handler| Arc::new(TrackedHandler::new(handler)));
        let noop = Arc::new(TrackedHandler::new(Arc::new(NoOpHandler)));
        chain.extend(default.iter().cloned());
        chain.push(Arc::clone(&noop));

        let claims = |method: &InstrumentedMethod, candidate: &Arc<TrackedHandler<Tx>>| {
            candidate.handler().can_handle(method)
        };

        HandlerMap {
            resolved: LazyMap::new(chain, claims),
            registered,
            default,
            noop,
        }
    }

    /// The handler for `method`; never fails
    pub fn get(&self, method: &InstrumentedMethod) -> Arc<TrackedHandler<Tx>> {
        self.resolved.get(method).unwrap_or_else(|| Arc::clone(&self.noop))
    }

    /// Pin `method` to `handler`, replacing any cached resolution
    pub fn override_handler(&self, method: &InstrumentedMethod, handler: Arc<TrackedHandler<Tx>>) {
        self.resolved.override_value(method.clone(), handler);
    }

    /// Pin `method` to the no-op handler
    pub fn disable(&self, method: &InstrumentedMethod) {
        self.override_handler(method, Arc::clone(&self.noop));
    }

    pub fn noop(&self) -> Arc<TrackedHandler<Tx>> {
        Arc::clone(&self.noop)
    }

    /// Registered handler names in resolution order
    pub fn handler_names(&self) -> Vec<&str> {
        let registered = &self.resolved.candidates()[..self.registered];
        registered.iter().map(|tracked| tracked.name()).collect()
    }
}

impl<Tx> std::fmt::Debug for HandlerMap<Tx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerMap")
            .field("resolved", &self.resolved)
            .field("default", &self.default)
            .finish_non_exhaustive()
    }
}
