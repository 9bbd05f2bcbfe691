//! Handlers limited to methods named by a pattern set

use super::handler::{Continuation, Handler};
use super::method::InstrumentedMethod;
use crate::error::HandlerError;
use crate::trie::PatternSet;
use std::sync::Arc;

/// Restricts `inner` to methods whose `Type.method` name a pattern covers
pub struct PatternScopedHandler<Tx> {
    inner: Arc<dyn Handler<Tx>>,
    patterns: Arc<PatternSet>,
    name: String,
}

impl<Tx> PatternScopedHandler<Tx> {
    pub fn new(inner: Arc<dyn Handler<Tx>>, patterns: Arc<PatternSet>) -> Self {
        let name = format!("{}[scoped]", inner.name());
        PatternScopedHandler {
            inner,
            patterns,
            name,
        }
    }

    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }
}

impl<Tx> Handler<Tx> for PatternScopedHandler<Tx> {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_handle(&self, method: &InstrumentedMethod) -> bool {
        self.patterns.is_match(&method.qualified_name()) && self.inner.can_handle(method)
    }

    fn requires_transaction(&self) -> bool {
        self.inner.requires_transaction()
    }

    fn before_call(
        &self,
        method: &InstrumentedMethod,
        transaction: Option<&Tx>,
    ) -> Result<Continuation, HandlerError> {
        self.inner.before_call(method, transaction)
    }
}
