//! Identity of an instrumented method

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cache key for handler resolution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentedMethod {
    pub type_name: String,
    pub method_name: String,
    /// Argument type list, empty when the method is not overloaded
    #[serde(default)]
    pub signature: String,
    /// Handler the instrumentation point asked for by name, if any
    #[serde(default)]
    pub requested_handler: Option<String>,
    #[serde(default)]
    pub is_async: bool,
}

impl InstrumentedMethod {
    pub fn new(type_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        InstrumentedMethod {
            type_name: type_name.into(),
            method_name: method_name.into(),
            signature: String::new(),
            requested_handler: None,
            is_async: false,
        }
    }

    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    #[must_use]
    pub fn requesting(mut self, handler: impl Into<String>) -> Self {
        self.requested_handler = Some(handler.into());
        self
    }

    #[must_use]
    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    /// `Type.method`, the form pattern sets match against
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.type_name, self.method_name)
    }
}

impl fmt::Display for InstrumentedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({})", self.type_name, self.method_name, self.signature)
    }
}
