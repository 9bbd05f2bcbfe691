//! Rastro - transaction context propagation and instrumentation resolution
//!
//! The shared core an APM agent's method wrappers sit on:
//!
//! - [`context`]: where the ambient transaction handle lives (thread, async
//!   flow, request, operation) and which backend is chosen for a key
//! - [`resolve`]: a memoizing cache deciding which handler applies to a key
//! - [`trie`]: a prefix tree organising overlapping instrumentation patterns
//! - [`dispatch`]: the glue running handlers around instrumented calls
//!
//! Nothing in this crate surfaces an error or panic to the monitored host;
//! failures degrade to `None` or a no-op and are reported through `tracing`.

pub mod cli;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod resolve;
pub mod trie;
