//! Where ambient transaction state lives
//!
//! Five backend variants implement [`ContextStorage`]:
//!
//! | Variant | Visible to | Priority |
//! |---|---|---|
//! | [`ThreadLocalStorage`] | the writing thread | 0 |
//! | [`AsyncFlowStorage`] | the attached logical flow and its continuations | 2 |
//! | [`OperationStorage`] | the live RPC operation | 5 |
//! | [`RequestStorage`] | the live inbound request | 10 |
//! | [`BoundarySafeStorage`] | whatever it decorates | inherited |
//!
//! [`BackendSelector`] picks one of them per key; [`AmbientContext`] layers
//! them into the lookup order used by the dispatch path.

pub mod ambient;
pub mod boundary;
pub mod carrier;
pub mod flow;
pub mod selector;
pub mod storage;
pub mod thread_local;

pub use ambient::AmbientContext;
pub use boundary::{BoundarySafe, BoundarySafeFactory, BoundarySafeStorage};
pub use carrier::{
    Carrier, OperationContext, OperationStorage, OperationStorageFactory, RequestContext,
    RequestStorage, RequestStorageFactory,
};
pub use flow::{
    spawn_thread, AsyncFlowStorage, AsyncFlowStorageFactory, FlowContext, FlowFutureExt, FlowGuard,
    WithFlow,
};
#[cfg(feature = "tokio")]
pub use flow::{spawn, spawn_blocking};
pub use selector::{probe, ActiveBackend, BackendSelector, ProbeOutcome};
pub use storage::{ContextStorage, ContextStorageFactory};
pub use thread_local::{ThreadLocalStorage, ThreadLocalStorageFactory};

/// Storage key for the current transaction handle
pub const TRANSACTION_KEY: &str = "rastro.transaction";
