//! Backend variant contract
//!
//! A [`ContextStorage`] holds one value under one key for "the currently
//! executing logical flow", where each variant defines what that means.
//! A [`ContextStorageFactory`] describes whether a variant can exist at all in
//! this host and constructs it for a key.

use crate::error::StorageError;

/// Priority of the thread-affinity storage (the floor every host supports)
pub const THREAD_LOCAL_PRIORITY: i32 = 0;

/// Priority of the asynchronous-flow storage
pub const ASYNC_FLOW_PRIORITY: i32 = 2;

/// Priority of the operation-scoped (RPC call) storage
pub const OPERATION_PRIORITY: i32 = 5;

/// Priority of the request-scoped (inbound network request) storage
pub const REQUEST_PRIORITY: i32 = 10;

/// One concrete mechanism for holding a value for the current logical flow
pub trait ContextStorage<T>: Send + Sync {
    /// Human-readable backend name used in logs and probe reports
    fn name(&self) -> &str;

    /// Higher wins when multiple variants are usable at once
    fn priority(&self) -> i32;

    /// Whether this backend has a carrier right now.
    ///
    /// Conditionally available variants (request, operation) re-evaluate this
    /// on every access.
    fn can_provide(&self) -> bool;

    fn get(&self) -> Result<Option<T>, StorageError>;

    fn set(&self, value: T) -> Result<(), StorageError>;

    fn clear(&self) -> Result<(), StorageError>;
}

/// Constructs a backend variant for a storage key
pub trait ContextStorageFactory<T>: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the produced storage follows asynchronous continuations
    fn is_async(&self) -> bool {
        false
    }

    /// Whether the mechanism exists in this host at all
    fn is_valid(&self) -> bool;

    fn create(&self, key: &str) -> Result<Box<dyn ContextStorage<T>>, StorageError>;
}

impl<T> std::fmt::Debug for dyn ContextStorage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStorage")
            .field("name", &self.name())
            .field("priority", &self.priority())
            .finish()
    }
}
