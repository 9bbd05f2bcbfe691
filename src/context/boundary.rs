//! Isolation-boundary-safe storage
//!
//! [`BoundarySafe`] boxes a value so that whatever holds it can be serialized
//! across a process or sandbox boundary even when the value itself is not
//! serializable. Crossing the boundary yields an empty wrapper: the payload is
//! not propagation-critical on the far side, only the ability to cross
//! without failing is.

use super::storage::{ContextStorage, ContextStorageFactory};
use crate::error::StorageError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Value that serializes as an opaque empty payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundarySafe<T> {
    value: Option<T>,
}

impl<T> BoundarySafe<T> {
    pub fn new(value: T) -> Self {
        BoundarySafe { value: Some(value) }
    }

    pub fn empty() -> Self {
        BoundarySafe { value: None }
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn into_inner(self) -> Option<T> {
        self.value
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    /// Serialize for crossing a boundary
    pub fn marshal(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Rebuild on the far side of a boundary; always empty
    pub fn unmarshal(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

impl<T> Default for BoundarySafe<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Serialize for BoundarySafe<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_unit()
    }
}

impl<'de, T> Deserialize<'de> for BoundarySafe<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde::de::IgnoredAny::deserialize(deserializer)?;
        Ok(BoundarySafe::empty())
    }
}

/// Decorates a storage so it only ever holds [`BoundarySafe`] boxes
pub struct BoundarySafeStorage<T> {
    inner: Box<dyn ContextStorage<BoundarySafe<T>>>,
    name: String,
}

impl<T> BoundarySafeStorage<T> {
    pub fn new(inner: Box<dyn ContextStorage<BoundarySafe<T>>>) -> Self {
        let name = format!("boundary_safe({})", inner.name());
        BoundarySafeStorage { inner, name }
    }
}

impl<T> ContextStorage<T> for BoundarySafeStorage<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.inner.priority()
    }

    fn can_provide(&self) -> bool {
        self.inner.can_provide()
    }

    fn get(&self) -> Result<Option<T>, StorageError> {
        Ok(self.inner.get()?.and_then(BoundarySafe::into_inner))
    }

    fn set(&self, value: T) -> Result<(), StorageError> {
        self.inner.set(BoundarySafe::new(value))
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.inner.clear()
    }
}

/// Wraps another factory so its storage holds [`BoundarySafe`] boxes
pub struct BoundarySafeFactory<F> {
    inner: F,
    name: String,
}

impl<F> BoundarySafeFactory<F> {
    pub fn new<T>(inner: F) -> Self
    where
        F: ContextStorageFactory<BoundarySafe<T>>,
    {
        let name = format!("boundary_safe({})", inner.name());
        BoundarySafeFactory { inner, name }
    }
}

impl<T, F> ContextStorageFactory<T> for BoundarySafeFactory<F>
where
    T: Clone + Send + Sync + 'static,
    F: ContextStorageFactory<BoundarySafe<T>>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn is_async(&self) -> bool {
        self.inner.is_async()
    }

    fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }

    fn create(&self, key: &str) -> Result<Box<dyn ContextStorage<T>>, StorageError> {
        let inner = self.inner.create(key)?;
        Ok(Box::new(BoundarySafeStorage::new(inner)))
    }
}
