//! Thread-affinity storage
//!
//! Values are visible only on the thread that wrote them. Crossing to another
//! thread without an async-capable backend loses the value; that is the
//! documented limitation of this variant, not a defect.

use super::storage::{ContextStorage, ContextStorageFactory, THREAD_LOCAL_PRIORITY};
use crate::error::StorageError;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;

thread_local! {
    static SLOTS: RefCell<HashMap<String, Box<dyn Any>>> = RefCell::new(HashMap::new());
}

/// Storage bound to the physical thread
pub struct ThreadLocalStorage<T> {
    key: String,
    _value: PhantomData<fn() -> T>,
}

impl<T> ThreadLocalStorage<T> {
    pub fn new(key: impl Into<String>) -> Self {
        ThreadLocalStorage {
            key: key.into(),
            _value: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

fn with_slots<R>(
    f: impl FnOnce(&mut HashMap<String, Box<dyn Any>>) -> Result<R, StorageError>,
) -> Result<R, StorageError> {
    SLOTS
        .try_with(|slots| {
            let mut slots = slots
                .try_borrow_mut()
                .map_err(|_| StorageError::Unavailable {
                    backend: "thread_local".to_string(),
                })?;
            f(&mut slots)
        })
        .map_err(|_| StorageError::ThreadLocalDestroyed)?
}

impl<T> ContextStorage<T> for ThreadLocalStorage<T>
where
    T: Clone + 'static,
{
    fn name(&self) -> &str {
        "thread_local"
    }

    fn priority(&self) -> i32 {
        THREAD_LOCAL_PRIORITY
    }

    fn can_provide(&self) -> bool {
        true
    }

    fn get(&self) -> Result<Option<T>, StorageError> {
        with_slots(|slots| match slots.get(&self.key) {
            None => Ok(None),
            Some(value) => value
                .downcast_ref::<T>()
                .cloned()
                .map(Some)
                .ok_or_else(|| StorageError::TypeMismatch {
                    key: self.key.clone(),
                }),
        })
    }

    fn set(&self, value: T) -> Result<(), StorageError> {
        with_slots(|slots| {
            slots.insert(self.key.clone(), Box::new(value));
            Ok(())
        })
    }

    fn clear(&self) -> Result<(), StorageError> {
        with_slots(|slots| {
            slots.remove(&self.key);
            Ok(())
        })
    }
}

/// Factory for [`ThreadLocalStorage`]; valid in every host
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadLocalStorageFactory;

impl<T> ContextStorageFactory<T> for ThreadLocalStorageFactory
where
    T: Clone + 'static,
{
    fn name(&self) -> &str {
        "thread_local"
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn create(&self, key: &str) -> Result<Box<dyn ContextStorage<T>>, StorageError> {
        Ok(Box::new(ThreadLocalStorage::<T>::new(key)))
    }
}
