//! Request-scoped and operation-scoped storage
//!
//! These variants store values inside a carrier object: an inbound network
//! request ([`RequestContext`]) or an RPC/service call ([`OperationContext`]).
//! The carrier is only live while its scope is entered, so `can_provide` is
//! re-checked on every access. Entering a scope publishes the carrier into the
//! current [`FlowContext`], which means the carrier follows the request's
//! continuations the same way any other flow value does.

use super::flow::{FlowContext, FlowGuard};
use super::storage::{ContextStorage, ContextStorageFactory, OPERATION_PRIORITY, REQUEST_PRIORITY};
use crate::error::StorageError;
use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

static NEXT_CARRIER_ID: AtomicU64 = AtomicU64::new(1);

type ItemMap = HashMap<String, Arc<dyn Any + Send + Sync>>;

/// Item bag owned by a carrier object
#[derive(Default)]
pub struct CarrierItems {
    items: Mutex<ItemMap>,
}

impl CarrierItems {
    fn lock(&self, backend: &str) -> Result<std::sync::MutexGuard<'_, ItemMap>, StorageError> {
        self.items.lock().map_err(|_| StorageError::Poisoned {
            backend: backend.to_string(),
        })
    }

    fn get<T: Clone + 'static>(&self, key: &str, backend: &str) -> Result<Option<T>, StorageError> {
        let items = self.lock(backend)?;
        match items.get(key) {
            None => Ok(None),
            Some(value) => value
                .downcast_ref::<T>()
                .cloned()
                .map(Some)
                .ok_or_else(|| StorageError::TypeMismatch {
                    key: key.to_string(),
                }),
        }
    }

    fn insert<T: Send + Sync + 'static>(
        &self,
        key: &str,
        value: T,
        backend: &str,
    ) -> Result<(), StorageError> {
        self.lock(backend)?.insert(key.to_string(), Arc::new(value));
        Ok(())
    }

    fn remove(&self, key: &str, backend: &str) -> Result<(), StorageError> {
        self.lock(backend)?.remove(key);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A scoped object that can carry context values while it is live
pub trait Carrier: Send + Sync + 'static {
    /// Flow slot under which the live carrier is published
    const SLOT: &'static str;
    /// Backend name of the storage built on this carrier
    const NAME: &'static str;
    const PRIORITY: i32;

    fn items(&self) -> &CarrierItems;

    /// The carrier live in the current flow, if any
    fn current() -> Option<Arc<Self>>
    where
        Self: Sized,
    {
        FlowContext::current().get::<Arc<Self>>(Self::SLOT)
    }
}

/// Publish `carrier` into the current flow until the guard drops
pub fn enter_carrier<C: Carrier>(carrier: Arc<C>) -> FlowGuard {
    FlowContext::current().with_value(C::SLOT, carrier).attach()
}

/// An inbound network request being served
pub struct RequestContext {
    id: u64,
    method: String,
    path: String,
    items: CarrierItems,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Arc<Self> {
        Arc::new(RequestContext {
            id: NEXT_CARRIER_ID.fetch_add(1, Ordering::Relaxed),
            method: method.into(),
            path: path.into(),
            items: CarrierItems::default(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Make this request live for the current flow
    pub fn enter(self: Arc<Self>) -> FlowGuard {
        enter_carrier(self)
    }
}

impl Carrier for RequestContext {
    const SLOT: &'static str = "rastro.carrier.request";
    const NAME: &'static str = "request";
    const PRIORITY: i32 = REQUEST_PRIORITY;

    fn items(&self) -> &CarrierItems {
        &self.items
    }
}

/// An RPC/service operation being executed
pub struct OperationContext {
    id: u64,
    service: String,
    action: String,
    items: CarrierItems,
}

impl OperationContext {
    pub fn new(service: impl Into<String>, action: impl Into<String>) -> Arc<Self> {
        Arc::new(OperationContext {
            id: NEXT_CARRIER_ID.fetch_add(1, Ordering::Relaxed),
            service: service.into(),
            action: action.into(),
            items: CarrierItems::default(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn enter(self: Arc<Self>) -> FlowGuard {
        enter_carrier(self)
    }
}

impl Carrier for OperationContext {
    const SLOT: &'static str = "rastro.carrier.operation";
    const NAME: &'static str = "operation";
    const PRIORITY: i32 = OPERATION_PRIORITY;

    fn items(&self) -> &CarrierItems {
        &self.items
    }
}

/// Storage that keeps its value inside the live carrier `C`
pub struct CarrierStorage<C, T> {
    key: String,
    _marker: PhantomData<fn() -> (C, T)>,
}

pub type RequestStorage<T> = CarrierStorage<RequestContext, T>;
pub type OperationStorage<T> = CarrierStorage<OperationContext, T>;

impl<C, T> CarrierStorage<C, T> {
    pub fn new(key: impl Into<String>) -> Self {
        CarrierStorage {
            key: key.into(),
            _marker: PhantomData,
        }
    }
}

impl<C, T> ContextStorage<T> for CarrierStorage<C, T>
where
    C: Carrier,
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        C::NAME
    }

    fn priority(&self) -> i32 {
        C::PRIORITY
    }

    fn can_provide(&self) -> bool {
        C::current().is_some()
    }

    fn get(&self) -> Result<Option<T>, StorageError> {
        match C::current() {
            Some(carrier) => carrier.items().get(&self.key, C::NAME),
            None => Ok(None),
        }
    }

    fn set(&self, value: T) -> Result<(), StorageError> {
        let carrier = C::current().ok_or_else(|| StorageError::Unavailable {
            backend: C::NAME.to_string(),
        })?;
        carrier.items().insert(&self.key, value, C::NAME)
    }

    fn clear(&self) -> Result<(), StorageError> {
        match C::current() {
            Some(carrier) => carrier.items().remove(&self.key, C::NAME),
            None => Ok(()),
        }
    }
}

/// Factory for carrier-backed storage; valid when the host serves `C`
pub struct CarrierStorageFactory<C> {
    enabled: bool,
    _carrier: PhantomData<fn() -> C>,
}

pub type RequestStorageFactory = CarrierStorageFactory<RequestContext>;
pub type OperationStorageFactory = CarrierStorageFactory<OperationContext>;

impl<C> CarrierStorageFactory<C> {
    pub fn new(enabled: bool) -> Self {
        CarrierStorageFactory {
            enabled,
            _carrier: PhantomData,
        }
    }
}

impl<C, T> ContextStorageFactory<T> for CarrierStorageFactory<C>
where
    C: Carrier,
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        C::NAME
    }

    fn is_valid(&self) -> bool {
        self.enabled
    }

    fn create(&self, key: &str) -> Result<Box<dyn ContextStorage<T>>, StorageError> {
        Ok(Box::new(CarrierStorage::<C, T>::new(key)))
    }
}
