//! Backend selection
//!
//! Probes the registered [`ContextStorageFactory`]s for one storage key and
//! keeps exactly one active backend for it. Probing runs inside a failure
//! boundary: a factory that errors or panics is excluded and logged, never
//! propagated. A valid backend whose carrier is not live at selection time
//! (a request backend probed outside any request) is passed over. Among the
//! rest the highest priority wins; ties go to the factory registered first.
//!
//! The selection is made once (lazily, through a one-time-initialization
//! cell) and stays stable until [`BackendSelector::reevaluate`] is called
//! with exclusive access. Hot-path `get`/`set`/`clear` take no locks.

use super::storage::{ContextStorage, ContextStorageFactory};
use crate::error::{panic_message, ProbeFailure, StorageError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace, warn};

/// Run `f`, turning a panic into its message
fn guarded<R>(f: impl FnOnce() -> R) -> Result<R, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

/// A constructed backend wrapped in the access failure boundary
pub struct ActiveBackend<T> {
    storage: Box<dyn ContextStorage<T>>,
    factory: String,
    priority: i32,
    is_async: bool,
}

impl<T> ActiveBackend<T> {
    /// Wrap an already-constructed storage
    pub fn new(storage: Box<dyn ContextStorage<T>>, factory: impl Into<String>) -> Self {
        let priority = storage.priority();
        ActiveBackend {
            storage,
            factory: factory.into(),
            priority,
            is_async: false,
        }
    }

    pub fn name(&self) -> &str {
        self.storage.name()
    }

    /// Name of the factory that produced this backend
    pub fn factory(&self) -> &str {
        &self.factory
    }

    /// Priority observed at probe time
    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// Whether the backend has a carrier right now; a panic counts as "no"
    pub fn can_provide(&self) -> bool {
        match guarded(|| self.storage.can_provide()) {
            Ok(available) => available,
            Err(message) => {
                warn!(backend = %self.name(), %message, "can_provide panicked");
                false
            }
        }
    }

    /// Current value, or `None` when unavailable or failing
    pub fn get(&self) -> Option<T> {
        if !self.can_provide() {
            return None;
        }
        match guarded(|| self.storage.get()) {
            Ok(Ok(value)) => value,
            Ok(Err(err)) => {
                warn!(backend = %self.name(), error = %err, "context get failed");
                None
            }
            Err(message) => {
                warn!(backend = %self.name(), %message, "context get panicked");
                None
            }
        }
    }

    /// Store `value`; silently dropped when no carrier is available
    pub fn set(&self, value: T) {
        self.try_set(value);
    }

    /// Store `value`, reporting whether it landed anywhere
    pub fn try_set(&self, value: T) -> bool {
        if !self.can_provide() {
            trace!(backend = %self.name(), "no carrier available, dropping set");
            return false;
        }
        self.report(guarded(|| self.storage.set(value)), "set")
    }

    /// Remove the value; safe to call when nothing was set
    pub fn clear(&self) {
        self.report(guarded(|| self.storage.clear()), "clear");
    }

    fn report(&self, outcome: Result<Result<(), StorageError>, String>, op: &str) -> bool {
        match outcome {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(backend = %self.name(), error = %err, op, "context write failed");
                false
            }
            Err(message) => {
                warn!(backend = %self.name(), %message, op, "context write panicked");
                false
            }
        }
    }
}

impl<T> std::fmt::Debug for ActiveBackend<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveBackend")
            .field("name", &self.name())
            .field("factory", &self.factory)
            .field("priority", &self.priority)
            .field("is_async", &self.is_async)
            .finish()
    }
}

/// Construct one factory's backend inside the failure boundary
pub fn construct<T>(
    key: &str,
    factory: &dyn ContextStorageFactory<T>,
) -> Result<ActiveBackend<T>, ProbeFailure> {
    let outcome = guarded(|| {
        let name = factory.name().to_string();
        if !factory.is_valid() {
            return Ok(None);
        }
        let is_async = factory.is_async();
        factory.create(key).map(|storage| {
            let mut backend = ActiveBackend::new(storage, name);
            backend.is_async = is_async;
            Some(backend)
        })
    });

    // The name itself may be what panicked, so it is read again guardedly.
    let factory_name = || {
        guarded(|| factory.name().to_string()).unwrap_or_else(|_| "<unnamed>".to_string())
    };

    match outcome {
        Ok(Ok(Some(backend))) => Ok(backend),
        Ok(Ok(None)) => Err(ProbeFailure::Invalid {
            factory: factory_name(),
        }),
        Ok(Err(source)) => Err(ProbeFailure::Construction {
            factory: factory_name(),
            source,
        }),
        Err(message) => Err(ProbeFailure::Panicked {
            factory: factory_name(),
            message,
        }),
    }
}

/// Result of probing a factory list for one key
pub struct ProbeOutcome<T> {
    pub active: Option<ActiveBackend<T>>,
    /// Names of every factory that produced a valid backend, in registration order
    pub candidates: Vec<String>,
    /// Valid backends passed over because they could not provide when probed
    pub unavailable: Vec<String>,
    pub rejected: Vec<ProbeFailure>,
}

impl<T> std::fmt::Debug for ProbeOutcome<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeOutcome")
            .field("active", &self.active)
            .field("candidates", &self.candidates)
            .field("unavailable", &self.unavailable)
            .field("rejected", &self.rejected)
            .finish()
    }
}

/// Probe every factory and pick the highest-priority backend that can provide
pub fn probe<T>(key: &str, factories: &[Arc<dyn ContextStorageFactory<T>>]) -> ProbeOutcome<T> {
    let mut active: Option<ActiveBackend<T>> = None;
    let mut candidates = Vec::new();
    let mut unavailable = Vec::new();
    let mut rejected = Vec::new();

    for factory in factories {
        match construct(key, factory.as_ref()) {
            Ok(backend) => {
                debug!(
                    key,
                    factory = %backend.factory(),
                    priority = backend.priority(),
                    "backend candidate"
                );
                candidates.push(backend.factory().to_string());
                if !backend.can_provide() {
                    debug!(key, factory = %backend.factory(), "not providing at selection time");
                    unavailable.push(backend.factory().to_string());
                    continue;
                }
                let better = active
                    .as_ref()
                    .map_or(true, |current| backend.priority() > current.priority());
                if better {
                    active = Some(backend);
                }
            }
            Err(failure) => {
                warn!(key, error = %failure, "backend excluded");
                rejected.push(failure);
            }
        }
    }

    match &active {
        Some(backend) => debug!(key, backend = %backend.name(), "backend selected"),
        None => warn!(key, "no context backend available"),
    }

    ProbeOutcome {
        active,
        candidates,
        unavailable,
        rejected,
    }
}

/// Owns the active backend for one storage key
pub struct BackendSelector<T> {
    key: String,
    factories: Vec<Arc<dyn ContextStorageFactory<T>>>,
    selection: OnceLock<ProbeOutcome<T>>,
}

impl<T> BackendSelector<T> {
    pub fn new(key: impl Into<String>, factories: Vec<Arc<dyn ContextStorageFactory<T>>>) -> Self {
        BackendSelector {
            key: key.into(),
            factories,
            selection: OnceLock::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Probe once; concurrent callers all observe the same selection
    pub fn probe(&self) -> &ProbeOutcome<T> {
        self.selection.get_or_init(|| probe(&self.key, &self.factories))
    }

    pub fn active(&self) -> Option<&ActiveBackend<T>> {
        self.probe().active.as_ref()
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active().map(|backend| backend.name())
    }

    pub fn rejected(&self) -> &[ProbeFailure] {
        &self.probe().rejected
    }

    /// Discard the current selection and probe again
    pub fn reevaluate(&mut self) -> Option<&str> {
        self.selection = OnceLock::new();
        self.active_name()
    }

    pub fn get(&self) -> Option<T> {
        self.active().and_then(|backend| backend.get())
    }

    pub fn set(&self, value: T) {
        if let Some(backend) = self.active() {
            backend.set(value);
        }
    }

    pub fn clear(&self) {
        if let Some(backend) = self.active() {
            backend.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::carrier::{RequestContext, RequestStorageFactory};
    use crate::context::thread_local::ThreadLocalStorageFactory;

    struct PanickingFactory;

    impl ContextStorageFactory<u32> for PanickingFactory {
        fn name(&self) -> &str {
            "panicking"
        }

        fn is_valid(&self) -> bool {
            panic!("validity check exploded")
        }

        fn create(&self, _key: &str) -> Result<Box<dyn ContextStorage<u32>>, StorageError> {
            unreachable!()
        }
    }

    struct FailingFactory;

    impl ContextStorageFactory<u32> for FailingFactory {
        fn name(&self) -> &str {
            "failing"
        }

        fn is_valid(&self) -> bool {
            true
        }

        fn create(&self, _key: &str) -> Result<Box<dyn ContextStorage<u32>>, StorageError> {
            Err(StorageError::Construction("no carrier type".to_string()))
        }
    }

    #[test]
    fn test_probe_excludes_panicking_factory() {
        let factories: Vec<Arc<dyn ContextStorageFactory<u32>>> =
            vec![Arc::new(PanickingFactory), Arc::new(ThreadLocalStorageFactory)];
        let outcome = probe("tx", &factories);

        assert_eq!(outcome.active.as_ref().map(|b| b.name()), Some("thread_local"));
        assert_eq!(outcome.rejected.len(), 1);
        assert!(matches!(outcome.rejected[0], ProbeFailure::Panicked { .. }));
    }

    #[test]
    fn test_probe_excludes_construction_failure() {
        let factories: Vec<Arc<dyn ContextStorageFactory<u32>>> = vec![Arc::new(FailingFactory)];
        let outcome = probe("tx", &factories);
        assert!(outcome.active.is_none());
        assert_eq!(outcome.rejected[0].factory(), "failing");
    }

    #[test]
    fn test_probe_passes_over_backend_without_live_carrier() {
        let factories: Vec<Arc<dyn ContextStorageFactory<u32>>> = vec![
            Arc::new(ThreadLocalStorageFactory),
            Arc::new(RequestStorageFactory::new(true)),
        ];

        let outside = probe("tx", &factories);
        assert_eq!(outside.active.as_ref().map(|b| b.name()), Some("thread_local"));
        assert_eq!(outside.candidates, vec!["thread_local", "request"]);
        assert_eq!(outside.unavailable, vec!["request"]);
        assert!(outside.rejected.is_empty());

        let _scope = RequestContext::new("GET", "/").enter();
        let inside = probe("tx", &factories);
        assert_eq!(inside.active.as_ref().map(|b| b.name()), Some("request"));
        assert!(inside.unavailable.is_empty());
    }

    #[test]
    fn test_selector_without_backend_is_noop() {
        let selector = BackendSelector::<u32>::new("tx", Vec::new());
        selector.set(1);
        selector.clear();
        assert_eq!(selector.get(), None);
        assert_eq!(selector.active_name(), None);
    }

    #[test]
    fn test_selector_round_trip_through_thread_local() {
        let selector =
            BackendSelector::<u32>::new("selector.tls", vec![Arc::new(ThreadLocalStorageFactory)]);
        selector.set(11);
        assert_eq!(selector.get(), Some(11));
        selector.clear();
        assert_eq!(selector.get(), None);
    }

    #[test]
    fn test_reevaluate_probes_again() {
        let mut selector =
            BackendSelector::<u32>::new("selector.re", vec![Arc::new(ThreadLocalStorageFactory)]);
        assert_eq!(selector.active_name(), Some("thread_local"));
        assert_eq!(selector.reevaluate(), Some("thread_local"));
    }
}
