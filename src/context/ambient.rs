//! Ambient transaction context
//!
//! Combines every usable backend for one key into the lookup order the
//! dispatch layer needs:
//!
//! 1. primary backends (request, operation, thread-local, ...) ordered by
//!    descending priority, registration order on ties; the thread-local
//!    backend is always present as the floor
//! 2. the single valid async backend with the highest priority
//!
//! Reads try the primaries first (only those whose carrier is live answer),
//! then fall back to the async backend, which answers only inside an
//! attached flow. New values go to the first live
//! primary; the async backend is attached explicitly when the caller knows
//! the work is about to continue asynchronously.

use super::selector::{construct, ActiveBackend};
use super::storage::{ContextStorageFactory, THREAD_LOCAL_PRIORITY};
use super::thread_local::ThreadLocalStorage;
use crate::error::ProbeFailure;
use std::cmp::Reverse;
use std::sync::Arc;
use tracing::{error, trace, warn};

pub struct AmbientContext<T> {
    key: String,
    primary: Vec<ActiveBackend<T>>,
    async_backend: Option<ActiveBackend<T>>,
    rejected: Vec<ProbeFailure>,
}

impl<T> AmbientContext<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(key: impl Into<String>, factories: &[Arc<dyn ContextStorageFactory<T>>]) -> Self {
        let key = key.into();
        let mut primary = Vec::new();
        let mut async_candidates = Vec::new();
        let mut rejected = Vec::new();

        for factory in factories {
            match construct(&key, factory.as_ref()) {
                Ok(backend) if backend.is_async() => async_candidates.push(backend),
                Ok(backend) => primary.push(backend),
                Err(failure) => {
                    warn!(key = %key, error = %failure, "backend excluded from ambient context");
                    rejected.push(failure);
                }
            }
        }

        let has_floor = primary.iter().any(|backend| {
            backend.priority() == THREAD_LOCAL_PRIORITY && backend.name() == "thread_local"
        });
        if !has_floor {
            primary.push(ActiveBackend::new(
                Box::new(ThreadLocalStorage::<T>::new(key.clone())),
                "thread_local",
            ));
        }
        primary.sort_by_key(|backend| Reverse(backend.priority()));

        let mut async_backend: Option<ActiveBackend<T>> = None;
        for backend in async_candidates {
            let better = async_backend
                .as_ref()
                .map_or(true, |current| backend.priority() > current.priority());
            if better {
                async_backend = Some(backend);
            }
        }

        AmbientContext {
            key,
            primary,
            async_backend,
            rejected,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Primary backend names in lookup order
    pub fn primary_names(&self) -> Vec<&str> {
        self.primary.iter().map(|backend| backend.name()).collect()
    }

    pub fn async_name(&self) -> Option<&str> {
        self.async_backend.as_ref().map(|backend| backend.name())
    }

    pub fn rejected(&self) -> &[ProbeFailure] {
        &self.rejected
    }

    /// The current value: first live primary holding one, else the async backend
    pub fn current(&self) -> Option<T> {
        for backend in &self.primary {
            if let Some(value) = backend.get() {
                trace!(key = %self.key, backend = %backend.name(), "context retrieved");
                return Some(value);
            }
        }
        let value = self.async_backend.as_ref().and_then(|backend| backend.get());
        if value.is_some() {
            trace!(key = %self.key, "context retrieved from async backend");
        }
        value
    }

    /// Store on the first primary backend that can provide right now
    ///
    /// Returns the backend name, or `None` when no primary could take it.
    pub fn attach(&self, value: T) -> Option<&str> {
        let backend = self.primary.iter().find(|backend| backend.can_provide());
        match backend {
            Some(backend) if backend.try_set(value) => Some(backend.name()),
            Some(backend) => {
                error!(
                    key = %self.key,
                    backend = %backend.name(),
                    "chosen backend rejected the value"
                );
                None
            }
            None => {
                error!(key = %self.key, "unable to locate a usable context backend");
                None
            }
        }
    }

    /// Clear everything outstanding, then attach `value` as the new current
    pub fn replace(&self, value: T) -> Option<&str> {
        self.remove_outstanding(true, true);
        self.attach(value)
    }

    /// Put `value` on the async backend unless it already holds one
    ///
    /// Returns false when there is no async backend or it cannot take a
    /// value right now.
    pub fn attach_to_async(&self, value: T) -> bool {
        let Some(backend) = &self.async_backend else {
            return false;
        };
        if backend.get().is_some() {
            return true;
        }
        let stored = backend.try_set(value);
        if stored {
            trace!(key = %self.key, backend = %backend.name(), "attached to async backend");
        }
        stored
    }

    pub fn is_attached_to_async(&self) -> bool {
        self.async_backend
            .as_ref()
            .and_then(|backend| backend.get())
            .is_some()
    }

    /// Clear outstanding values; backend failures are swallowed
    pub fn remove_outstanding(&self, remove_async: bool, remove_primary: bool) {
        if remove_primary {
            for backend in &self.primary {
                backend.clear();
            }
        }
        if remove_async {
            if let Some(backend) = &self.async_backend {
                backend.clear();
            }
        }
    }
}

impl<T> std::fmt::Debug for AmbientContext<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmbientContext")
            .field("key", &self.key)
            .field("primary", &self.primary)
            .field("async_backend", &self.async_backend)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::carrier::{RequestContext, RequestStorageFactory};
    use crate::context::flow::{AsyncFlowStorageFactory, FlowContext};
    use crate::context::thread_local::ThreadLocalStorageFactory;

    fn factories() -> Vec<Arc<dyn ContextStorageFactory<String>>> {
        vec![
            Arc::new(ThreadLocalStorageFactory),
            Arc::new(AsyncFlowStorageFactory),
            Arc::new(RequestStorageFactory::new(true)),
        ]
    }

    #[test]
    fn test_primary_order_by_priority() {
        let ambient = AmbientContext::new("ambient.order", &factories());
        assert_eq!(ambient.primary_names(), vec!["request", "thread_local"]);
        assert_eq!(ambient.async_name(), Some("async_flow"));
    }

    #[test]
    fn test_thread_local_floor_always_present() {
        let ambient = AmbientContext::<String>::new("ambient.floor", &[]);
        assert_eq!(ambient.primary_names(), vec!["thread_local"]);
        assert_eq!(ambient.async_name(), None);
        assert!(!ambient.attach_to_async("tx".to_string()));
    }

    #[test]
    fn test_attach_prefers_live_request() {
        let ambient = AmbientContext::new("ambient.request", &factories());
        let request = RequestContext::new("GET", "/");
        let _scope = Arc::clone(&request).enter();

        assert_eq!(ambient.attach("tx-1".to_string()), Some("request"));
        assert_eq!(ambient.current(), Some("tx-1".to_string()));
    }

    #[test]
    fn test_attach_falls_back_to_thread_local() {
        let ambient = AmbientContext::new("ambient.tls", &factories());
        assert_eq!(ambient.attach("tx-2".to_string()), Some("thread_local"));
        assert_eq!(ambient.current(), Some("tx-2".to_string()));
    }

    #[test]
    fn test_async_fallback_and_removal() {
        let ambient = AmbientContext::new("ambient.async", &factories());
        let _guard = FlowContext::default().attach();

        assert!(ambient.attach_to_async("tx-3".to_string()));
        assert!(ambient.is_attached_to_async());
        assert_eq!(ambient.current(), Some("tx-3".to_string()));

        // Already attached: the second value is ignored.
        assert!(ambient.attach_to_async("tx-4".to_string()));
        assert_eq!(ambient.current(), Some("tx-3".to_string()));

        ambient.remove_outstanding(true, false);
        assert!(!ambient.is_attached_to_async());
        assert_eq!(ambient.current(), None);
    }

    #[test]
    fn test_async_backend_refuses_values_outside_a_flow() {
        let ambient = AmbientContext::new("ambient.detached", &factories());
        assert_eq!(ambient.async_name(), Some("async_flow"));

        assert!(!ambient.attach_to_async("tx-5".to_string()));
        assert!(!ambient.is_attached_to_async());
        assert_eq!(ambient.current(), None);
    }

    #[test]
    fn test_replace_clears_previous_values() {
        let ambient = AmbientContext::new("ambient.replace", &factories());
        let _guard = FlowContext::default().attach();
        ambient.attach_to_async("old".to_string());

        assert_eq!(ambient.replace("new".to_string()), Some("thread_local"));
        assert!(!ambient.is_attached_to_async());
        assert_eq!(ambient.current(), Some("new".to_string()));
    }
}
