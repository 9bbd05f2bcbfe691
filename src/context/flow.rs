//! Asynchronous-flow storage
//!
//! A logical flow is the initial call plus every continuation it spawns. Its
//! ambient values live in a [`FlowContext`]: an immutable, reference-counted
//! snapshot. Writes never mutate a snapshot in place; they publish a new one
//! as the current context of the executing flow. Spawning a continuation
//! captures the snapshot, and the continuation re-installs it around every
//! poll (futures) or around its body (threads, blocking closures).
//!
//! Consequences:
//! - a value written before a spawn is visible to the continuation and all
//!   of its descendants, whichever worker thread runs them
//! - a write inside a continuation is visible to that continuation's later
//!   polls and its own descendants, never to its parent or siblings
//! - unrelated flows never share a snapshot, so they cannot observe each
//!   other's values
//!
//! Code that runs outside every attached flow (a task spawned with plain
//! `tokio::spawn`, say) has no flow to write into: [`AsyncFlowStorage`]
//! reports `can_provide == false` there and refuses `set`, so nothing is
//! left behind on the worker thread for the next task to find.
//!
//! ```text
//! parent ── set(tx=A) ──┬── spawn ──> child 1: get() = A, set(tx=B) -> B
//!                       └── spawn ──> child 2: get() = A (never B)
//! ```

use super::storage::{ContextStorage, ContextStorageFactory, ASYNC_FLOW_PRIORITY};
use crate::error::StorageError;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

type FlowValue = Arc<dyn Any + Send + Sync>;

thread_local! {
    static CURRENT: RefCell<FlowContext> = RefCell::new(FlowContext::default());
    // Live FlowGuards on this thread
    static ATTACHED: Cell<usize> = const { Cell::new(0) };
}

/// Immutable snapshot of the ambient values of one logical flow
#[derive(Clone, Default)]
pub struct FlowContext {
    values: Arc<HashMap<String, FlowValue>>,
}

impl FlowContext {
    /// Snapshot of the flow executing on this thread right now
    pub fn current() -> FlowContext {
        CURRENT
            .try_with(|current| current.borrow().clone())
            .unwrap_or_default()
    }

    /// Whether this thread is executing inside an attached flow
    pub fn is_attached() -> bool {
        ATTACHED.try_with(Cell::get).unwrap_or(0) > 0
    }

    /// Replace the current flow with `f(current)`
    ///
    /// Returns false, leaving the thread untouched, when no flow is attached.
    pub fn update_current(f: impl FnOnce(&FlowContext) -> FlowContext) -> bool {
        if !FlowContext::is_attached() {
            return false;
        }
        let next = f(&FlowContext::current());
        replace_current(next);
        true
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Typed read; a value of a different type under `key` is an error
    pub fn try_get<T>(&self, key: &str) -> Result<Option<T>, StorageError>
    where
        T: Clone + 'static,
    {
        match self.values.get(key) {
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

    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: Clone + 'static,
    {
        self.try_get(key).ok().flatten()
    }

    /// New snapshot with `key` bound to `value`; `self` is left untouched
    pub fn with_value<T>(&self, key: impl Into<String>, value: T) -> FlowContext
    where
        T: Send + Sync + 'static,
    {
        let mut values = HashMap::clone(&self.values);
        values.insert(key.into(), Arc::new(value));
        FlowContext {
            values: Arc::new(values),
        }
    }

    /// New snapshot without `key`
    pub fn without(&self, key: &str) -> FlowContext {
        if !self.values.contains_key(key) {
            return self.clone();
        }
        let mut values = HashMap::clone(&self.values);
        values.remove(key);
        FlowContext {
            values: Arc::new(values),
        }
    }

    /// Install this snapshot as the current flow until the guard drops
    pub fn attach(self) -> FlowGuard {
        let _ = ATTACHED.try_with(|depth| depth.set(depth.get() + 1));
        let previous = replace_current(self);
        FlowGuard {
            previous: Some(previous),
            _not_send: PhantomData,
        }
    }

    /// Run `f` inside this flow
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.clone().attach();
        f()
    }

    /// Bind `f` to this flow so it can be shipped to another thread or pool
    pub fn wrap<F, R>(self, f: F) -> impl FnOnce() -> R + Send + 'static
    where
        F: FnOnce() -> R + Send + 'static,
        R: 'static,
    {
        move || self.run(f)
    }
}

impl std::fmt::Debug for FlowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("FlowContext").field("keys", &keys).finish()
    }
}

fn replace_current(next: FlowContext) -> FlowContext {
    CURRENT
        .try_with(|current| current.replace(next))
        .unwrap_or_default()
}

fn release(previous: FlowContext) -> FlowContext {
    let _ = ATTACHED.try_with(|depth| depth.set(depth.get().saturating_sub(1)));
    replace_current(previous)
}

/// Restores the previously current flow when dropped
#[must_use = "dropping the guard immediately restores the previous flow"]
pub struct FlowGuard {
    previous: Option<FlowContext>,
    _not_send: PhantomData<*const ()>,
}

impl FlowGuard {
    /// Restore the previous flow and return the snapshot that was current
    /// at exit, including any writes made while attached
    pub fn detach(mut self) -> FlowContext {
        let previous = self.previous.take().unwrap_or_default();
        release(previous)
    }
}

impl Drop for FlowGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            release(previous);
        }
    }
}

/// Future that runs every poll inside its own logical flow
pub struct WithFlow<F> {
    inner: Pin<Box<F>>,
    context: FlowContext,
}

impl<F> WithFlow<F> {
    pub fn new(inner: F, context: FlowContext) -> Self {
        WithFlow {
            inner: Box::pin(inner),
            context,
        }
    }

    pub fn context(&self) -> &FlowContext {
        &self.context
    }
}

impl<F: Future> Future for WithFlow<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let guard = this.context.clone().attach();
        let poll = this.inner.as_mut().poll(cx);
        // Writes made during this poll carry over to the next one.
        this.context = guard.detach();
        poll
    }
}

/// Attach futures to a logical flow
pub trait FlowFutureExt: Future + Sized {
    /// Continue the flow that is current at the call site
    fn in_current_flow(self) -> WithFlow<Self> {
        WithFlow::new(self, FlowContext::current())
    }

    fn in_flow(self, context: FlowContext) -> WithFlow<Self> {
        WithFlow::new(self, context)
    }
}

impl<F: Future> FlowFutureExt for F {}

/// Spawn an OS thread that continues the current flow
pub fn spawn_thread<F, R>(f: F) -> std::thread::JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    std::thread::spawn(FlowContext::current().wrap(f))
}

/// Spawn a tokio task that continues the current flow
#[cfg(feature = "tokio")]
pub fn spawn<F>(future: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(future.in_current_flow())
}

/// Run a blocking closure on tokio's blocking pool inside the current flow
#[cfg(feature = "tokio")]
pub fn spawn_blocking<F, R>(f: F) -> tokio::task::JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(FlowContext::current().wrap(f))
}

/// Storage whose value follows the logical flow across continuations
pub struct AsyncFlowStorage<T> {
    key: String,
    _value: PhantomData<fn() -> T>,
}

impl<T> AsyncFlowStorage<T> {
    pub fn new(key: impl Into<String>) -> Self {
        AsyncFlowStorage {
            key: key.into(),
            _value: PhantomData,
        }
    }
}

impl<T> ContextStorage<T> for AsyncFlowStorage<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "async_flow"
    }

    fn priority(&self) -> i32 {
        ASYNC_FLOW_PRIORITY
    }

    fn can_provide(&self) -> bool {
        FlowContext::is_attached()
    }

    fn get(&self) -> Result<Option<T>, StorageError> {
        FlowContext::current().try_get(&self.key)
    }

    fn set(&self, value: T) -> Result<(), StorageError> {
        if FlowContext::update_current(|current| current.with_value(self.key.clone(), value)) {
            Ok(())
        } else {
            Err(StorageError::Unavailable {
                backend: "async_flow".to_string(),
            })
        }
    }

    fn clear(&self) -> Result<(), StorageError> {
        FlowContext::update_current(|current| current.without(&self.key));
        Ok(())
    }
}

/// Factory for [`AsyncFlowStorage`]
#[derive(Debug, Default, Clone, Copy)]
pub struct AsyncFlowStorageFactory;

impl<T> ContextStorageFactory<T> for AsyncFlowStorageFactory
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        "async_flow"
    }

    fn is_async(&self) -> bool {
        true
    }

    fn is_valid(&self) -> bool {
        true
    }

    fn create(&self, key: &str) -> Result<Box<dyn ContextStorage<T>>, StorageError> {
        Ok(Box::new(AsyncFlowStorage::<T>::new(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_with_value_does_not_mutate_original() {
        let base = FlowContext::default();
        let next = base.with_value("k", 1u32);
        assert!(base.is_empty());
        assert_eq!(next.get::<u32>("k"), Some(1));
    }

    #[test]
    fn test_attach_restores_previous_on_drop() {
        let ctx = FlowContext::default().with_value("attach", "inner".to_string());
        {
            let _guard = ctx.attach();
            assert_eq!(
                FlowContext::current().get::<String>("attach"),
                Some("inner".to_string())
            );
        }
        assert!(!FlowContext::current().contains("attach"));
    }

    #[test]
    fn test_detach_returns_writes_made_while_attached() {
        let guard = FlowContext::default().attach();
        let storage = AsyncFlowStorage::<u32>::new("detach");
        storage.set(9).unwrap();
        let exited = guard.detach();
        assert_eq!(exited.get::<u32>("detach"), Some(9));
        assert_eq!(storage.get().unwrap(), None);
    }

    #[test]
    fn test_storage_value_follows_spawned_thread() {
        let guard = FlowContext::default().attach();
        let storage = AsyncFlowStorage::<String>::new("flow.thread");
        storage.set("tx-1".to_string()).unwrap();

        let seen = spawn_thread(|| AsyncFlowStorage::<String>::new("flow.thread").get())
            .join()
            .unwrap()
            .unwrap();

        assert_eq!(seen, Some("tx-1".to_string()));
        drop(guard);
    }

    #[test]
    fn test_child_write_is_invisible_to_parent() {
        let _guard = FlowContext::default().attach();
        let storage = AsyncFlowStorage::<u32>::new("flow.child");
        storage.set(1).unwrap();

        spawn_thread(|| AsyncFlowStorage::<u32>::new("flow.child").set(2))
            .join()
            .unwrap()
            .unwrap();

        assert_eq!(storage.get().unwrap(), Some(1));
    }

    #[test]
    fn test_plain_thread_does_not_see_flow() {
        let _guard = FlowContext::default().with_value("flow.plain", 5u8).attach();
        let seen = thread::spawn(|| FlowContext::current().get::<u8>("flow.plain"))
            .join()
            .unwrap();
        assert_eq!(seen, None);
    }

    #[test]
    fn test_wrap_carries_flow_through_channel_pool() {
        let (tx, rx) = mpsc::channel::<Box<dyn FnOnce() + Send>>();
        let worker = thread::spawn(move || {
            for job in rx {
                job();
            }
        });

        let (result_tx, result_rx) = mpsc::channel();
        let ctx = FlowContext::default().with_value("flow.pool", 42u64);
        let job = ctx.wrap(move || {
            let seen = FlowContext::current().get::<u64>("flow.pool");
            result_tx.send(seen).unwrap();
        });
        tx.send(Box::new(job)).unwrap();
        drop(tx);

        assert_eq!(result_rx.recv().unwrap(), Some(42));
        worker.join().unwrap();
    }

    #[test]
    fn test_clear_removes_only_own_key() {
        let _guard = FlowContext::default()
            .with_value("flow.a", 1u8)
            .with_value("flow.b", 2u8)
            .attach();
        AsyncFlowStorage::<u8>::new("flow.a").clear().unwrap();
        let current = FlowContext::current();
        assert!(!current.contains("flow.a"));
        assert_eq!(current.get::<u8>("flow.b"), Some(2));
    }

    #[test]
    fn test_storage_refuses_writes_outside_any_flow() {
        let storage = AsyncFlowStorage::<u32>::new("flow.detached");
        assert!(!storage.can_provide());
        assert!(matches!(
            storage.set(1),
            Err(StorageError::Unavailable { .. })
        ));
        assert_eq!(storage.get().unwrap(), None);
        assert!(storage.clear().is_ok());

        {
            let _outer = FlowContext::default().attach();
            let inner = FlowContext::current().attach();
            drop(inner);
            assert!(storage.can_provide());
            storage.set(2).unwrap();
        }
        assert!(!storage.can_provide());
        assert_eq!(storage.get().unwrap(), None);
    }

    #[test]
    fn test_debug_lists_sorted_keys() {
        let ctx = FlowContext::default()
            .with_value("b", 1u8)
            .with_value("a", 2u8);
        assert_eq!(format!("{:?}", ctx), "FlowContext { keys: [\"a\", \"b\"] }");
    }
}
