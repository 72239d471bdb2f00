use super::WorkflowEvent;
use crate::BoxError;
use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::FutureExt;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

/// Callback notified of lifecycle events
///
/// An observer's failure (error or panic) is logged and never aborts the
/// run that emitted the event.
#[async_trait]
pub trait Observer: Send + Sync {
    async fn on_event(&self, event: &WorkflowEvent) -> Result<(), BoxError>;
}

/// Observer backed by a synchronous closure
pub struct FnObserver<F> {
    f: F,
}

pub fn observer_fn<F>(f: F) -> FnObserver<F>
where
    F: Fn(&WorkflowEvent) + Send + Sync + 'static,
{
    FnObserver { f }
}

#[async_trait]
impl<F> Observer for FnObserver<F>
where
    F: Fn(&WorkflowEvent) + Send + Sync + 'static,
{
    async fn on_event(&self, event: &WorkflowEvent) -> Result<(), BoxError> {
        (self.f)(event);
        Ok(())
    }
}

/// Observer backed by an async closure; receives its own copy of the event
pub struct AsyncFnObserver<F, Fut> {
    f: F,
    _future: PhantomData<fn() -> Fut>,
}

pub fn async_observer_fn<F, Fut>(f: F) -> AsyncFnObserver<F, Fut>
where
    F: Fn(WorkflowEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    AsyncFnObserver {
        f,
        _future: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> Observer for AsyncFnObserver<F, Fut>
where
    F: Fn(WorkflowEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn on_event(&self, event: &WorkflowEvent) -> Result<(), BoxError> {
        (self.f)(event.clone()).await;
        Ok(())
    }
}

/// Shared list of observers belonging to one engine
///
/// Clones share the same list. A set created with [`ObserverSet::child_of`]
/// forwards every [`add`](ObserverSet::add) to its parent as well, so an
/// observer attached to a sub-workflow engine also sees the parent's
/// events. Nothing flows from parent to child.
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Arc<RwLock<Vec<Arc<dyn Observer>>>>,
    parent: Option<Box<ObserverSet>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty set linked to `parent` for upward registration.
    pub fn child_of(parent: &ObserverSet) -> Self {
        Self {
            observers: Arc::default(),
            parent: Some(Box::new(parent.clone())),
        }
    }

    /// Register an observer here and on every ancestor.
    pub fn add(&self, observer: Arc<dyn Observer>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer.clone());

        if let Some(parent) = &self.parent {
            parent.add(observer);
        }
    }

    /// Register observers on this set only.
    pub fn extend(&self, observers: impl IntoIterator<Item = Arc<dyn Observer>>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(observers);
    }

    pub fn snapshot(&self) -> Vec<Arc<dyn Observer>> {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    /// Invoke all observers concurrently and wait for them to settle.
    pub async fn notify(&self, event: &WorkflowEvent) {
        let observers = self.snapshot();
        if observers.is_empty() {
            return;
        }

        let calls = observers
            .iter()
            .map(|observer| AssertUnwindSafe(observer.on_event(event)).catch_unwind());

        for outcome in join_all(calls).await {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(event = %event.kind, error = %e, "Observer failed");
                }
                Err(_) => {
                    tracing::error!(event = %event.kind, "Observer panicked");
                }
            }
        }
    }
}

impl fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverSet")
            .field("observers", &self.len())
            .field("has_parent", &self.has_parent())
            .finish()
    }
}
