// crates/weavecore/src/events/mod.rs

mod bus;
mod event;
mod observer;

pub use bus::EventBus;
pub use event::{EventKind, ExecutionId, TransitionInfo, WorkflowEvent};
pub use observer::{async_observer_fn, observer_fn, AsyncFnObserver, FnObserver, Observer, ObserverSet};
