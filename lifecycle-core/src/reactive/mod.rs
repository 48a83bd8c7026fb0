//! Reactive Primitives
//!
//! This module implements the reactive engine the class layer is built on:
//! signals, memos, effects, and disposal scopes.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a memo or effect), the signal
//! registers that context as a dependent. When the signal's value changes,
//! all dependents are notified.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates only
//! when one of its dependencies changes, either right away (eager) or on the
//! next read (lazy).
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! ## Scopes
//!
//! A Scope owns the memos and effects created while it runs. Disposing the
//! scope cancels all of them at once.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to automatically
//! detect dependencies. When a source is read, we check if there is an active
//! tracking context and, if so, register the dependency.

mod context;
mod effect;
mod memo;
mod runtime;
mod scope;
mod signal;
mod subscriber;

pub use context::{untrack, ReactiveContext};
pub use effect::Effect;
pub use memo::{Memo, MemoState};
pub use runtime::{Observer, ReactiveHandle, Runtime};
pub use scope::{on_cleanup, scope, Disposable, Scope};
pub use signal::Signal;
pub use subscriber::SubscriberId;

/// Create a signal holding `initial`.
pub fn signal<T>(initial: T) -> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    Signal::new(initial)
}

/// Create an effect. It runs once now and again whenever a source it read
/// changes.
pub fn effect(run: impl Fn() + Send + Sync + 'static) -> Effect {
    Effect::new(run)
}

/// Create an eager memo.
pub fn memo<T>(compute: impl Fn() -> T + Send + Sync + 'static) -> Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    Memo::new(compute)
}

/// Create a lazy memo.
pub fn lazy_memo<T>(compute: impl Fn() -> T + Send + Sync + 'static) -> Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    Memo::new_lazy(compute)
}
