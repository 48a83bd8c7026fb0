//! Instance Lifecycle
//!
//! [`construct`] turns a plain value into a live reactive instance: it binds
//! the instance's [`Lifecycle`] to the class metadata, opens the instance
//! scope, and arms every registered effect. [`Destroy::destroy`] reverses
//! that: every live member computation is disposed, the instance scope is
//! closed, and [`Reactive::on_destroy`] runs.
//!
//! ```text
//! Uninitialized --construct--> Constructed --destroy--> Destroyed
//! ```
//!
//! There is no way back from `Destroyed`. Destroying twice is a no-op.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::member::MemberId;
use super::registry::{class_of, ClassDef, ClassMeta, Object};
use crate::error::{LifecycleError, Result};
use crate::reactive::{Memo, Scope};

/// A type whose members can be wrapped as per-instance reactive
/// computations.
///
/// Implementors embed a [`Lifecycle`] and return it from
/// [`lifecycle`](Reactive::lifecycle). A type that extends another reactive
/// type must return the parent's lifecycle, so the whole instance shares one.
pub trait Reactive: Send + Sync + 'static {
    /// The lifecycle record embedded in the instance.
    fn lifecycle(&self) -> &Lifecycle;

    /// Describe the class: effects to arm at construction, accessor memos to
    /// validate, and the parent class.
    fn define(class: &mut ClassDef<Self>) -> Result<()>
    where
        Self: Sized,
    {
        let _ = class;
        Ok(())
    }

    /// Teardown hook, called once after all computations are disposed.
    fn on_destroy(&self) {}
}

/// Where an instance is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Constructed,
    Destroyed,
}

/// How a computation gets back to the instance that owns it.
///
/// Holds the owner weakly so computations never keep their instance alive.
#[derive(Clone)]
pub(crate) struct Binding {
    owner: Weak<Object>,
    class: Arc<ClassMeta>,
}

impl Binding {
    /// Run `f` on the `C` part of the owner, if the owner is still alive.
    pub(crate) fn with<C: 'static, R>(&self, f: impl FnOnce(&C) -> R) -> Option<R> {
        let owner = self.owner.upgrade()?;
        let view = self.class.view(TypeId::of::<C>())?;
        let this = view(&*owner)?.downcast_ref::<C>()?;
        Some(f(this))
    }

    fn covers<C: 'static>(&self) -> bool {
        self.class.view(TypeId::of::<C>()).is_some()
    }
}

enum State {
    Uninitialized,
    Constructed { binding: Binding, scope: Scope },
    /// The binding stays so memos can still be read after teardown.
    Destroyed { binding: Binding },
}

/// Per-instance lifecycle record: the instance scope, the live computation
/// of every wrapped member, and the memo slots.
pub struct Lifecycle {
    state: Mutex<State>,
    disposers: Mutex<IndexMap<MemberId, Scope>>,
    memos: Mutex<HashMap<MemberId, Arc<Object>>>,
}

impl Lifecycle {
    /// An uninitialized lifecycle, to embed in a value passed to [`construct`].
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Uninitialized),
            disposers: Mutex::new(IndexMap::new()),
            memos: Mutex::new(HashMap::new()),
        }
    }

    /// Where the instance is in its lifetime.
    pub fn state(&self) -> LifecycleState {
        match &*self.state.lock() {
            State::Uninitialized => LifecycleState::Uninitialized,
            State::Constructed { .. } => LifecycleState::Constructed,
            State::Destroyed { .. } => LifecycleState::Destroyed,
        }
    }

    /// Names of the members that currently have a live computation, in the
    /// order they were first created.
    pub fn live_members(&self) -> Vec<&'static str> {
        self.disposers.lock().keys().map(|id| id.name()).collect()
    }

    /// Number of members that currently have a live computation.
    pub fn live_count(&self) -> usize {
        self.disposers.lock().len()
    }

    /// Run `f` inside the instance scope.
    ///
    /// Effects, memos and cleanups created by `f` are disposed when the
    /// instance is destroyed.
    pub fn with_scope<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let scope = match &*self.state.lock() {
            State::Constructed { scope, .. } => scope.clone(),
            State::Uninitialized => {
                return Err(LifecycleError::NotInitialized {
                    member: "with_scope",
                })
            }
            State::Destroyed { .. } => {
                return Err(LifecycleError::Destroyed {
                    member: "with_scope",
                })
            }
        };
        Ok(scope.run(f))
    }

    fn initialize(&self, binding: Binding) {
        *self.state.lock() = State::Constructed {
            binding,
            scope: Scope::new(),
        };
    }

    /// The binding an effect of class `C` uses to start a new computation.
    pub(crate) fn binding_for<C: 'static>(&self, member: &'static str) -> Result<Binding> {
        match self.memo_binding_for::<C>(member)? {
            (binding, false) => Ok(binding),
            (_, true) => Err(LifecycleError::Destroyed { member }),
        }
    }

    /// The binding a memo of class `C` computes through, and whether the
    /// instance has already been destroyed.
    pub(crate) fn memo_binding_for<C: 'static>(
        &self,
        member: &'static str,
    ) -> Result<(Binding, bool)> {
        match &*self.state.lock() {
            State::Constructed { binding, .. } if binding.covers::<C>() => {
                Ok((binding.clone(), false))
            }
            State::Destroyed { binding } if binding.covers::<C>() => Ok((binding.clone(), true)),
            _ => Err(LifecycleError::NotInitialized { member }),
        }
    }

    pub(crate) fn take_disposer(&self, id: MemberId) -> Option<Scope> {
        self.disposers.lock().shift_remove(&id)
    }

    /// Record `scope` as the live computation of `id`.
    ///
    /// A replaced scope is disposed. If the instance was destroyed in the
    /// meantime, `scope` itself is disposed instead of being recorded.
    pub(crate) fn record_disposer(&self, id: MemberId, scope: Scope) {
        let stale = {
            let mut disposers = self.disposers.lock();
            if matches!(*self.state.lock(), State::Destroyed { .. }) {
                Some(scope)
            } else {
                disposers.insert(id, scope)
            }
        };

        if let Some(stale) = stale {
            stale.dispose();
        }
    }

    pub(crate) fn memo_slot<T>(&self, id: MemberId) -> Option<Memo<Option<T>>>
    where
        T: Clone + Send + Sync + PartialEq + 'static,
    {
        self.memos
            .lock()
            .get(&id)
            .and_then(|slot| slot.downcast_ref::<Memo<Option<T>>>())
            .cloned()
    }

    /// Fill the memo slot of `id`, or return the memo already in it.
    ///
    /// Two threads reading the same member for the first time can both
    /// build a memo. Only the first one installed is kept; the other is
    /// disposed and the kept one returned.
    pub(crate) fn install_memo<T>(
        &self,
        id: MemberId,
        memo: Memo<Option<T>>,
        scope: Scope,
    ) -> Memo<Option<T>>
    where
        T: Clone + Send + Sync + PartialEq + 'static,
    {
        let existing = {
            let mut memos = self.memos.lock();
            match memos
                .get(&id)
                .and_then(|slot| slot.downcast_ref::<Memo<Option<T>>>())
            {
                Some(existing) => Some(existing.clone()),
                None => {
                    memos.insert(id, Arc::new(memo.clone()));
                    None
                }
            }
        };

        match existing {
            Some(existing) => {
                scope.dispose();
                existing
            }
            None => {
                self.record_disposer(id, scope);
                memo
            }
        }
    }

    /// Move to `Destroyed` and dispose everything the instance owns.
    ///
    /// Returns `false` when there was nothing to tear down.
    fn teardown(&self) -> bool {
        let scope = {
            let mut state = self.state.lock();
            match &*state {
                State::Constructed { .. } => {}
                State::Destroyed { .. } => {
                    debug!("destroy called on an instance that is already destroyed");
                    return false;
                }
                State::Uninitialized => {
                    debug!("destroy called on an instance that was never constructed");
                    return false;
                }
            }

            let State::Constructed { binding, scope } =
                std::mem::replace(&mut *state, State::Uninitialized)
            else {
                return false;
            };
            *state = State::Destroyed { binding };
            scope
        };

        let disposers: Vec<(MemberId, Scope)> = self.disposers.lock().drain(..).collect();
        let count = disposers.len();
        for (id, disposer) in disposers {
            trace!(member = id.name(), "disposing member computation");
            disposer.dispose();
        }
        scope.dispose();

        debug!(disposed = count, "instance destroyed");
        true
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("state", &self.state())
            .field("live_members", &self.live_members())
            .finish()
    }
}

/// Teardown for constructed instances.
pub trait Destroy {
    /// Dispose every computation the instance owns, then run
    /// [`Reactive::on_destroy`]. Later calls do nothing.
    fn destroy(&self);

    /// Whether [`destroy`](Destroy::destroy) has torn the instance down.
    fn is_destroyed(&self) -> bool;
}

impl<C: Reactive> Destroy for C {
    fn destroy(&self) {
        if self.lifecycle().teardown() {
            self.on_destroy();
        }
    }

    fn is_destroyed(&self) -> bool {
        self.lifecycle().state() == LifecycleState::Destroyed
    }
}

/// Construct a live instance of `C` from `value`.
///
/// Resolves the class (running [`Reactive::define`] on first use), then arms
/// every registered effect, ancestors' first. If the class definition is
/// invalid, or an effect cannot be armed, the instance is torn down and the
/// error returned.
pub fn construct<C: Reactive>(value: C) -> Result<Arc<C>> {
    let class = class_of::<C>()?;
    let instance = Arc::new(value);
    let erased: Arc<Object> = instance.clone();

    let lifecycle = instance.lifecycle();
    lifecycle.initialize(Binding {
        owner: Arc::downgrade(&erased),
        class: class.clone(),
    });

    for effect in class.effects() {
        let armed = class
            .view(effect.class)
            .and_then(|view| view(&*erased))
            .ok_or(LifecycleError::NotInitialized {
                member: effect.name,
            })
            .and_then(|part| (effect.invoke)(part));

        if let Err(error) = armed {
            lifecycle.teardown();
            return Err(error);
        }
    }

    debug!(
        class = class.name(),
        effects = class.effect_count(),
        "instance constructed"
    );
    Ok(instance)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::class::EffectMethod;
    use crate::reactive::{on_cleanup, Signal};

    struct Counter {
        lifecycle: Lifecycle,
        count: Signal<i32>,
        runs: AtomicUsize,
        torn_down: AtomicUsize,
    }

    impl Counter {
        fn new() -> Self {
            Self {
                lifecycle: Lifecycle::new(),
                count: Signal::new(0),
                runs: AtomicUsize::new(0),
                torn_down: AtomicUsize::new(0),
            }
        }

        fn watch(&self) -> Result<()> {
            self.count.get();
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    static WATCH: EffectMethod<Counter> = EffectMethod::new("watch", Counter::watch);

    impl Reactive for Counter {
        fn lifecycle(&self) -> &Lifecycle {
            &self.lifecycle
        }

        fn define(class: &mut ClassDef<Self>) -> Result<()> {
            class.effect(&WATCH);
            Ok(())
        }

        fn on_destroy(&self) {
            self.torn_down.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn construct_arms_registered_effects() {
        let counter = construct(Counter::new()).unwrap();

        assert_eq!(counter.lifecycle().state(), LifecycleState::Constructed);
        assert_eq!(counter.runs.load(Ordering::SeqCst), 1);
        assert_eq!(counter.lifecycle().live_members(), vec!["watch"]);

        counter.count.set(1);
        assert_eq!(counter.runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unconstructed_instance_stays_uninitialized() {
        let counter = Counter::new();
        assert_eq!(counter.lifecycle().state(), LifecycleState::Uninitialized);
        assert!(counter.lifecycle().with_scope(|| ()).is_err());

        counter.destroy();
        assert_eq!(counter.lifecycle().state(), LifecycleState::Uninitialized);
        assert_eq!(counter.torn_down.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn destroy_is_idempotent() {
        let counter = construct(Counter::new()).unwrap();

        counter.destroy();
        counter.destroy();

        assert!(counter.is_destroyed());
        assert_eq!(counter.torn_down.load(Ordering::SeqCst), 1);
        assert_eq!(counter.lifecycle().live_count(), 0);

        counter.count.set(3);
        assert_eq!(counter.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn instance_scope_is_closed_by_destroy() {
        let counter = construct(Counter::new()).unwrap();
        let cleaned = Arc::new(AtomicUsize::new(0));

        let cleanups = cleaned.clone();
        counter
            .lifecycle()
            .with_scope(move || {
                on_cleanup(move || {
                    cleanups.fetch_add(1, Ordering::SeqCst);
                })
            })
            .unwrap();

        assert_eq!(cleaned.load(Ordering::SeqCst), 0);
        counter.destroy();
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);

        assert_eq!(
            counter.lifecycle().with_scope(|| ()),
            Err(LifecycleError::Destroyed {
                member: "with_scope"
            })
        );
    }

    #[test]
    fn binding_does_not_keep_instance_alive() {
        let counter = construct(Counter::new()).unwrap();
        let count = counter.count.clone();
        let weak = Arc::downgrade(&counter);

        drop(counter);
        assert!(weak.upgrade().is_none());

        // The effect may still be registered, but has no instance to run on.
        count.set(7);
    }
}
