//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect re-runs synchronously.
//!
//! 3. Before re-running, the effect clears its old dependencies and tracks
//!    new ones during execution.
//!
//! # Differences from Memo
//!
//! - Memos return a value; effects do not.
//! - Memos cache results; effects just run their side effect.
//!
//! # Ownership
//!
//! An effect created inside a [`Scope`](super::Scope) is owned by it and
//! lives until the scope is disposed or dropped. Outside of a scope the
//! returned handle keeps it alive.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::trace;

use super::context::ReactiveContext;
use super::runtime::{Observer, ReactiveHandle, Runtime};
use super::scope::{adopt_current, Disposable};
use super::subscriber::SubscriberId;

/// Counter for generating unique effect IDs.
static EFFECT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_effect_id() -> u64 {
    EFFECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

struct EffectInner {
    id: u64,
    subscriber_id: SubscriberId,
    run: Box<dyn Fn() + Send + Sync>,
    /// Source IDs read during the last run.
    dependencies: RwLock<HashSet<u64>>,
    disposed: AtomicBool,
    dirty: AtomicBool,
    running: AtomicBool,
    run_count: AtomicUsize,
    handle: OnceLock<ReactiveHandle>,
}

/// Clears the running flag even if the effect body panics.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl EffectInner {
    fn execute(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            trace!(effect = self.id, "skipping re-entrant effect run");
            return;
        }
        let _running = RunningGuard(&self.running);

        Runtime::clear_dependencies(self.subscriber_id);
        self.dirty.store(false, Ordering::SeqCst);

        let new_deps: HashSet<u64> = {
            let _ctx = ReactiveContext::enter(self.subscriber_id);
            (self.run)();
            ReactiveContext::get_dependencies().into_iter().collect()
        };

        *self.dependencies.write() = new_deps;
        self.run_count.fetch_add(1, Ordering::SeqCst);
        trace!(effect = self.id, "effect ran");
    }
}

impl Observer for EffectInner {
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn mark_maybe_dirty(&self) -> Option<u64> {
        self.dirty.store(true, Ordering::SeqCst);
        None
    }

    fn schedule(&self) {
        if self.dirty.load(Ordering::SeqCst) {
            self.execute();
        }
    }

    fn is_eager(&self) -> bool {
        true
    }
}

impl Disposable for EffectInner {
    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            Runtime::clear_dependencies(self.subscriber_id);
            self.dependencies.write().clear();
            trace!(effect = self.id, "effect disposed");
        }
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use lifecycle_core::reactive::{Effect, Signal};
///
/// let count = Signal::new(0);
/// let reader = count.clone();
/// let effect = Effect::new(move || {
///     let _ = reader.get();
/// });
///
/// count.set(5);
/// assert_eq!(effect.run_count(), 2);
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let effect = Self::new_lazy(run);
        effect.inner.execute();
        effect
    }

    /// Create a new effect without running it immediately.
    ///
    /// It has no dependencies until [`execute`](Self::execute) is called.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let inner = Arc::new(EffectInner {
            id: next_effect_id(),
            subscriber_id: SubscriberId::new(),
            run: Box::new(run),
            dependencies: RwLock::new(HashSet::new()),
            disposed: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            running: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
            handle: OnceLock::new(),
        });

        let _ = inner.handle.set(Runtime::register(inner.clone()));
        adopt_current(inner.clone());

        Self { inner }
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Get the subscriber ID for this effect.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Execute the effect function now.
    pub fn execute(&self) {
        self.inner.execute();
    }

    /// Re-run the effect, unless it has been disposed.
    pub fn schedule(&self) {
        self.inner.execute();
    }

    /// Dispose of the effect. After disposal, the effect will not run again.
    pub fn dispose(&self) {
        Disposable::dispose(&*self.inner);
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Get the number of distinct sources read during the last run.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.read().len()
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    use crate::reactive::{scope, Signal};

    #[test]
    fn effect_runs_on_creation() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let _effect = Effect::new(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn effect_lazy_does_not_run_on_creation() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let effect = Effect::new_lazy(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 0);
        assert_eq!(effect.run_count(), 0);

        effect.execute();
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_reruns_when_signal_changes() {
        let signal = Signal::new(0);
        let seen = Arc::new(AtomicI32::new(-1));

        let reader = signal.clone();
        let seen_clone = seen.clone();
        let effect = Effect::new(move || {
            seen_clone.store(reader.get(), Ordering::SeqCst);
        });

        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(effect.dependency_count(), 1);

        signal.set(7);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn effect_does_not_run_after_disposal() {
        let signal = Signal::new(0);
        let reader = signal.clone();
        let effect = Effect::new(move || {
            reader.get();
        });

        assert_eq!(effect.run_count(), 1);

        effect.dispose();
        assert!(effect.is_disposed());
        assert_eq!(signal.subscriber_count(), 0);

        signal.set(1);
        effect.schedule();
        effect.execute();
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_owned_by_scope_survives_handle_drop() {
        let signal = Signal::new(0);
        let reader = signal.clone();
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let ((), owner) = scope(|| {
            Effect::new(move || {
                reader.get();
                runs_clone.fetch_add(1, Ordering::SeqCst);
            });
        });

        signal.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        owner.dispose();
        signal.set(2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unowned_effect_stops_when_dropped() {
        let signal = Signal::new(0);
        let reader = signal.clone();
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let effect = Effect::new(move || {
            reader.get();
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        drop(effect);

        signal.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn effect_clone_shares_state() {
        let effect1 = Effect::new(|| {});
        let effect2 = effect1.clone();

        assert_eq!(effect1.id(), effect2.id());
        assert_eq!(effect2.run_count(), 1);

        effect1.execute();
        assert_eq!(effect2.run_count(), 2);

        effect1.dispose();
        assert!(effect2.is_disposed());
    }
}
