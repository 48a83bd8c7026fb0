//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change. A memo is also a source: computations that read it
//! are notified when its value actually changes.
//!
//! # Eager and Lazy Memos
//!
//! - An eager memo ([`Memo::new`]) computes as soon as it is created and
//!   recomputes as soon as one of its dependencies changes.
//!
//! - A lazy memo ([`Memo::new_lazy`]) computes on first read. When a
//!   dependency changes it is only marked dirty, and recomputes on the next
//!   read. Memos that are never read again stay dirty (no wasted work).
//!
//! # Disposal
//!
//! A disposed memo stops tracking. Reads keep returning the last computed
//! value.

use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::trace;

use super::context::{untrack, ReactiveContext};
use super::runtime::{Observer, ReactiveHandle, Runtime};
use super::scope::{adopt_current, Disposable};
use super::subscriber::{next_source_id, SubscriberId};

/// Dirty state for a memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency changed since the last computation.
    MaybeDirty,

    /// The memo definitely needs to recompute.
    Dirty,
}

struct MemoInner<T> {
    /// Source ID under which readers subscribe to this memo.
    id: u64,
    subscriber_id: SubscriberId,
    compute: Box<dyn Fn() -> T + Send + Sync>,
    value: RwLock<Option<T>>,
    state: RwLock<MemoState>,
    lazy: bool,
    disposed: AtomicBool,
    /// Source IDs read during the last computation.
    dependencies: RwLock<HashSet<u64>>,
    compute_count: AtomicUsize,
    handle: OnceLock<ReactiveHandle>,
}

impl<T> MemoInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn get(&self) -> T {
        if self.disposed.load(Ordering::SeqCst) {
            return self.get_disposed();
        }

        let cached = match *self.state.read() {
            MemoState::Clean => self.value.read().clone(),
            _ => None,
        };
        let value = match cached {
            Some(value) => value,
            None => self.recompute(),
        };

        // Subscribe after recomputing: the reader is about to see the new
        // value and needs no notification for it.
        Runtime::track(self.id);
        value
    }

    fn get_disposed(&self) -> T {
        if let Some(value) = self.value.read().clone() {
            return value;
        }
        let value = untrack(|| (self.compute)());
        *self.value.write() = Some(value.clone());
        value
    }

    fn recompute(&self) -> T {
        Runtime::clear_dependencies(self.subscriber_id);

        let (new_value, new_deps) = {
            let _ctx = ReactiveContext::enter(self.subscriber_id);
            let value = (self.compute)();
            let deps: HashSet<u64> = ReactiveContext::get_dependencies().into_iter().collect();
            (value, deps)
        };

        *self.dependencies.write() = new_deps;

        let previous = self.value.write().replace(new_value.clone());
        *self.state.write() = MemoState::Clean;
        self.compute_count.fetch_add(1, Ordering::SeqCst);

        let changed = previous.as_ref().is_some_and(|old| *old != new_value);
        trace!(memo = self.id, lazy = self.lazy, changed, "memo recomputed");
        if changed {
            Runtime::notify_source_change(self.id);
        }

        new_value
    }
}

impl<T> Observer for MemoInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn mark_maybe_dirty(&self) -> Option<u64> {
        if self.disposed.load(Ordering::SeqCst) {
            return None;
        }

        let was_clean = {
            let mut state = self.state.write();
            let was_clean = *state == MemoState::Clean;
            if was_clean {
                *state = MemoState::MaybeDirty;
            }
            was_clean
        };

        // Readers of a lazy memo pull the new value themselves, so they are
        // marked along with it.
        (self.lazy && was_clean).then_some(self.id)
    }

    fn schedule(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        if *self.state.read() != MemoState::Clean {
            self.recompute();
        }
    }

    fn is_eager(&self) -> bool {
        !self.lazy
    }
}

impl<T> Disposable for MemoInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            Runtime::clear_dependencies(self.subscriber_id);
            self.dependencies.write().clear();
            trace!(memo = self.id, "memo disposed");
        }
    }
}

impl<T> Drop for MemoInner<T> {
    fn drop(&mut self) {
        Runtime::forget_source(self.id);
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// The `PartialEq` bound is needed to detect when the computed value actually
/// changed, so readers are not woken up for identical results.
pub struct Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    inner: Arc<MemoInner<T>>,
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create an eager memo. The computation runs immediately.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let memo = Self::build(compute, false);
        memo.inner.recompute();
        memo
    }

    /// Create a lazy memo. The computation runs on first access.
    pub fn new_lazy<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(compute, true)
    }

    fn build<F>(compute: F, lazy: bool) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let inner = Arc::new(MemoInner {
            id: next_source_id(),
            subscriber_id: SubscriberId::new(),
            compute: Box::new(compute),
            value: RwLock::new(None),
            state: RwLock::new(MemoState::Dirty),
            lazy,
            disposed: AtomicBool::new(false),
            dependencies: RwLock::new(HashSet::new()),
            compute_count: AtomicUsize::new(0),
            handle: OnceLock::new(),
        });

        let _ = inner.handle.set(Runtime::register(inner.clone()));
        adopt_current(inner.clone());

        Self { inner }
    }

    /// Get the memo's source ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Get the subscriber ID for this memo.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Inside a reactive context the reader subscribes to this memo.
    pub fn get(&self) -> T {
        self.inner.get()
    }

    /// Get the current value without subscribing to the memo.
    pub fn get_untracked(&self) -> T {
        untrack(|| self.inner.get())
    }

    /// Mark the memo as potentially needing recomputation.
    ///
    /// Readers of a lazy memo are notified as well.
    pub fn mark_maybe_dirty(&self) {
        if let Some(id) = Observer::mark_maybe_dirty(&*self.inner) {
            Runtime::notify_source_change(id);
        }
    }

    /// Mark the memo as definitely needing recomputation.
    pub fn mark_dirty(&self) {
        *self.inner.state.write() = MemoState::Dirty;
    }

    /// Stop tracking dependencies. The last value stays readable.
    pub fn dispose(&self) {
        Disposable::dispose(&*self.inner);
    }

    /// Check if the memo has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Whether this memo defers recomputation to the next read.
    pub fn is_lazy(&self) -> bool {
        self.inner.lazy
    }

    /// Get the current dirty state.
    pub fn state(&self) -> MemoState {
        *self.inner.state.read()
    }

    /// Number of times the computation has run.
    pub fn compute_count(&self) -> usize {
        self.inner.compute_count.load(Ordering::SeqCst)
    }

    /// Get the number of computations subscribed to this memo.
    pub fn dependent_count(&self) -> usize {
        Runtime::subscriber_count(self.inner.id)
    }

    /// Get the number of distinct sources read during the last computation.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.read().len()
    }

    /// Check if the memo has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.read().is_some()
    }
}

impl<T> Clone for Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Memo<T>
where
    T: Clone + Send + Sync + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.id())
            .field("lazy", &self.is_lazy())
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}
