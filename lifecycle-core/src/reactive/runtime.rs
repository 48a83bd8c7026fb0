//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, memos, and
//! effects. It manages the dependency table and fans out notifications when
//! a source changes.
//!
//! # How It Works
//!
//! 1. When a memo or effect is created, it registers with the runtime.
//!
//! 2. When a memo or effect reads a source (signal or memo), the runtime
//!    records the dependency.
//!
//! 3. When a source's value changes, the runtime:
//!    a. Finds all dependent memos/effects
//!    b. Marks them as "maybe dirty"
//!    c. Schedules the eager ones (effects and eager memos)
//!    d. Lazy memos recompute on next access
//!
//! # Locking
//!
//! The registry only holds weak references, and no lock is ever held while a
//! computation runs. Computations may read and write sources freely.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock, Weak};

use indexmap::IndexSet;
use parking_lot::RwLock;
use tracing::trace;

use super::context::ReactiveContext;
use super::subscriber::SubscriberId;

/// A computation that can be notified when its dependencies change.
pub trait Observer: Send + Sync {
    /// Get the subscriber ID for this computation.
    fn subscriber_id(&self) -> SubscriberId;

    /// Mark this computation as potentially needing update.
    ///
    /// A lazy source that just went stale returns its own source ID, so the
    /// runtime marks its readers as well.
    fn mark_maybe_dirty(&self) -> Option<u64>;

    /// Bring this computation up to date (eager observers only).
    fn schedule(&self);

    /// Whether this computation runs as soon as a dependency changes.
    fn is_eager(&self) -> bool;
}

/// Handle to a registered observer.
///
/// Dropping this handle unregisters the observer from the runtime.
#[derive(Debug)]
pub struct ReactiveHandle {
    subscriber_id: SubscriberId,
}

impl Drop for ReactiveHandle {
    fn drop(&mut self) {
        Runtime::unregister(self.subscriber_id);
    }
}

/// The global reactive runtime.
pub struct Runtime;

type Registry = RwLock<HashMap<SubscriberId, Weak<dyn Observer>>>;
type SourceSubscribers = RwLock<HashMap<u64, IndexSet<SubscriberId>>>;

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static SOURCE_SUBSCRIBERS: OnceLock<SourceSubscribers> = OnceLock::new();

fn get_registry() -> &'static Registry {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

fn get_source_subscribers() -> &'static SourceSubscribers {
    SOURCE_SUBSCRIBERS.get_or_init(|| RwLock::new(HashMap::new()))
}

impl Runtime {
    /// Register an observer with the runtime.
    ///
    /// Returns a handle that unregisters the observer when dropped.
    pub fn register(observer: Arc<dyn Observer>) -> ReactiveHandle {
        let id = observer.subscriber_id();

        get_registry()
            .write()
            .insert(id, Arc::downgrade(&observer));

        ReactiveHandle { subscriber_id: id }
    }

    fn unregister(id: SubscriberId) {
        get_registry().write().remove(&id);
        Self::clear_dependencies(id);
    }

    /// Record a read of `source_id` by the current computation, if any.
    pub fn track(source_id: u64) {
        if let Some(subscriber_id) = ReactiveContext::current_subscriber() {
            ReactiveContext::track_dependency(source_id);
            Self::add_dependency(source_id, subscriber_id);
        }
    }

    /// Record that a subscriber depends on a source.
    pub fn add_dependency(source_id: u64, subscriber_id: SubscriberId) {
        get_source_subscribers()
            .write()
            .entry(source_id)
            .or_default()
            .insert(subscriber_id);
    }

    /// Remove all dependencies for a subscriber.
    ///
    /// Called before re-running a computation to clear stale dependencies,
    /// and when a computation is disposed.
    pub fn clear_dependencies(subscriber_id: SubscriberId) {
        let mut subscribers = get_source_subscribers().write();

        for subs in subscribers.values_mut() {
            subs.shift_remove(&subscriber_id);
        }
        subscribers.retain(|_, subs| !subs.is_empty());
    }

    /// Drop every subscription to a source that no longer exists.
    pub fn forget_source(source_id: u64) {
        get_source_subscribers().write().remove(&source_id);
    }

    /// Number of computations currently subscribed to a source.
    pub fn subscriber_count(source_id: u64) -> usize {
        get_source_subscribers()
            .read()
            .get(&source_id)
            .map_or(0, IndexSet::len)
    }

    /// Notify all subscribers that a source changed.
    ///
    /// Every live subscriber is marked first, including the readers of lazy
    /// memos that went stale on the way. Eager ones are scheduled only after
    /// that, so a scheduled computation that reads a sibling memo sees it as
    /// dirty and pulls a fresh value.
    pub fn notify_source_change(source_id: u64) {
        let marked = Self::mark_stale(source_id);
        if marked.is_empty() {
            return;
        }

        trace!(source_id, subscribers = marked.len(), "source changed");

        for observer in marked.iter().filter(|o| o.is_eager()) {
            observer.schedule();
        }
    }

    /// Mark everything downstream of `source_id`, in discovery order.
    fn mark_stale(source_id: u64) -> Vec<Arc<dyn Observer>> {
        let mut seen = HashSet::new();
        let mut marked = Vec::new();
        let mut pending = vec![source_id];

        while let Some(source) = pending.pop() {
            for observer in Self::observers_of(source) {
                if !seen.insert(observer.subscriber_id()) {
                    continue;
                }
                if let Some(relayed) = observer.mark_maybe_dirty() {
                    pending.push(relayed);
                }
                marked.push(observer);
            }
        }

        marked
    }

    fn observers_of(source_id: u64) -> Vec<Arc<dyn Observer>> {
        let subscriber_ids: Vec<SubscriberId> = get_source_subscribers()
            .read()
            .get(&source_id)
            .map(|subs| subs.iter().copied().collect())
            .unwrap_or_default();

        if subscriber_ids.is_empty() {
            return Vec::new();
        }

        let registry = get_registry().read();
        subscriber_ids
            .iter()
            .filter_map(|id| registry.get(id).and_then(Weak::upgrade))
            .collect()
    }

    /// Get the current subscriber being tracked, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        ReactiveContext::current_subscriber()
    }

    /// Check if we're inside a tracking context.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }
}
