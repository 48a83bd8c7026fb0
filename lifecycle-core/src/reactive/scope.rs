//! Disposal Scopes
//!
//! A scope groups computations so they can be cancelled together. Every
//! effect or memo created while a scope is running is adopted by it, and
//! disposing the scope disposes all of them.
//!
//! Scopes created with [`scope`] are detached roots: a scope opened while
//! another one is running is not adopted by the outer scope. This lets a
//! computation lazily create long-lived children (a memo first read inside
//! an effect, say) without tying their lifetime to the parent's next re-run.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

/// Something a scope can cancel.
pub trait Disposable: Send + Sync {
    /// Stop the computation. Must be idempotent.
    fn dispose(&self);
}

enum Owned {
    Computation(Arc<dyn Disposable>),
    Cleanup(Box<dyn FnOnce() + Send>),
}

struct ScopeInner {
    owned: Mutex<Vec<Owned>>,
    disposed: AtomicBool,
}

thread_local! {
    static SCOPE_STACK: RefCell<Vec<Scope>> = RefCell::new(Vec::new());
}

/// Handle to a disposal scope.
///
/// Clones share the same scope. Dropping the last handle of a scope that was
/// never disposed releases its computations without running cleanups.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<ScopeInner>,
}

/// Pops the scope stack when dropped.
struct ScopeGuard;

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPE_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

impl Scope {
    /// Create a new, empty root scope.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                owned: Mutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// The scope currently collecting computations on this thread, if any.
    pub fn current() -> Option<Scope> {
        SCOPE_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// Run `f` with this scope as the current one.
    ///
    /// Computations created by `f` are adopted by this scope.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        SCOPE_STACK.with(|stack| stack.borrow_mut().push(self.clone()));
        let _guard = ScopeGuard;
        f()
    }

    /// Take ownership of a computation.
    ///
    /// Adopting into an already disposed scope disposes the computation
    /// immediately.
    pub fn adopt(&self, computation: Arc<dyn Disposable>) {
        if self.is_disposed() {
            computation.dispose();
            return;
        }
        self.inner
            .owned
            .lock()
            .push(Owned::Computation(computation));
    }

    /// Register a callback to run when this scope is disposed.
    pub fn on_cleanup(&self, cleanup: impl FnOnce() + Send + 'static) {
        if self.is_disposed() {
            cleanup();
            return;
        }
        self.inner
            .owned
            .lock()
            .push(Owned::Cleanup(Box::new(cleanup)));
    }

    /// Dispose every computation and run every cleanup owned by this scope,
    /// most recent first.
    ///
    /// Calling this more than once has no further effect.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let owned = std::mem::take(&mut *self.inner.owned.lock());
        trace!(owned = owned.len(), "disposing scope");

        for entry in owned.into_iter().rev() {
            match entry {
                Owned::Computation(computation) => computation.dispose(),
                Owned::Cleanup(cleanup) => cleanup(),
            }
        }
    }

    /// Check if the scope has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Number of computations and cleanups currently owned.
    pub fn owned_count(&self) -> usize {
        self.inner.owned.lock().len()
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("owned", &self.owned_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Open a detached root scope, run `f` inside it, and return the result
/// together with the scope that now owns everything `f` created.
pub fn scope<R>(f: impl FnOnce() -> R) -> (R, Scope) {
    let scope = Scope::new();
    let result = scope.run(f);
    (result, scope)
}

/// Hand a freshly created computation to the current scope, if there is one.
pub(crate) fn adopt_current(computation: Arc<dyn Disposable>) {
    if let Some(scope) = Scope::current() {
        scope.adopt(computation);
    }
}

/// Register a cleanup with the current scope.
///
/// Outside of any scope the callback is dropped without running.
pub fn on_cleanup(cleanup: impl FnOnce() + Send + 'static) {
    match Scope::current() {
        Some(scope) => scope.on_cleanup(cleanup),
        None => trace!("on_cleanup called outside of a scope"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counted {
        disposed: AtomicUsize,
    }

    impl Disposable for Counted {
        fn dispose(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counted() -> Arc<Counted> {
        Arc::new(Counted {
            disposed: AtomicUsize::new(0),
        })
    }

    #[test]
    fn scope_adopts_and_disposes() {
        let p = counted();
        let ((), scope) = scope(|| adopt_current(p.clone()));

        assert_eq!(scope.owned_count(), 1);
        scope.dispose();
        assert_eq!(p.disposed.load(Ordering::SeqCst), 1);
        assert!(scope.is_disposed());
    }

    #[test]
    fn dispose_is_idempotent() {
        let p = counted();
        let ((), scope) = scope(|| adopt_current(p.clone()));

        scope.dispose();
        scope.dispose();
        assert_eq!(p.disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nested_scopes_are_detached() {
        let inner_counted = counted();
        let (inner, outer) = scope(|| {
            let ((), inner) = scope(|| adopt_current(inner_counted.clone()));
            inner
        });

        assert_eq!(outer.owned_count(), 0);
        outer.dispose();
        assert_eq!(inner_counted.disposed.load(Ordering::SeqCst), 0);

        inner.dispose();
        assert_eq!(inner_counted.disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cleanups_run_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let ((), scope) = scope(|| {
            for i in 0..3 {
                let order = order.clone();
                on_cleanup(move || order.lock().push(i));
            }
        });

        scope.dispose();
        assert_eq!(*order.lock(), vec![2, 1, 0]);
    }

    #[test]
    fn adopting_into_disposed_scope_disposes_immediately() {
        let scope = Scope::new();
        scope.dispose();

        let p = counted();
        scope.adopt(p.clone());
        assert_eq!(p.disposed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn current_scope_is_restored() {
        assert!(Scope::current().is_none());
        let outer = Scope::new();
        outer.run(|| {
            assert!(Scope::current().is_some());
            let ((), _inner) = scope(|| {});
            assert_eq!(
                Scope::current().map(|s| Arc::ptr_eq(&s.inner, &outer.inner)),
                Some(true)
            );
        });
        assert!(Scope::current().is_none());
    }
}
