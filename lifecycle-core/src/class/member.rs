//! Member Wrapping
//!
//! The three wrappers take an ordinary member body and give it per-instance
//! reactive behaviour:
//!
//! - [`EffectMethod`]: every call disposes the member's previous effect and
//!   starts a new one that re-runs the body whenever what it read changes.
//! - [`MemoMethod`]: the first call creates a memo over the body (capturing
//!   that call's arguments); every call returns the memo's current value.
//! - [`MemoGetter`]: the same for a read-only accessor.
//!
//! Wrappers are `const`-constructible so they can be declared as `static`
//! items next to the type they belong to. Each definition gets its own
//! [`MemberId`], so two classes may reuse a member name without sharing
//! per-instance slots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use tracing::{trace, warn};

use super::lifecycle::Reactive;
use super::options::MemoOptions;
use crate::error::{LifecycleError, MemberKind, Result};
use crate::reactive::{scope, Effect, Memo};

/// Identity of one wrapped member definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberId {
    name: &'static str,
    token: u64,
}

impl MemberId {
    /// The member's declared name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Lazily assigned, process-unique token for a member definition.
struct MemberToken(OnceLock<u64>);

impl MemberToken {
    const fn new() -> Self {
        Self(OnceLock::new())
    }

    fn get(&self) -> u64 {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        *self.0.get_or_init(|| NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A class member body tagged with its kind.
pub enum Member<C, T> {
    Method(fn(&C) -> T),
    Accessor(fn(&C) -> T),
}

impl<C, T> Member<C, T> {
    /// Wrap an ordinary method.
    pub const fn method(body: fn(&C) -> T) -> Self {
        Member::Method(body)
    }

    /// Wrap a read-only computed accessor.
    pub const fn accessor(body: fn(&C) -> T) -> Self {
        Member::Accessor(body)
    }

    /// Whether this is a method or an accessor.
    pub fn kind(&self) -> MemberKind {
        match self {
            Member::Method(_) => MemberKind::Method,
            Member::Accessor(_) => MemberKind::Accessor,
        }
    }

    fn body(&self) -> fn(&C) -> T {
        match self {
            Member::Method(body) | Member::Accessor(body) => *body,
        }
    }
}

impl<C, T> Clone for Member<C, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C, T> Copy for Member<C, T> {}

/// A method that runs as a reactive effect, re-armed on every call.
///
/// Register it with [`ClassDef::effect`](super::ClassDef::effect) to have it
/// armed automatically when an instance is constructed.
///
/// ```rust
/// use lifecycle_core::class::{EffectMethod, Lifecycle, Reactive};
/// use lifecycle_core::error::Result;
///
/// struct Logger {
///     lifecycle: Lifecycle,
/// }
///
/// impl Logger {
///     fn log(&self) -> Result<()> {
///         Ok(())
///     }
/// }
///
/// static LOG: EffectMethod<Logger> = EffectMethod::new("log", Logger::log);
///
/// impl Reactive for Logger {
///     fn lifecycle(&self) -> &Lifecycle {
///         &self.lifecycle
///     }
/// }
///
/// let logger = Logger { lifecycle: Lifecycle::new() };
/// assert!(LOG.call(&logger).is_err());
/// ```
pub struct EffectMethod<C> {
    name: &'static str,
    body: fn(&C) -> Result<()>,
    token: MemberToken,
}

impl<C> EffectMethod<C> {
    /// Wrap `body` as the effect method `name`.
    pub const fn new(name: &'static str, body: fn(&C) -> Result<()>) -> Self {
        Self {
            name,
            body,
            token: MemberToken::new(),
        }
    }

    /// The member's declared name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Identity of this definition, used to key per-instance slots.
    pub fn id(&self) -> MemberId {
        MemberId {
            name: self.name,
            token: self.token.get(),
        }
    }
}

impl<C: Reactive> EffectMethod<C> {
    /// Arm (or re-arm) this effect on `this`.
    ///
    /// The previous effect for this member, if any, is disposed before the
    /// new one starts, so at most one is ever live per instance. The body
    /// runs once before this returns. Errors returned by the body are
    /// logged, since later runs have no caller to report to.
    pub fn call(&self, this: &C) -> Result<()> {
        let id = self.id();
        let lifecycle = this.lifecycle();
        let binding = lifecycle.binding_for::<C>(self.name)?;

        if let Some(previous) = lifecycle.take_disposer(id) {
            trace!(member = self.name, "disposing superseded effect");
            previous.dispose();
        }

        let name = self.name;
        let body = self.body;
        let ((), scope) = scope(move || {
            Effect::new(move || match binding.with::<C, _>(body) {
                Some(Ok(())) => {}
                Some(Err(error)) => warn!(member = name, %error, "effect failed"),
                None => trace!(member = name, "effect outlived its instance"),
            });
        });

        lifecycle.record_disposer(id, scope);
        Ok(())
    }
}

/// A method whose result is memoized per instance.
///
/// Only the arguments of the first call are captured; later calls return
/// the memo's current value whatever arguments they pass.
pub struct MemoMethod<C, A, T> {
    name: &'static str,
    options: MemoOptions,
    body: fn(&C, A) -> T,
    token: MemberToken,
}

impl<C, A, T> MemoMethod<C, A, T> {
    /// Wrap `body` as the memo method `name`.
    pub const fn new(name: &'static str, options: MemoOptions, body: fn(&C, A) -> T) -> Self {
        Self {
            name,
            options,
            body,
            token: MemberToken::new(),
        }
    }

    /// The member's declared name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the memo is eager or lazy.
    pub fn options(&self) -> MemoOptions {
        self.options
    }

    /// Identity of this definition, used to key per-instance slots.
    pub fn id(&self) -> MemberId {
        MemberId {
            name: self.name,
            token: self.token.get(),
        }
    }
}

impl<C, A, T> MemoMethod<C, A, T>
where
    C: Reactive,
    A: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Return the memoized value, creating the memo on first call.
    pub fn call(&self, this: &C, args: A) -> Result<T> {
        let body = self.body;
        memoize(this, self.id(), self.options, move |this: &C| {
            body(this, args.clone())
        })
    }
}

/// A read-only accessor whose value is memoized per instance.
pub struct MemoGetter<C, T> {
    name: &'static str,
    options: MemoOptions,
    member: Member<C, T>,
    token: MemberToken,
}

impl<C, T> MemoGetter<C, T> {
    /// Wrap `member` as the memo accessor `name`.
    ///
    /// `member` must be an accessor; see [`validate`](Self::validate).
    pub const fn new(name: &'static str, options: MemoOptions, member: Member<C, T>) -> Self {
        Self {
            name,
            options,
            member,
            token: MemberToken::new(),
        }
    }

    /// The member's declared name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the memo is eager or lazy.
    pub fn options(&self) -> MemoOptions {
        self.options
    }

    /// Identity of this definition, used to key per-instance slots.
    pub fn id(&self) -> MemberId {
        MemberId {
            name: self.name,
            token: self.token.get(),
        }
    }

    /// Check that the wrapped member is an accessor.
    pub fn validate(&self) -> Result<()> {
        match self.member.kind() {
            MemberKind::Accessor => Ok(()),
            found => Err(LifecycleError::InvalidMemberKind {
                member: self.name,
                expected: MemberKind::Accessor,
                found,
            }),
        }
    }
}

impl<C, T> MemoGetter<C, T>
where
    C: Reactive,
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Return the memoized value, creating the memo on first access.
    pub fn get(&self, this: &C) -> Result<T> {
        self.validate()?;
        memoize(this, self.id(), self.options, self.member.body())
    }
}

/// Read the member's memo, creating it inside its own scope on first use.
fn memoize<C, T, F>(this: &C, id: MemberId, options: MemoOptions, compute: F) -> Result<T>
where
    C: Reactive,
    T: Clone + Send + Sync + PartialEq + 'static,
    F: Fn(&C) -> T + Send + Sync + 'static,
{
    let lifecycle = this.lifecycle();

    let memo = match lifecycle.memo_slot::<T>(id) {
        Some(memo) => memo,
        None => {
            let (binding, destroyed) = lifecycle.memo_binding_for::<C>(id.name())?;
            let (memo, scope) = scope(move || {
                let read = move || binding.with::<C, _>(&compute);
                if options.is_lazy || destroyed {
                    Memo::new_lazy(read)
                } else {
                    Memo::new(read)
                }
            });
            if destroyed {
                // Nothing can invalidate it now: computed once, untracked, on read.
                scope.dispose();
            }
            trace!(member = id.name(), lazy = options.is_lazy, destroyed, "memo created");
            lifecycle.install_memo(id, memo, scope)
        }
    };

    memo.get()
        .ok_or(LifecycleError::InstanceDropped { member: id.name() })
}
