//! Reactive Classes
//!
//! Maps the members of a type onto reactive computations whose lifetime is
//! tied to the instance:
//!
//! - [`EffectMethod`]: a method that re-runs whenever what it read changes.
//! - [`MemoMethod`] and [`MemoGetter`]: memoized members, eager or lazy.
//! - [`construct`] / [`Destroy`]: create a live instance with its effects
//!   armed, and tear everything down again.
//!
//! Classes describe themselves through [`Reactive::define`]; the resulting
//! [`ClassMeta`] is computed once per type.

mod lifecycle;
mod member;
mod options;
mod registry;

pub use lifecycle::{construct, Destroy, Lifecycle, LifecycleState, Reactive};
pub use member::{EffectMethod, Member, MemberId, MemoGetter, MemoMethod};
pub use options::MemoOptions;
pub use registry::{class_of, ClassDef, ClassMeta};
