//! Lifecycle Core
//!
//! Reactive computations with per-instance lifetimes.
//!
//! The crate has two layers:
//!
//! - `reactive`: signals, memos, effects and disposal scopes.
//! - `class`: wraps the members of a type as effects and memos that belong
//!   to one instance, are created when the instance is constructed (or first
//!   used), and are disposed when it is destroyed.
//!
//! # Example
//!
//! ```rust
//! use lifecycle_core::prelude::*;
//!
//! struct Counter {
//!     lifecycle: Lifecycle,
//!     count: Signal<i32>,
//! }
//!
//! impl Counter {
//!     fn log(&self) -> Result<()> {
//!         println!("count is {}", self.count.get());
//!         Ok(())
//!     }
//!
//!     fn doubled(&self) -> i32 {
//!         self.count.get() * 2
//!     }
//! }
//!
//! static LOG: EffectMethod<Counter> = EffectMethod::new("log", Counter::log);
//! static DOUBLED: MemoGetter<Counter, i32> =
//!     MemoGetter::new("doubled", MemoOptions::EAGER, Member::accessor(Counter::doubled));
//!
//! impl Reactive for Counter {
//!     fn lifecycle(&self) -> &Lifecycle {
//!         &self.lifecycle
//!     }
//!
//!     fn define(class: &mut ClassDef<Self>) -> Result<()> {
//!         class.effect(&LOG).memo_getter(&DOUBLED)?;
//!         Ok(())
//!     }
//! }
//!
//! let counter = construct(Counter {
//!     lifecycle: Lifecycle::new(),
//!     count: Signal::new(1),
//! })?;
//!
//! counter.count.set(5); // prints "count is 5"
//! assert_eq!(DOUBLED.get(&counter)?, 10);
//!
//! counter.destroy();
//! counter.count.set(6); // prints nothing
//! # Ok::<(), lifecycle_core::error::LifecycleError>(())
//! ```

pub mod class;
pub mod error;
pub mod reactive;

pub use error::{LifecycleError, Result};

/// The types needed to declare and use reactive classes.
pub mod prelude {
    pub use crate::class::{
        construct, ClassDef, Destroy, EffectMethod, Lifecycle, Member, MemoGetter, MemoMethod,
        MemoOptions, Reactive,
    };
    pub use crate::error::{LifecycleError, Result};
    pub use crate::reactive::{Effect, Memo, Scope, Signal};
}
