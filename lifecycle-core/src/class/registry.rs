//! Class Metadata
//!
//! Each reactive class is described once by a [`ClassMeta`]: the ordered
//! registry of effect methods that auto-run at construction, and the views
//! that locate every ancestor part inside an instance of the class.
//!
//! Metadata lives in a process-wide side table keyed by [`TypeId`]. It is
//! built by [`Reactive::define`] the first time the class is resolved and is
//! read-only afterwards.
//!
//! # Inheritance
//!
//! Rust has no subclassing, so a "subclass" embeds its parent and declares
//! the relationship with [`ClassDef::extends`], passing a projection from the
//! child to the embedded parent. The child's registry becomes the union of
//! the parent's (first, in the parent's order) and its own declarations. A
//! child effect with the same name as an inherited one replaces it in the
//! inherited position, whether it is declared before or after `extends`.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use indexmap::IndexMap;
use tracing::debug;

use super::lifecycle::Reactive;
use super::member::{EffectMethod, MemoGetter};
use crate::error::{LifecycleError, Result};

/// A type-erased instance (or part of one).
pub(crate) type Object = dyn std::any::Any + Send + Sync;

/// Locates one class's part inside an instance of the root class.
pub(crate) type View = Arc<dyn for<'a> Fn(&'a Object) -> Option<&'a Object> + Send + Sync>;

fn view<F>(f: F) -> View
where
    F: for<'a> Fn(&'a Object) -> Option<&'a Object> + Send + Sync + 'static,
{
    Arc::new(f)
}

type EffectInvoker = Arc<dyn Fn(&Object) -> Result<()> + Send + Sync>;

/// An effect method registered on a class.
#[derive(Clone)]
pub(crate) struct RegisteredEffect {
    pub(crate) name: &'static str,
    /// The class that declared the effect.
    pub(crate) class: TypeId,
    /// Arms the effect, given that class's part of an instance.
    pub(crate) invoke: EffectInvoker,
}

/// Resolved, immutable metadata for one class.
pub struct ClassMeta {
    name: &'static str,
    effects: IndexMap<&'static str, RegisteredEffect>,
    views: HashMap<TypeId, View>,
}

impl ClassMeta {
    /// The Rust type name of the class.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Effect methods run at construction, in the order they run.
    pub fn effect_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.effects.keys().copied()
    }

    /// Number of effect methods run at construction.
    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }

    /// Whether `P` is this class or one of its declared ancestors.
    pub fn is_a<P: Reactive>(&self) -> bool {
        self.views.contains_key(&TypeId::of::<P>())
    }

    pub(crate) fn effects(&self) -> impl Iterator<Item = &RegisteredEffect> {
        self.effects.values()
    }

    pub(crate) fn view(&self, class: TypeId) -> Option<&View> {
        self.views.get(&class)
    }
}

impl std::fmt::Debug for ClassMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassMeta")
            .field("name", &self.name)
            .field("effects", &self.effects.keys().collect::<Vec<_>>())
            .field("classes", &self.views.len())
            .finish()
    }
}

/// Builder handed to [`Reactive::define`].
pub struct ClassDef<C> {
    meta: ClassMeta,
    _class: PhantomData<fn() -> C>,
}

impl<C: Reactive> ClassDef<C> {
    fn new() -> Self {
        let mut views = HashMap::new();
        views.insert(TypeId::of::<C>(), view(|this| Some(this)));

        Self {
            meta: ClassMeta {
                name: type_name::<C>(),
                effects: IndexMap::new(),
                views,
            },
            _class: PhantomData,
        }
    }

    /// Register an effect method to run when an instance is constructed.
    pub fn effect(&mut self, member: &'static EffectMethod<C>) -> &mut Self {
        let invoke: EffectInvoker = Arc::new(move |this: &Object| match this.downcast_ref::<C>() {
            Some(this) => member.call(this),
            None => Err(LifecycleError::NotInitialized {
                member: member.name(),
            }),
        });

        self.meta.effects.insert(
            member.name(),
            RegisteredEffect {
                name: member.name(),
                class: TypeId::of::<C>(),
                invoke,
            },
        );
        self
    }

    /// Check an accessor memo as part of the class definition.
    ///
    /// Fails with [`LifecycleError::InvalidMemberKind`] when the wrapped
    /// member is not an accessor, which makes the whole class unusable.
    pub fn memo_getter<T>(&mut self, member: &'static MemoGetter<C, T>) -> Result<&mut Self> {
        member.validate()?;
        Ok(self)
    }

    /// Declare `P` as the parent class, embedded in `C` at `project`.
    ///
    /// Inherits `P`'s effect registry and ancestor views.
    pub fn extends<P: Reactive>(&mut self, project: fn(&C) -> &P) -> Result<&mut Self> {
        let parent = class_of::<P>()?;

        let to_parent = view(move |root| {
            root.downcast_ref::<C>()
                .map(|this| project(this) as &Object)
        });

        for (class, parent_view) in &parent.views {
            let to_parent = to_parent.clone();
            let parent_view = parent_view.clone();
            self.meta
                .views
                .entry(*class)
                .or_insert_with(|| view(move |root| to_parent(root).and_then(|part| parent_view(part))));
        }

        let mut own = std::mem::take(&mut self.meta.effects);
        let mut effects: IndexMap<&'static str, RegisteredEffect> = parent
            .effects
            .iter()
            .map(|(name, effect)| {
                let effect = own.shift_remove(name).unwrap_or_else(|| effect.clone());
                (*name, effect)
            })
            .collect();
        effects.extend(own);
        self.meta.effects = effects;

        Ok(self)
    }
}

static CLASSES: OnceLock<DashMap<TypeId, Arc<ClassMeta>>> = OnceLock::new();

fn get_classes() -> &'static DashMap<TypeId, Arc<ClassMeta>> {
    CLASSES.get_or_init(DashMap::new)
}

/// Resolve the metadata of class `C`, defining it on first use.
///
/// A definition error is returned on every attempt; the class cannot be
/// constructed until it is fixed.
pub fn class_of<C: Reactive>() -> Result<Arc<ClassMeta>> {
    let classes = get_classes();
    let key = TypeId::of::<C>();

    if let Some(meta) = classes.get(&key) {
        return Ok(meta.value().clone());
    }

    let mut def = ClassDef::<C>::new();
    C::define(&mut def)?;
    let meta = Arc::new(def.meta);

    debug!(
        class = meta.name,
        effects = ?meta.effects.keys().collect::<Vec<_>>(),
        "class defined"
    );

    let meta = classes.entry(key).or_insert(meta).value().clone();
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{Lifecycle, Member, MemoOptions};
    use crate::error::MemberKind;

    struct Base {
        lifecycle: Lifecycle,
    }

    impl Base {
        fn noop(&self) -> Result<()> {
            Ok(())
        }
    }

    static BASE_FIRST: EffectMethod<Base> = EffectMethod::new("first", Base::noop);
    static BASE_SECOND: EffectMethod<Base> = EffectMethod::new("second", Base::noop);

    impl Reactive for Base {
        fn lifecycle(&self) -> &Lifecycle {
            &self.lifecycle
        }

        fn define(class: &mut ClassDef<Self>) -> Result<()> {
            class.effect(&BASE_FIRST).effect(&BASE_SECOND);
            Ok(())
        }
    }

    struct Child {
        base: Base,
    }

    impl Child {
        fn noop(&self) -> Result<()> {
            Ok(())
        }
    }

    fn child_base(this: &Child) -> &Base {
        &this.base
    }

    static CHILD_OWN: EffectMethod<Child> = EffectMethod::new("own", Child::noop);
    static CHILD_FIRST: EffectMethod<Child> = EffectMethod::new("first", Child::noop);
    static CHILD_SECOND: EffectMethod<Child> = EffectMethod::new("second", Child::noop);

    impl Reactive for Child {
        fn lifecycle(&self) -> &Lifecycle {
            self.base.lifecycle()
        }

        fn define(class: &mut ClassDef<Self>) -> Result<()> {
            // Declared before `extends` on purpose: ancestors still come first.
            class.effect(&CHILD_OWN).effect(&CHILD_FIRST);
            class.extends(child_base)?.effect(&CHILD_SECOND);
            Ok(())
        }
    }

    struct Broken {
        lifecycle: Lifecycle,
    }

    static BROKEN_TOTAL: MemoGetter<Broken, i32> =
        MemoGetter::new("total", MemoOptions::EAGER, Member::method(|_| 0));

    impl Reactive for Broken {
        fn lifecycle(&self) -> &Lifecycle {
            &self.lifecycle
        }

        fn define(class: &mut ClassDef<Self>) -> Result<()> {
            class.memo_getter(&BROKEN_TOTAL)?;
            Ok(())
        }
    }

    #[test]
    fn registry_keeps_declaration_order() {
        let meta = class_of::<Base>().unwrap();
        assert_eq!(meta.effect_names().collect::<Vec<_>>(), vec!["first", "second"]);
    }

    #[test]
    fn child_registry_is_union_with_ancestors_first() {
        let meta = class_of::<Child>().unwrap();
        assert_eq!(
            meta.effect_names().collect::<Vec<_>>(),
            vec!["first", "second", "own"]
        );
        assert!(meta.is_a::<Base>());
        assert!(meta.is_a::<Child>());

        let second = meta.effects().find(|e| e.name == "second").unwrap();
        assert_eq!(second.class, TypeId::of::<Child>());
    }

    #[test]
    fn override_keeps_inherited_position_either_side_of_extends() {
        let meta = class_of::<Child>().unwrap();
        let owners: Vec<_> = meta.effects().map(|e| (e.name, e.class)).collect();
        assert_eq!(
            owners,
            vec![
                ("first", TypeId::of::<Child>()),
                ("second", TypeId::of::<Child>()),
                ("own", TypeId::of::<Child>()),
            ]
        );
    }

    #[test]
    fn metadata_is_computed_once() {
        let a = class_of::<Base>().unwrap();
        let b = class_of::<Base>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn accessor_memo_on_method_fails_definition() {
        let error = class_of::<Broken>().unwrap_err();
        assert_eq!(
            error,
            LifecycleError::InvalidMemberKind {
                member: "total",
                expected: MemberKind::Accessor,
                found: MemberKind::Method,
            }
        );
        // Still broken on the next attempt
        assert!(class_of::<Broken>().is_err());
    }
}
