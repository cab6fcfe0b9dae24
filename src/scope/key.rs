// SPDX-License-Identifier: MIT OR Apache-2.0

//! Type-erased keys and values.

use std::any::{Any, TypeId};
use std::borrow::Borrow;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A value stored in a scope.
///
/// Values are shared, so a lookup hands out another reference rather than a copy.
/// Use [`ScopeExt::lookup_as`](super::ScopeExt::lookup_as) to get a typed view.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Anything that can be used to look up a [`Value`].
///
/// This trait is implemented for every `'static` type that is `Eq + Hash + Debug + Send + Sync`,
/// so you never implement it yourself. Two keys are equal only when they have the same
/// concrete type *and* compare equal: `1u32` and `1u64` are different keys, and so are
/// `"id"` and `String::from("id")`.
///
/// A dedicated unit struct is the usual way to get a key nobody else can collide with:
///
/// ```rust
/// use strata::LayeredContext;
/// use strata::scope::{Scope, ScopeExt};
///
/// #[derive(Debug, PartialEq, Eq, Hash)]
/// struct RequestId;
///
/// let ctx = LayeredContext::root();
/// ctx.attach(RequestId, 42u64);
/// assert_eq!(*ctx.lookup_as::<u64>(&RequestId).unwrap(), 42);
/// ```
pub trait Key: Any + Debug + Send + Sync + 'static {
    #[doc(hidden)]
    fn as_any(&self) -> &dyn Any;
    #[doc(hidden)]
    fn key_eq(&self, other: &dyn Key) -> bool;
    #[doc(hidden)]
    fn key_hash(&self, state: &mut dyn Hasher);
}

impl<T> Key for T
where
    T: Any + Eq + Hash + Debug + Send + Sync,
{
    #[inline]
    fn as_any(&self) -> &dyn Any {
        self
    }

    #[inline]
    fn key_eq(&self, other: &dyn Key) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }

    fn key_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }
}

impl PartialEq for dyn Key {
    fn eq(&self, other: &Self) -> bool {
        self.key_eq(other)
    }
}

impl Eq for dyn Key {}

impl Hash for dyn Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key_hash(state)
    }
}

/// An owned, type-erased key, as stored in overlays and value layers.
#[derive(Debug)]
pub(crate) struct OwnedKey(Box<dyn Key>);

impl OwnedKey {
    pub(crate) fn new<K: Key>(key: K) -> Self {
        OwnedKey(Box::new(key))
    }

    #[inline]
    pub(crate) fn as_dyn(&self) -> &dyn Key {
        self.0.as_ref()
    }
}

// Go through `as_dyn` everywhere: `Box<dyn Key>` is itself a `Key`, and calling the
// trait methods on the box would compare boxes instead of what they hold.
impl PartialEq for OwnedKey {
    fn eq(&self, other: &Self) -> bool {
        self.as_dyn() == other.as_dyn()
    }
}

impl Eq for OwnedKey {}

impl Hash for OwnedKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_dyn().hash(state)
    }
}

impl Borrow<dyn Key> for OwnedKey {
    fn borrow(&self) -> &(dyn Key + 'static) {
        self.as_dyn()
    }
}
