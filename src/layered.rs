// SPDX-License-Identifier: MIT OR Apache-2.0

//! The layered context: an upstream scope plus a local, mutable value overlay.

#[cfg(test)]
mod tests;

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock};

use crate::scope::{self, CancelReason, Done, Key, OwnedKey, Scope, Value};
use crate::time::Instant;

struct LayeredInner {
    /// Guarded separately from the overlay so a swap never waits on value traffic.
    upstream: RwLock<Arc<dyn Scope>>,
    overlay: RwLock<HashMap<OwnedKey, Value>>,
}

/// A request-scoped context: cancellation and deadline from an upstream [`Scope`], values from
/// a local overlay first and the upstream second.
///
/// # Aliasing
///
/// **`LayeredContext` is a handle, and [`attach`](LayeredContext::attach) mutates in place.**
/// Cloning a `LayeredContext`, or keeping the value `attach` returns, gives you another handle
/// to the *same* overlay. A value attached through any handle is visible through every handle,
/// including ones taken before the write:
///
/// ```rust
/// use strata::LayeredContext;
/// use strata::scope::ScopeExt;
///
/// let c1 = LayeredContext::root();
/// let c2 = c1.attach("a", 1i32);
/// c1.attach("b", 2i32);
/// assert_eq!(*c2.lookup_as::<i32>(&"b").unwrap(), 2);
/// assert_eq!(c1, c2);
/// ```
///
/// If you need a layer whose writes stay private, use [`derive`](LayeredContext::derive) or
/// [`scope::with_value`].
///
/// # Lookup order
///
/// [`lookup`](Scope::lookup) probes the overlay under a read lock, releases the lock, and only
/// then asks the upstream. Overlay entries therefore shadow anything the upstream chain holds
/// for the same key.
///
/// # Upstream
///
/// The upstream can be replaced at any time with [`set_upstream`](LayeredContext::set_upstream).
/// The swap is atomic: every query sees either the old or the new upstream, and queries
/// started after `set_upstream` returns see the new one. Deadline, signal and reason are read
/// through to the upstream on every call and never cached.
///
/// ```rust
/// use strata::LayeredContext;
/// use strata::scope::{self, Scope, CancelReason};
///
/// let ctx = LayeredContext::root();
/// assert_eq!(ctx.deadline(), None);
///
/// let (upstream, cancel) = scope::with_cancel(scope::background());
/// ctx.set_upstream(upstream);
/// cancel.cancel();
/// assert_eq!(ctx.cancel_reason(), Some(CancelReason::Cancelled));
/// ```
#[derive(Clone)]
pub struct LayeredContext {
    inner: Arc<LayeredInner>,
}

impl LayeredContext {
    /// Creates a context over `upstream` with an empty overlay.
    pub fn new(upstream: Arc<dyn Scope>) -> LayeredContext {
        LayeredContext {
            inner: Arc::new(LayeredInner {
                upstream: RwLock::new(upstream),
                overlay: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Creates a context over [`scope::background`]: no deadline, never cancelled.
    pub fn root() -> LayeredContext {
        LayeredContext::new(scope::background())
    }

    /// Returns the current upstream scope.
    pub fn upstream(&self) -> Arc<dyn Scope> {
        self.inner
            .upstream
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the upstream scope used by every delegated query.
    ///
    /// The overlay is untouched.
    pub fn set_upstream(&self, upstream: Arc<dyn Scope>) {
        let previous = std::mem::replace(
            &mut *self
                .inner
                .upstream
                .write()
                .unwrap_or_else(PoisonError::into_inner),
            upstream,
        );
        // the old upstream may be the last reference to a whole scope chain; release it unlocked
        drop(previous);
    }

    /// Sets `key` to `value` in this context's overlay, replacing any earlier value for `key`.
    ///
    /// Returns another handle to **this same context**, not a new one; see the
    /// [type-level docs](LayeredContext#aliasing).
    pub fn attach<K, V>(&self, key: K, value: V) -> LayeredContext
    where
        K: Key,
        V: Any + Send + Sync,
    {
        self.attach_value(key, Arc::new(value))
    }

    /// Like [`attach`](LayeredContext::attach), for a value that is already shared.
    pub fn attach_value<K: Key>(&self, key: K, value: Value) -> LayeredContext {
        let key = OwnedKey::new(key);
        let previous = self
            .inner
            .overlay
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value);
        drop(previous);
        self.clone()
    }

    /// Creates a new context layered on top of this one.
    ///
    /// The new context has its own, initially empty, overlay: values attached to it are not
    /// visible here, while values attached here stay visible there unless shadowed.
    /// Cancellation and deadline are this context's, including any later
    /// [`set_upstream`](LayeredContext::set_upstream) on it.
    ///
    /// ```rust
    /// use strata::LayeredContext;
    /// use strata::scope::{Scope, ScopeExt};
    ///
    /// let parent = LayeredContext::root();
    /// parent.attach("user", "alice");
    /// let child = parent.derive();
    /// child.attach("user", "bob");
    /// assert_eq!(*parent.lookup_as::<&str>(&"user").unwrap(), "alice");
    /// assert_eq!(*child.lookup_as::<&str>(&"user").unwrap(), "bob");
    /// ```
    pub fn derive(&self) -> LayeredContext {
        LayeredContext::new(Arc::new(self.clone()))
    }
}

impl Default for LayeredContext {
    fn default() -> Self {
        LayeredContext::root()
    }
}

impl Scope for LayeredContext {
    fn deadline(&self) -> Option<Instant> {
        self.upstream().deadline()
    }

    fn cancel_signal(&self) -> Done {
        self.upstream().cancel_signal()
    }

    fn cancel_reason(&self) -> Option<CancelReason> {
        self.upstream().cancel_reason()
    }

    fn lookup(&self, key: &dyn Key) -> Option<Value> {
        let local = self
            .inner
            .overlay
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();
        if local.is_some() {
            return local;
        }
        logwise::trace_sync!(
            "strata: {key} not in overlay, asking upstream",
            key = logwise::privacy::LogIt(key)
        );
        self.upstream().lookup(key)
    }
}

impl Debug for LayeredContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self
            .inner
            .overlay
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("LayeredContext")
            .field("upstream", &self.upstream())
            .field("entries", &entries)
            .finish()
    }
}

impl PartialEq for LayeredContext {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for LayeredContext {}

impl Hash for LayeredContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.inner).hash(state);
    }
}

/*
Boilerplate notes.

Clone is a handle copy, same as the overlay it points at.  That's the aliasing contract.
PartialEq/Eq/Hash are identity, like Clone.  Comparing overlays would need Eq on dyn Any.
Default is root().
Display: nothing sensible to show.
*/
