// SPDX-License-Identifier: MIT OR Apache-2.0

use std::any::Any;
use std::sync::Arc;

use super::done::Done;
use super::key::{Key, OwnedKey, Value};
use super::reason::CancelReason;
use super::Scope;
use crate::time::Instant;

/// An immutable scope carrying exactly one value.
#[derive(Debug)]
struct ValueScope {
    parent: Arc<dyn Scope>,
    key: OwnedKey,
    value: Value,
}

impl Scope for ValueScope {
    fn deadline(&self) -> Option<Instant> {
        self.parent.deadline()
    }

    fn cancel_signal(&self) -> Done {
        self.parent.cancel_signal()
    }

    fn cancel_reason(&self) -> Option<CancelReason> {
        self.parent.cancel_reason()
    }

    fn lookup(&self, key: &dyn Key) -> Option<Value> {
        if self.key.as_dyn() == key {
            Some(self.value.clone())
        } else {
            self.parent.lookup(key)
        }
    }
}

/// Creates a child scope that maps `key` to `value` and delegates everything else to `parent`.
///
/// Unlike [`LayeredContext::attach`](crate::LayeredContext::attach), this never mutates anything:
/// `parent` and any other children of it are unaffected.
///
/// ```rust
/// use strata::scope::{self, Scope, ScopeExt};
///
/// let parent = scope::with_value(scope::background(), "user", "alice");
/// let child = scope::with_value(parent.clone(), "user", "bob");
/// assert_eq!(*parent.lookup_as::<&str>(&"user").unwrap(), "alice");
/// assert_eq!(*child.lookup_as::<&str>(&"user").unwrap(), "bob");
/// ```
pub fn with_value<K, V>(parent: Arc<dyn Scope>, key: K, value: V) -> Arc<dyn Scope>
where
    K: Key,
    V: Any + Send + Sync,
{
    Arc::new(ValueScope {
        parent,
        key: OwnedKey::new(key),
        value: Arc::new(value),
    })
}
