// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cancellable, deadline-bearing scopes.
//!
//! A scope answers four questions: when must the work be done by ([`Scope::deadline`]), how do
//! I find out it was abandoned ([`Scope::cancel_signal`]), why was it abandoned
//! ([`Scope::cancel_reason`]), and what did my callers tell me ([`Scope::lookup`]).
//!
//! Scopes form a tree. Every tree is rooted at [`background`], which never ends. Children are
//! derived with:
//!
//! - [`with_cancel`]: ends when its [`CancelHandle`] is used
//! - [`with_deadline`] / [`with_timeout`]: also ends when a point in time passes
//! - [`with_value`]: carries one value, adds no cancellation of its own
//!
//! Ending a scope ends all of its descendants with the same [`CancelReason`]. Ending a child
//! never affects its parent.
//!
//! ```rust
//! use strata::scope::{self, Scope, ScopeExt, CancelReason};
//! use std::time::Duration;
//!
//! let request = scope::with_value(scope::background(), "request_id", 7u64);
//! let (request, cancel) = scope::with_timeout(request, Duration::from_secs(30));
//!
//! // deep in the call chain
//! assert_eq!(*request.lookup_as::<u64>(&"request_id").unwrap(), 7);
//! assert!(request.deadline().is_some());
//!
//! cancel.cancel();
//! assert_eq!(request.cancel_reason(), Some(CancelReason::Cancelled));
//! ```
//!
//! # Deadlines
//!
//! Deadline scopes are ended by a single background thread, started the first time a deadline
//! is scheduled. It holds only weak references, so a pending deadline never keeps a scope alive.
//!
//! # Values
//!
//! Keys are any `Eq + Hash + Debug + Send + Sync + 'static` type (see [`Key`]); values are any
//! `Send + Sync + 'static` type, shared as a [`Value`]. [`ScopeExt::lookup_as`] looks up and
//! downcasts in one step.

mod cancel;
mod done;
mod key;
mod reason;
mod timer;
mod value;
mod with_cancellation;


use std::any::Any;
use std::fmt::Debug;
use std::sync::{Arc, OnceLock};

use crate::time::Instant;

pub use cancel::{CancelHandle, with_cancel, with_deadline, with_timeout};
pub use done::Done;
pub use key::{Key, Value};
pub use reason::CancelReason;
pub use value::with_value;
pub use with_cancellation::{WithCancellation, with_cancellation};

pub(crate) use key::OwnedKey;

/// The capabilities every scope offers.
///
/// The trait is object safe; scopes are passed around as `Arc<dyn Scope>` and may wrap one
/// another to any depth. [`LayeredContext`](crate::LayeredContext) implements it as well, so it
/// can sit anywhere in a chain.
pub trait Scope: Debug + Send + Sync {
    /// The point in time by which work in this scope should be done, if any.
    fn deadline(&self) -> Option<Instant>;

    /// A signal that fires once this scope ends.
    ///
    /// Implementations return the same signal every time.
    fn cancel_signal(&self) -> Done;

    /// Why this scope ended. `None` while it is live.
    fn cancel_reason(&self) -> Option<CancelReason>;

    /// The value associated with `key` in this scope or the nearest ancestor that has one.
    fn lookup(&self, key: &dyn Key) -> Option<Value>;
}

/// Conveniences available on every [`Scope`].
pub trait ScopeExt: Scope {
    /// Looks up `key` and downcasts the value to `T`.
    ///
    /// Returns `None` if the key is absent *or* holds a value of some other type.
    fn lookup_as<T: Any + Send + Sync>(&self, key: &dyn Key) -> Option<Arc<T>> {
        self.lookup(key)?.downcast::<T>().ok()
    }

    /// True once this scope has ended.
    fn is_ended(&self) -> bool {
        self.cancel_reason().is_some()
    }
}

impl<S: Scope + ?Sized> ScopeExt for S {}

#[derive(Debug)]
struct Background {
    done: Done,
}

impl Scope for Background {
    fn deadline(&self) -> Option<Instant> {
        None
    }

    fn cancel_signal(&self) -> Done {
        self.done.clone()
    }

    fn cancel_reason(&self) -> Option<CancelReason> {
        None
    }

    fn lookup(&self, _key: &dyn Key) -> Option<Value> {
        None
    }
}

static BACKGROUND: OnceLock<Arc<dyn Scope>> = OnceLock::new();

/// The root scope: no deadline, no values, never ends.
///
/// Every call returns the same scope, so its [`cancel_signal`](Scope::cancel_signal) is stable
/// across the process.
pub fn background() -> Arc<dyn Scope> {
    BACKGROUND
        .get_or_init(|| Arc::new(Background { done: Done::new() }))
        .clone()
}
