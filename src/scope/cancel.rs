// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cancel and deadline scopes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::done::{Done, SubscriptionID};
use super::key::{Key, Value};
use super::reason::CancelReason;
use super::{Scope, timer};
use crate::time::{Duration, Instant};

static SCOPE_ID: AtomicU64 = AtomicU64::new(0);

/// The cancellable part of a scope: its signal plus its link to the parent's signal.
#[derive(Debug)]
pub(crate) struct CancelNode {
    id: u64,
    done: Done,
    /// Set for deadline scopes. Plain cancel scopes report their parent's deadline.
    deadline: Option<Instant>,
    /// Registration on the parent's signal, released once this node ends or is dropped.
    parent_link: Mutex<Option<(Done, SubscriptionID)>>,
}

impl CancelNode {
    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn is_ended(&self) -> bool {
        self.done.is_fired()
    }

    /// Ends this scope (and through its signal, every descendant).
    ///
    /// Returns false if the scope had already ended, in which case the earlier reason stands.
    pub(crate) fn end(&self, reason: CancelReason) -> bool {
        if !self.done.fire(reason) {
            return false;
        }
        self.detach();
        logwise::debuginternal_sync!(
            "strata: scope {id} ended: {reason}",
            id = self.id,
            reason = logwise::privacy::LogIt(reason)
        );
        true
    }

    fn detach(&self) {
        let link = self
            .parent_link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((parent_done, subscription)) = link {
            parent_done.unsubscribe(subscription);
        }
    }
}

impl Drop for CancelNode {
    fn drop(&mut self) {
        self.detach();
    }
}

/// A scope created by [`with_cancel`] or [`with_deadline`].
#[derive(Debug)]
struct CancelScope {
    parent: Arc<dyn Scope>,
    node: Arc<CancelNode>,
}

impl Scope for CancelScope {
    fn deadline(&self) -> Option<Instant> {
        self.node.deadline.or_else(|| self.parent.deadline())
    }

    fn cancel_signal(&self) -> Done {
        self.node.done.clone()
    }

    fn cancel_reason(&self) -> Option<CancelReason> {
        self.node.done.reason()
    }

    fn lookup(&self, key: &dyn Key) -> Option<Value> {
        self.parent.lookup(key)
    }
}

/// Ends the scope it was created with.
///
/// Returned alongside the scope by [`with_cancel`], [`with_deadline`] and [`with_timeout`], so
/// that code receiving the scope can observe cancellation without being able to trigger it.
/// Dropping the handle does **not** cancel the scope.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    node: Arc<CancelNode>,
}

impl CancelHandle {
    /// Ends the scope with [`CancelReason::Cancelled`].
    ///
    /// Calling this on a scope that already ended, for whatever reason, does nothing.
    pub fn cancel(&self) {
        self.node.end(CancelReason::Cancelled);
    }
}

fn new_cancel_scope(
    parent: Arc<dyn Scope>,
    deadline: Option<Instant>,
) -> (Arc<CancelScope>, CancelHandle) {
    let node = Arc::new(CancelNode {
        id: SCOPE_ID.fetch_add(1, Ordering::Relaxed),
        done: Done::new(),
        deadline,
        parent_link: Mutex::new(None),
    });

    let parent_done = parent.cancel_signal();
    let weak = Arc::downgrade(&node);
    // runs immediately if the parent already ended
    let subscription = parent_done.subscribe(move |reason| {
        if let Some(node) = weak.upgrade() {
            node.end(reason);
        }
    });
    if let Some(subscription) = subscription {
        *node
            .parent_link
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((parent_done, subscription));
        // the parent may have ended between subscribing and recording the link
        if node.is_ended() {
            node.detach();
        }
    }

    let handle = CancelHandle { node: node.clone() };
    (Arc::new(CancelScope { parent, node }), handle)
}

/// Creates a child scope that ends when `cancel` is called on the returned handle, or when
/// `parent` ends, whichever comes first.
///
/// The child reports the parent's deadline and values. When the parent ends, the child ends
/// with the parent's reason.
///
/// ```rust
/// use strata::scope::{self, Scope, CancelReason};
///
/// let (parent, cancel_parent) = scope::with_cancel(scope::background());
/// let (child, _cancel_child) = scope::with_cancel(parent.clone());
/// cancel_parent.cancel();
/// assert_eq!(child.cancel_reason(), Some(CancelReason::Cancelled));
/// ```
pub fn with_cancel(parent: Arc<dyn Scope>) -> (Arc<dyn Scope>, CancelHandle) {
    let (scope, handle) = new_cancel_scope(parent, None);
    (scope, handle)
}

/// Creates a child scope that additionally ends with [`CancelReason::DeadlineExceeded`] once
/// `deadline` passes.
///
/// If `parent` already has a deadline no later than `deadline`, the child keeps the parent's
/// deadline instead, since it can never outlive it. A deadline that has already passed ends
/// the child immediately.
pub fn with_deadline(parent: Arc<dyn Scope>, deadline: Instant) -> (Arc<dyn Scope>, CancelHandle) {
    if let Some(inherited) = parent.deadline() {
        if inherited <= deadline {
            return with_cancel(parent);
        }
    }
    let (scope, handle) = new_cancel_scope(parent, Some(deadline));
    if Instant::now() >= deadline {
        scope.node.end(CancelReason::DeadlineExceeded);
    } else if !scope.node.is_ended() {
        timer::schedule(deadline, Arc::downgrade(&scope.node));
    }
    (scope, handle)
}

/// Creates a child scope that ends `timeout` from now.
///
/// ```rust
/// use strata::scope::{self, Scope};
/// use std::time::Duration;
///
/// let (scope, _cancel) = scope::with_timeout(scope::background(), Duration::from_millis(10));
/// assert!(scope.deadline().is_some());
/// let reason = scope.cancel_signal().wait();
/// assert!(reason.is_deadline_exceeded());
/// ```
///
/// A `timeout` too large to represent as an [`Instant`] (such as [`Duration::MAX`]) gives a
/// child with no deadline of its own, as if created by [`with_cancel`].
pub fn with_timeout(parent: Arc<dyn Scope>, timeout: Duration) -> (Arc<dyn Scope>, CancelHandle) {
    match Instant::now().checked_add(timeout) {
        Some(deadline) => with_deadline(parent, deadline),
        None => with_cancel(parent),
    }
}
