// SPDX-License-Identifier: MIT OR Apache-2.0

//! The cancellation signal.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Poll, Waker};

use super::reason::CancelReason;
use crate::time::{self, Duration, Instant};

type Subscriber = Box<dyn FnOnce(CancelReason) + Send>;

/// Identifies a callback registered with [`Done::subscribe`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct SubscriptionID(u64);

struct DoneState {
    reason: Option<CancelReason>,
    /// Keyed by the slot of the `Done` handle that registered it.
    wakers: HashMap<u64, Waker>,
    subscribers: HashMap<u64, Subscriber>,
    next_slot: u64,
}

struct DoneInner {
    state: Mutex<DoneState>,
    fired: Condvar,
}

impl DoneInner {
    fn lock(&self) -> MutexGuard<'_, DoneState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Signal that becomes observable once a scope ends.
///
/// A scope hands out the same `Done` for its whole lifetime, so callers may keep it and
/// wait on it repeatedly. Clones refer to the same signal; equality and hashing are by
/// identity.
///
/// A `Done` can be observed several ways:
///
/// * [`is_fired`](Done::is_fired) / [`reason`](Done::reason) never block
/// * [`wait`](Done::wait), [`wait_timeout`](Done::wait_timeout) and
///   [`wait_deadline`](Done::wait_deadline) block the calling thread
/// * `Done` is a [`Future`] resolving to the [`CancelReason`]
///
/// ```rust
/// use strata::scope::{self, Scope, CancelReason};
///
/// let (scope, handle) = scope::with_cancel(scope::background());
/// let done = scope.cancel_signal();
/// assert!(!done.is_fired());
/// handle.cancel();
/// assert_eq!(done.wait(), CancelReason::Cancelled);
/// assert_eq!(done, scope.cancel_signal());
/// ```
pub struct Done {
    inner: Arc<DoneInner>,
    /// Set while this handle, polled as a future, has a waker registered.
    waker_slot: Option<u64>,
}

impl Done {
    pub(crate) fn new() -> Done {
        Done {
            inner: Arc::new(DoneInner {
                state: Mutex::new(DoneState {
                    reason: None,
                    wakers: HashMap::new(),
                    subscribers: HashMap::new(),
                    next_slot: 0,
                }),
                fired: Condvar::new(),
            }),
            waker_slot: None,
        }
    }

    fn state(&self) -> MutexGuard<'_, DoneState> {
        self.inner.lock()
    }

    /// Fires the signal. Returns false if it had already fired, in which case the
    /// original reason is kept.
    pub(crate) fn fire(&self, reason: CancelReason) -> bool {
        let (wakers, subscribers) = {
            let mut state = self.state();
            if state.reason.is_some() {
                return false;
            }
            state.reason = Some(reason);
            (
                std::mem::take(&mut state.wakers),
                std::mem::take(&mut state.subscribers),
            )
        };
        self.inner.fired.notify_all();
        for (_, waker) in wakers {
            waker.wake();
        }
        for (_, subscriber) in subscribers {
            subscriber(reason);
        }
        true
    }

    /// Runs `f` once the signal fires.
    ///
    /// If the signal has already fired, `f` runs immediately on this thread and `None` is returned.
    pub(crate) fn subscribe(
        &self,
        f: impl FnOnce(CancelReason) + Send + 'static,
    ) -> Option<SubscriptionID> {
        let mut state = self.state();
        match state.reason {
            Some(reason) => {
                drop(state);
                f(reason);
                None
            }
            None => {
                let id = state.next_slot;
                state.next_slot += 1;
                state.subscribers.insert(id, Box::new(f));
                Some(SubscriptionID(id))
            }
        }
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionID) {
        // dropping the callback can run arbitrary destructors; keep that outside the lock
        let removed = self.state().subscribers.remove(&id.0);
        drop(removed);
    }

    /// Forgets the waker this handle registered by being polled, if any.
    pub(crate) fn release_waker(&mut self) {
        if let Some(slot) = self.waker_slot.take() {
            let removed = self.inner.lock().wakers.remove(&slot);
            drop(removed);
        }
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.state().subscribers.len()
    }

    #[cfg(test)]
    pub(crate) fn waker_count(&self) -> usize {
        self.state().wakers.len()
    }

    /// True once the scope has ended.
    #[inline]
    pub fn is_fired(&self) -> bool {
        self.state().reason.is_some()
    }

    /// The reason the scope ended, or `None` while it is live.
    #[inline]
    pub fn reason(&self) -> Option<CancelReason> {
        self.state().reason
    }

    /// Blocks the calling thread until the scope ends.
    ///
    /// For a scope that can never end (such as [`background`](super::background)) this never returns.
    pub fn wait(&self) -> CancelReason {
        let mut state = self.state();
        loop {
            if let Some(reason) = state.reason {
                return reason;
            }
            state = self
                .inner
                .fired
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks until the scope ends or `timeout` elapses, whichever is first.
    ///
    /// Returns `None` on timeout.
    /// A `timeout` too large to represent as an [`Instant`] waits indefinitely.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CancelReason> {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_deadline(deadline),
            None => Some(self.wait()),
        }
    }

    /// Blocks until the scope ends or `deadline` passes, whichever is first.
    ///
    /// Returns `None` if the deadline passed first.
    pub fn wait_deadline(&self, deadline: Instant) -> Option<CancelReason> {
        let mut state = self.state();
        loop {
            if let Some(reason) = state.reason {
                return Some(reason);
            }
            let Some(left) = time::remaining(deadline) else {
                return None;
            };
            state = self
                .inner
                .fired
                .wait_timeout(state, left)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl Future for Done {
    type Output = CancelReason;

    fn poll(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.inner.lock();
        if let Some(reason) = state.reason {
            // fire() already took the waker
            this.waker_slot = None;
            return Poll::Ready(reason);
        }
        let slot = *this.waker_slot.get_or_insert_with(|| {
            let slot = state.next_slot;
            state.next_slot += 1;
            slot
        });
        state
            .wakers
            .entry(slot)
            .and_modify(|w| {
                if !w.will_wake(cx.waker()) {
                    w.clone_from(cx.waker());
                }
            })
            .or_insert_with(|| cx.waker().clone());
        Poll::Pending
    }
}

impl Clone for Done {
    fn clone(&self) -> Self {
        Done {
            inner: self.inner.clone(),
            waker_slot: None,
        }
    }
}

impl Drop for Done {
    fn drop(&mut self) {
        self.release_waker();
    }
}

impl Debug for Done {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Done")
            .field("reason", &self.reason())
            .finish()
    }
}

impl PartialEq for Done {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Done {}

impl Hash for Done {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.inner).hash(state);
    }
}

/*
Boilerplate notes.

Clone shares the signal but not the waker registration; each handle polled as a future owns
one slot, released on drop.
PartialEq/Eq/Hash are by identity: two distinct signals that both fired for the same reason
are still different signals.
Default would mean a signal nobody can fire; background() already covers that, so no.
Display is not very sensible.
*/
