// SPDX-License-Identifier: MIT OR Apache-2.0

//! Racing a future against a scope.

use std::future::Future;
use std::pin::Pin;
use std::task::Poll;

use super::done::Done;
use super::reason::CancelReason;
use super::Scope;

/// A [`Future`] that gives up once a scope ends.
///
/// Created by [`with_cancellation`]. Resolves to `Ok` with the inner future's output, or to
/// `Err` with the scope's [`CancelReason`] if the scope ends first.
///
/// # Implementation Details
///
/// Each poll:
/// 1. Checks the scope's signal, registering the waker with it
/// 2. If the scope ended, resolves with the reason without polling the inner future again
/// 3. Otherwise polls the inner future, releasing the registered waker once it completes
///
/// Dropping a `WithCancellation` early also releases its waker, so a scope that outlives many
/// futures (such as [`background`](super::background)) does not accumulate them.
#[derive(Debug)]
pub struct WithCancellation<F> {
    done: Done,
    future: F,
}

/// Wraps `future` so that it stops as soon as `scope` ends.
///
/// ```rust
/// use strata::scope::{self, with_cancellation, CancelReason};
///
/// # async fn example() {
/// let (scope, cancel) = scope::with_cancel(scope::background());
/// cancel.cancel();
/// let result = with_cancellation(scope.as_ref(), std::future::pending::<()>()).await;
/// assert_eq!(result, Err(CancelReason::Cancelled));
/// # }
/// ```
pub fn with_cancellation<F: Future>(scope: &dyn Scope, future: F) -> WithCancellation<F> {
    WithCancellation {
        done: scope.cancel_signal(),
        future,
    }
}

impl<F> Future for WithCancellation<F>
where
    F: Future,
{
    type Output = Result<F::Output, CancelReason>;

    fn poll(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        // safety: `future` is never moved out of `self`; `done` is Unpin
        let (done, fut) = unsafe {
            let d = self.get_unchecked_mut();
            (&mut d.done, Pin::new_unchecked(&mut d.future))
        };
        if let Poll::Ready(reason) = Pin::new(&mut *done).poll(cx) {
            return Poll::Ready(Err(reason));
        }
        match fut.poll(cx) {
            Poll::Ready(output) => {
                done.release_waker();
                Poll::Ready(Ok(output))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
