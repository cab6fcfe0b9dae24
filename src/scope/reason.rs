// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;

/// Why a scope ended.
///
/// A live scope has no reason; [`Scope::cancel_reason`](super::Scope::cancel_reason) returns
/// `Some` exactly once the scope has ended, and the reason never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum CancelReason {
    /// Someone called [`CancelHandle::cancel`](super::CancelHandle::cancel) on this scope or an ancestor.
    #[error("scope cancelled")]
    Cancelled,
    /// The deadline of this scope or an ancestor passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl CancelReason {
    /// True if the scope ended because a deadline passed.
    #[inline]
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, CancelReason::DeadlineExceeded)
    }
}
