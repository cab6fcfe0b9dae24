// SPDX-License-Identifier: MIT OR Apache-2.0

//! Clock types.
//!
//! Native targets use `std::time`; `wasm32` has no usable `std::time::Instant`, so `web_time`
//! stands in.  Deadlines reported by [`Scope::deadline`](crate::scope::Scope::deadline) are
//! expressed in this [`Instant`].

#[cfg(not(target_arch = "wasm32"))]
pub use std::time::{Duration, Instant};
#[cfg(target_arch = "wasm32")]
pub use web_time::{Duration, Instant};

/// Time left until `deadline`, or `None` once it has passed.
#[inline]
pub(crate) fn remaining(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|left| !left.is_zero())
}
