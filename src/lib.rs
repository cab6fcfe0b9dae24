//SPDX-License-Identifier: MIT OR Apache-2.0
/*!
# strata

strata provides request-scoped contexts for Rust: a value you pass down a call chain so that
callees can tell when their work has been abandoned, how long they have, and what their
callers wanted them to know.

# Development status

strata is experimental and the API may change.

# The problem

A server handling a request typically wants three things to flow down to every function doing
work on its behalf:

* A way to say "stop, the client went away".
* A deadline.
* Some request-scoped annotations: a request ID, the authenticated user, a trace span.

Threading each of these through every signature separately is tedious, and every layer ends
up inventing its own cancellation flag.  strata bundles them into one value.

# Two layers

strata separates *where cancellation comes from* from *where values live*.

| Piece                       | What it does                                                      |
|-----------------------------|-------------------------------------------------------------------|
| [`scope::Scope`]            | The contract: deadline, cancel signal, cancel reason, value lookup |
| [`scope::background`]       | The root scope.  Never ends.                                      |
| [`scope::with_cancel`]      | A child scope you can cancel                                      |
| [`scope::with_timeout`]     | A child scope that ends by itself                                 |
| [`scope::with_value`]       | An immutable child scope carrying one value                       |
| [`LayeredContext`]          | An upstream scope plus a local, mutable value overlay             |

The [`LayeredContext`] is the thing you usually hand out.  Cancellation and deadline queries
are read straight through to its upstream scope.  Value lookups check its own overlay first and
fall back to the upstream.

```rust
use strata::LayeredContext;
use strata::scope::{self, Scope, ScopeExt, CancelReason};
use std::time::Duration;

let ctx = LayeredContext::root();
ctx.attach("request_id", 17u64);

let (upstream, _cancel) = scope::with_timeout(scope::background(), Duration::from_millis(20));
ctx.set_upstream(upstream);

assert_eq!(*ctx.lookup_as::<u64>(&"request_id").unwrap(), 17);
assert_eq!(ctx.cancel_signal().wait(), CancelReason::DeadlineExceeded);
```

# Mutation

[`LayeredContext::attach`] writes into the context's overlay *in place* and hands back the same
context.  Every clone of a `LayeredContext` sees every write.  This is deliberate; see the
[type docs](LayeredContext#aliasing).  When you want writes to stay private to a callee, give it
[`LayeredContext::derive`] or build a chain with [`scope::with_value`].

# Multithreading

Every type here is `Send + Sync`.  The overlay is guarded by a reader/writer lock and the
upstream slot by its own lock; neither lock is held while calling into an upstream scope.

# Logging

strata logs through [logwise](https://crates.io/crates/logwise).  Scope lifecycle messages are
`debuginternal`; enable the `logwise_internal` feature, or begin a logwise trace, to see them.
*/

mod layered;
pub mod scope;
mod time;

logwise::declare_logging_domain!();

pub use layered::LayeredContext;
pub use time::{Duration, Instant};
