// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tests for the layered context.

use super::LayeredContext;
use crate::scope::{self, CancelReason, Scope, ScopeExt};
use crate::time::{Duration, Instant};
use std::sync::Arc;

#[cfg(target_arch = "wasm32")]
use wasm_bindgen_test::*;

fn lookup_str(ctx: &LayeredContext, key: &'static str) -> Option<String> {
    ctx.lookup_as::<&str>(&key).map(|v| v.to_string())
}

#[cfg_attr(not(target_arch = "wasm32"), test)]
#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
fn root_has_background_upstream() {
    let ctx = LayeredContext::root();
    assert_eq!(ctx.deadline(), None);
    assert_eq!(ctx.cancel_reason(), None);
    assert_eq!(ctx.cancel_signal(), scope::background().cancel_signal());
    assert!(Arc::ptr_eq(&ctx.upstream(), &scope::background()));
    assert!(ctx.lookup(&"nonexistent").is_none());
}

#[cfg_attr(not(target_arch = "wasm32"), test)]
#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
fn read_your_write_and_overwrite() {
    let ctx = LayeredContext::root();
    ctx.attach("key", "value");
    assert_eq!(lookup_str(&ctx, "key").as_deref(), Some("value"));

    ctx.attach("key", "new_value");
    assert_eq!(lookup_str(&ctx, "key").as_deref(), Some("new_value"));
}

#[cfg_attr(not(target_arch = "wasm32"), test)]
#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
fn overlay_shadows_upstream() {
    let upstream = scope::with_value(scope::background(), "shared", "from upstream");
    let upstream = scope::with_value(upstream, "only_upstream", "deep");
    let ctx = LayeredContext::new(upstream);

    assert_eq!(lookup_str(&ctx, "shared").as_deref(), Some("from upstream"));
    assert_eq!(lookup_str(&ctx, "only_upstream").as_deref(), Some("deep"));

    ctx.attach("shared", "from overlay");
    assert_eq!(lookup_str(&ctx, "shared").as_deref(), Some("from overlay"));
    assert_eq!(lookup_str(&ctx, "only_upstream").as_deref(), Some("deep"));
}

#[cfg_attr(not(target_arch = "wasm32"), test)]
#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
fn attach_returns_the_same_context() {
    let c1 = LayeredContext::root();
    let c2 = c1.attach("k", 1i32);
    assert_eq!(c1, c2);

    c1.attach("k2", 2i32);
    assert_eq!(c2.lookup_as::<i32>(&"k2").as_deref(), Some(&2));

    let snapshot = c1.clone();
    c2.attach("k", 3i32);
    assert_eq!(snapshot.lookup_as::<i32>(&"k").as_deref(), Some(&3));
}

#[cfg_attr(not(target_arch = "wasm32"), test)]
#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
#[allow(clippy::mutable_key_type)] // LayeredContext hash is based on Arc pointer, not the overlay
fn identity_equality_and_hash() {
    use std::collections::HashSet;

    let a = LayeredContext::root();
    let b = LayeredContext::root();
    assert_ne!(a, b);

    let mut set = HashSet::new();
    set.insert(a.clone());
    set.insert(a.attach("x", 1u8));
    set.insert(b.clone());
    assert_eq!(set.len(), 2);
}

#[cfg_attr(not(target_arch = "wasm32"), test)]
#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
fn delegation_fidelity() {
    let at = Instant::now() + Duration::from_secs(60);
    let (upstream, cancel) = scope::with_deadline(scope::background(), at);
    let ctx = LayeredContext::new(upstream.clone());

    assert_eq!(ctx.deadline(), upstream.deadline());
    assert_eq!(ctx.deadline(), Some(at));
    assert_eq!(ctx.cancel_signal(), upstream.cancel_signal());
    assert_eq!(ctx.cancel_reason(), None);

    cancel.cancel();
    assert_eq!(ctx.cancel_reason(), upstream.cancel_reason());
    assert_eq!(ctx.cancel_reason(), Some(CancelReason::Cancelled));
    assert!(ctx.cancel_signal().is_fired());
    // stable signal across calls
    assert_eq!(ctx.cancel_signal(), ctx.cancel_signal());
}

#[cfg_attr(not(target_arch = "wasm32"), test)]
#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
fn set_upstream_redirects_queries_but_keeps_overlay() {
    let ctx = LayeredContext::root();
    ctx.attach("mine", "kept");

    let (first, cancel_first) = scope::with_cancel(scope::with_value(scope::background(), "up", "first"));
    ctx.set_upstream(first);
    assert_eq!(lookup_str(&ctx, "up").as_deref(), Some("first"));

    let second = scope::with_value(scope::background(), "up", "second");
    ctx.set_upstream(second.clone());
    assert!(Arc::ptr_eq(&ctx.upstream(), &second));
    assert_eq!(lookup_str(&ctx, "up").as_deref(), Some("second"));
    assert_eq!(lookup_str(&ctx, "mine").as_deref(), Some("kept"));

    // the old upstream ending no longer matters
    cancel_first.cancel();
    assert_eq!(ctx.cancel_reason(), None);
}

#[cfg_attr(not(target_arch = "wasm32"), test)]
#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
fn derive_isolates_writes() {
    let parent = LayeredContext::root();
    parent.attach("user", "alice");

    let child = parent.derive();
    assert_ne!(parent, child);
    assert_eq!(lookup_str(&child, "user").as_deref(), Some("alice"));

    child.attach("user", "bob");
    child.attach("extra", "child only");
    assert_eq!(lookup_str(&parent, "user").as_deref(), Some("alice"));
    assert_eq!(lookup_str(&parent, "extra"), None);
    assert_eq!(lookup_str(&child, "user").as_deref(), Some("bob"));

    // later parent writes still show through where the child has not shadowed them
    parent.attach("late", "parent");
    assert_eq!(lookup_str(&child, "late").as_deref(), Some("parent"));
}

#[cfg_attr(not(target_arch = "wasm32"), test)]
#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
fn derive_follows_parent_upstream_swaps() {
    let parent = LayeredContext::root();
    let child = parent.derive();

    let (upstream, cancel) = scope::with_cancel(scope::background());
    parent.set_upstream(upstream);
    cancel.cancel();
    assert_eq!(child.cancel_reason(), Some(CancelReason::Cancelled));
}

#[cfg_attr(not(target_arch = "wasm32"), test)]
#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
fn layered_context_can_parent_other_scopes() {
    let ctx = LayeredContext::root();
    ctx.attach("trace", 99u64);
    let (child, cancel) = scope::with_cancel(Arc::new(ctx.clone()));
    assert_eq!(child.lookup_as::<u64>(&"trace").as_deref(), Some(&99));
    cancel.cancel();
    assert!(child.is_ended());
    assert!(!ctx.is_ended());
}

#[cfg_attr(not(target_arch = "wasm32"), test)]
#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
fn attach_value_shares_the_allocation() {
    let ctx = LayeredContext::root();
    let shared: crate::scope::Value = Arc::new(5u16);
    ctx.attach_value("n", shared.clone());
    let found = ctx.lookup(&"n").unwrap();
    assert!(Arc::ptr_eq(&found, &shared));
}

#[cfg_attr(not(target_arch = "wasm32"), test)]
#[cfg_attr(target_arch = "wasm32", wasm_bindgen_test)]
fn debug_reports_overlay_size() {
    let ctx = LayeredContext::root();
    ctx.attach("a", 1u8);
    ctx.attach("b", 2u8);
    let shown = format!("{ctx:?}");
    assert!(shown.starts_with("LayeredContext"));
    assert!(shown.contains("entries: 2"));
}

#[test]
#[cfg(not(target_arch = "wasm32"))]
fn concurrent_attaches_are_not_lost() {
    let ctx = LayeredContext::root();
    let writers: Vec<_> = (0..64u64)
        .map(|i| {
            let ctx = ctx.clone();
            std::thread::spawn(move || {
                ctx.attach(i, i * 10);
            })
        })
        .collect();
    let readers: Vec<_> = (0..64u64)
        .map(|i| {
            let ctx = ctx.clone();
            std::thread::spawn(move || {
                if let Some(v) = ctx.lookup_as::<u64>(&i) {
                    assert_eq!(*v, i * 10);
                }
            })
        })
        .collect();
    for t in writers.into_iter().chain(readers) {
        t.join().unwrap();
    }
    for i in 0..64u64 {
        assert_eq!(ctx.lookup_as::<u64>(&i).as_deref(), Some(&(i * 10)));
    }
}

#[test]
#[cfg(not(target_arch = "wasm32"))]
fn concurrent_upstream_swaps_are_safe() {
    let ctx = LayeredContext::root();
    let swapper = {
        let ctx = ctx.clone();
        std::thread::spawn(move || {
            for i in 0..200u32 {
                ctx.set_upstream(scope::with_value(scope::background(), "gen", i));
            }
        })
    };
    for _ in 0..200 {
        if let Some(generation) = ctx.lookup_as::<u32>(&"gen") {
            assert!(*generation < 200);
        }
        assert_eq!(ctx.cancel_reason(), None);
    }
    swapper.join().unwrap();
    assert_eq!(ctx.lookup_as::<u32>(&"gen").as_deref(), Some(&199));
}
