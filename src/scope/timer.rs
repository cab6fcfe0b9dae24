// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background watcher that fires deadline scopes.

use std::sync::{OnceLock, Weak};

use wasm_safe_mutex::mpsc;

use super::cancel::CancelNode;
use super::reason::CancelReason;
use crate::time::{Duration, Instant};

/// How long the watcher sleeps when nothing is pending.
const IDLE_TICK: Duration = Duration::from_millis(250);

#[derive(Debug)]
struct PendingDeadline {
    deadline: Instant,
    node: Weak<CancelNode>,
}

impl PendingDeadline {
    /// A deadline is stale once its scope is gone or has already ended for another reason.
    fn is_stale(&self) -> bool {
        match self.node.upgrade() {
            None => true,
            Some(node) => node.is_ended(),
        }
    }
}

static CHANNEL: OnceLock<mpsc::Sender<PendingDeadline>> = OnceLock::new();

fn channel() -> mpsc::Sender<PendingDeadline> {
    CHANNEL
        .get_or_init(|| {
            let (tx, rx) = mpsc::channel();
            spawn_watcher(rx);
            tx
        })
        .clone()
}

/// Arranges for `node` to end with [`CancelReason::DeadlineExceeded`] at `deadline`.
pub(crate) fn schedule(deadline: Instant, node: Weak<CancelNode>) {
    let sender = channel();
    if sender
        .send_sync(PendingDeadline { deadline, node })
        .is_err()
    {
        logwise::warn_sync!(
            "strata: deadline watcher is not running; a deadline scope will only end when cancelled"
        );
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn spawn_watcher(receiver: mpsc::Receiver<PendingDeadline>) {
    let spawned = std::thread::Builder::new()
        .name("strata-deadline".to_string())
        .spawn(move || watcher_loop(receiver));
    if let Err(err) = spawned {
        logwise::warn_sync!(
            "strata: could not start deadline watcher: {err}",
            err = logwise::privacy::LogIt(err)
        );
    }
}

#[cfg(target_arch = "wasm32")]
fn spawn_watcher(receiver: mpsc::Receiver<PendingDeadline>) {
    let _ = wasm_thread::spawn(move || watcher_loop(receiver));
}

fn watcher_loop(receiver: mpsc::Receiver<PendingDeadline>) {
    logwise::debuginternal_sync!("strata: deadline watcher started");
    let mut pending: Vec<PendingDeadline> = Vec::new();
    loop {
        let now = Instant::now();
        let wake_at = pending
            .iter()
            .map(|p| p.deadline)
            .min()
            .unwrap_or(now + IDLE_TICK);

        match receiver.recv_sync_timeout(wake_at) {
            Ok(entry) => pending.push(entry),
            Err(mpsc::RecvTimeoutError::Timeout) => { /* fall through to deadline check */ }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        pending.retain(|entry| {
            if entry.deadline > now {
                return !entry.is_stale();
            }
            if let Some(node) = entry.node.upgrade() {
                if node.end(CancelReason::DeadlineExceeded) {
                    logwise::debuginternal_sync!(
                        "strata: scope {id} passed its deadline",
                        id = node.id()
                    );
                }
            }
            false
        });
    }
}
