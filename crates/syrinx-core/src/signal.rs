//! Shutdown and interrupt signalling.
//!
//! All blocking waits in this workspace (channel polls, retry backoff, the
//! control-loop tick) go through [`Signal`] so that Ctrl-C, the quit keys,
//! and the notification surface can cut any of them short.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A one-way latch with interruptible waits.
///
/// Once triggered it stays triggered; `wait_for` returns early for every
/// waiter from that point on.
pub struct Signal {
    fired: AtomicBool,
    lock: Mutex<()>,
    cv: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
            lock: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    /// Trip the latch and wake every thread blocked in `wait_for`.
    pub fn trigger(&self) {
        self.fired.store(true, Ordering::SeqCst);
        self.cv.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Sleep for at most `timeout`, waking early if the signal trips.
    ///
    /// Returns `true` if the signal was (or became) triggered.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }

        let guard = match self.lock.lock() {
            Ok(g) => g,
            // A poisoned lock means a waiter panicked; stop waiting.
            Err(_) => return true,
        };
        match self
            .cv
            .wait_timeout_while(guard, timeout, |_| !self.is_triggered())
        {
            Ok((_, timed_out)) => !timed_out.timed_out(),
            Err(_) => true,
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

/// The two-operation boundary the notification surface exposes to the core:
/// "was an interrupt requested" and "reset it".
///
/// The surface itself (icon rendering, click capture) lives outside this
/// workspace; it only ever calls [`InterruptFlag::request`].
pub struct InterruptFlag(AtomicBool);

impl InterruptFlag {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for InterruptFlag {
    fn default() -> Self {
        Self::new()
    }
}
