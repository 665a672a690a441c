//! Flow-control send windows (RFC 7540 Section 6.9).
//!
//! A `SendWindow` is a credit counter shared between the dispatch loop
//! (which applies WINDOW_UPDATE increments and SETTINGS adjustments) and a
//! stream's writing worker (which consumes credit before each DATA chunk).
//! Writers blocked on an empty window park on the condvar with a short
//! timeout and recheck, so a missed wakeup costs at most one retry interval.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{ErrorCode, H2Error, Result};

/// Largest legal window value (RFC 7540 Section 6.9.1).
pub const MAX_WINDOW_SIZE: i64 = 0x7FFF_FFFF;

/// Default initial window size (RFC 7540 Section 6.9.2).
pub const DEFAULT_WINDOW_SIZE: i64 = 65535;

/// How long a writer parks before rechecking an exhausted window.
pub(crate) const WINDOW_RETRY_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub struct SendWindow {
    window: Mutex<i64>,
    credit: Condvar,
}

impl SendWindow {
    pub fn new(initial: i64) -> Self {
        Self {
            window: Mutex::new(initial),
            credit: Condvar::new(),
        }
    }

    /// Current window. May be negative after a SETTINGS_INITIAL_WINDOW_SIZE
    /// decrease.
    pub fn available(&self) -> i64 {
        *self.window.lock()
    }

    /// Atomically take up to `want` bytes of credit. Returns the amount
    /// granted; 0 when the window is exhausted. Never drives the window
    /// negative.
    pub fn reserve(&self, want: usize) -> usize {
        let mut window = self.window.lock();
        if *window <= 0 {
            return 0;
        }
        let granted = (*window).min(want as i64);
        *window -= granted;
        granted as usize
    }

    /// Return unused credit taken by [`reserve`](Self::reserve).
    pub fn release(&self, amount: usize) {
        let mut window = self.window.lock();
        *window += amount as i64;
        drop(window);
        self.credit.notify_all();
    }

    /// Apply a WINDOW_UPDATE increment. Exceeding 2^31-1 is a flow control
    /// violation.
    pub fn increase(&self, increment: u32) -> Result<()> {
        let mut window = self.window.lock();
        let new = *window + i64::from(increment);
        if new > MAX_WINDOW_SIZE {
            return Err(H2Error::connection(
                ErrorCode::FlowControlError,
                "window increment overflows 2^31-1",
            ));
        }
        *window = new;
        drop(window);
        self.credit.notify_all();
        Ok(())
    }

    /// Retroactive adjustment after a SETTINGS_INITIAL_WINDOW_SIZE change;
    /// `delta` is (new initial - old initial) and may be negative.
    pub fn adjust(&self, delta: i64) -> Result<()> {
        let mut window = self.window.lock();
        let new = *window + delta;
        if new > MAX_WINDOW_SIZE {
            return Err(H2Error::connection(
                ErrorCode::FlowControlError,
                "window adjustment overflows 2^31-1",
            ));
        }
        *window = new;
        drop(window);
        self.credit.notify_all();
        Ok(())
    }

    /// Park until credit may be available again, or the retry interval
    /// elapses. Callers re-test the window (and the connection state) after
    /// every return.
    pub fn wait_for_credit(&self) {
        let mut window = self.window.lock();
        if *window > 0 {
            return;
        }
        self.credit.wait_for(&mut window, WINDOW_RETRY_INTERVAL);
    }

    /// Wake every parked writer (stream or connection teardown).
    pub fn wake_all(&self) {
        self.credit.notify_all();
    }
}

impl Default for SendWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}
