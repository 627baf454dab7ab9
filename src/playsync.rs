// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

/// Represents the current cancel state.
#[derive(PartialEq)]
enum CancelState {
    Untouched,
    Cancelled,
}

/// A cancel handle is given to every piece of cancellable background work (fades, show runs,
/// the state monitor). It's the worker's responsibility to check it at tick boundaries and to
/// wait on it instead of sleeping blindly.
///
/// Blocking workers wait through the condvar, async workers through the notifier. Cancelling
/// wakes both.
#[derive(Clone)]
pub struct CancelHandle {
    /// Set to cancelled when the underlying work should stop.
    cancelled: Arc<Mutex<CancelState>>,
    /// Wakes blocking waiters.
    condvar: Arc<Condvar>,
    /// Wakes async waiters.
    notify: Arc<Notify>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    /// Creates a new cancel handle.
    pub fn new() -> CancelHandle {
        CancelHandle {
            cancelled: Arc::new(Mutex::new(CancelState::Untouched)),
            condvar: Arc::new(Condvar::new()),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Returns true if the work has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock() == CancelState::Cancelled
    }

    /// Cancel the work. Cancelling twice is a no-op.
    pub fn cancel(&self) {
        let mut cancel_state = self.cancelled.lock();
        if *cancel_state == CancelState::Untouched {
            *cancel_state = CancelState::Cancelled;
            self.condvar.notify_all();
            self.notify.notify_waiters();
        }
    }

    /// Blocks the current thread for up to `timeout`. Returns true if the handle was
    /// cancelled before or during the wait.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.cancelled.lock();
        while *state == CancelState::Untouched {
            if self.condvar.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        *state == CancelState::Cancelled
    }

    /// Resolves once the handle is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register interest before checking so a cancel between the check and the await
            // can't be missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Sleeps for `duration` unless cancelled first. Returns true if cancelled.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancelled() => true,
            _ = tokio::time::sleep(duration) => self.is_cancelled(),
        }
    }
}
