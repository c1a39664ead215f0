// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wall clock used to seed TIMEBASED cursors.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::Utc;

/// Source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync {
    /// Current time in epoch milliseconds.
    fn now_millis(&self) -> i64;
}

/// System wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `epoch_millis`.
    pub fn new(epoch_millis: i64) -> Self {
        Self {
            now: AtomicI64::new(epoch_millis),
        }
    }

    /// Jump to `epoch_millis`.
    pub fn set(&self, epoch_millis: i64) {
        self.now.store(epoch_millis, Ordering::SeqCst);
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
