// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trellis Polling - Trigger Deduplication
//!
//! Flows that poll a third-party API instead of receiving webhooks call the
//! [`PollingEngine`] on every trigger cycle. The engine calls the caller's
//! fetch, compares the batch against a cursor persisted in a trigger-scoped
//! [`Store`], and returns only the items that are new.
//!
//! # Strategies
//!
//! | Strategy | Cursor (`Store` key) | New item |
//! |----------|----------------------|----------|
//! | `TIMEBASED` | `lastPoll`: epoch ms watermark | `epochMillis > lastPoll` |
//! | `LAST_ITEM` | `lastItem`: newest id seen | listed before `lastItem` |
//!
//! # Trigger Lifecycle
//!
//! ```text
//!   on_enable ──► poll ──► poll ──► ... ──► on_disable
//!   (baseline,    (emit new items,           (cursor kept; re-enabling
//!    no emit)      advance cursor)            resumes from it)
//! ```
//!
//! Calls for the same [`TriggerKey`] are serialized; a failed fetch never
//! changes the stored cursor.

#![deny(missing_docs)]

/// Clock abstraction for TIMEBASED baselines.
pub mod clock;

/// Persisted cursor model.
pub mod cursor;

/// Polling engine state machine.
pub mod engine;

/// Error types.
pub mod error;

/// Polled items and the fetch contract.
pub mod item;

/// Per-trigger locking.
pub mod lock;

/// Trigger-scoped key/value store contract.
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cursor::Cursor;
pub use engine::PollingEngine;
pub use error::{PollingError, Result, StoreError};
pub use item::{FetchRequest, ItemFetcher, PolledItem, PollingStrategy};
pub use lock::TriggerKey;
pub use store::{InMemoryStore, Store};
