// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Polling engine.
//!
//! Turns a stateless "list current items" fetch into a stream of new items
//! using a persisted cursor. Cursor writes only happen after a fetch has
//! succeeded and its items have been checked, so a failed poll leaves the
//! stored state exactly as it was.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::cursor::{self, Cursor};
use crate::error::{PollingError, Result};
use crate::item::{FetchRequest, ItemFetcher, PolledItem, PollingStrategy};
use crate::lock::{KeyedLocks, TriggerKey};
use crate::store::Store;

/// Strategy-driven dedupe engine for polling triggers.
///
/// One engine serves any number of triggers; calls for the same
/// [`TriggerKey`] are serialized, calls for different keys run in parallel.
pub struct PollingEngine {
    clock: Arc<dyn Clock>,
    locks: KeyedLocks,
}

impl Default for PollingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PollingEngine {
    /// Create an engine using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an engine using the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            locks: KeyedLocks::default(),
        }
    }

    /// Establish the initial cursor without emitting anything.
    ///
    /// TIMEBASED sets the watermark to now. LAST_ITEM fetches once and
    /// records the newest id; an empty fetch leaves the cursor as it was.
    pub async fn on_enable<F, S>(
        &self,
        trigger: &TriggerKey,
        strategy: PollingStrategy,
        fetcher: &F,
        store: &S,
    ) -> Result<()>
    where
        F: ItemFetcher + ?Sized,
        S: Store + ?Sized,
    {
        let _guard = self.locks.lock(trigger).await;

        match strategy {
            PollingStrategy::Timebased => {
                let now = self.clock.now_millis();
                cursor::write_last_poll(store, now).await?;
                info!(trigger = %trigger, %strategy, last_poll = now, "Polling trigger enabled");
            }
            PollingStrategy::LastItem => {
                let items = fetch(fetcher, FetchRequest::last_item(None), trigger).await?;
                let items = last_items(items)?;
                match items.into_iter().next() {
                    Some((id, _)) => {
                        info!(trigger = %trigger, %strategy, last_item = %id, "Polling trigger enabled");
                        cursor::write_last_item(store, id).await?;
                    }
                    None => {
                        info!(trigger = %trigger, %strategy, "Polling trigger enabled with no items");
                    }
                }
            }
        }
        Ok(())
    }

    /// Return the data of every item that is new since the last poll.
    pub async fn poll<F, S>(
        &self,
        trigger: &TriggerKey,
        strategy: PollingStrategy,
        fetcher: &F,
        store: &S,
    ) -> Result<Vec<Value>>
    where
        F: ItemFetcher + ?Sized,
        S: Store + ?Sized,
    {
        let _guard = self.locks.lock(trigger).await;

        let emitted = match strategy {
            PollingStrategy::Timebased => self.poll_timebased(trigger, fetcher, store).await?,
            PollingStrategy::LastItem => self.poll_last_item(trigger, fetcher, store).await?,
        };

        debug!(trigger = %trigger, %strategy, emitted = emitted.len(), "Poll finished");
        Ok(emitted)
    }

    async fn poll_timebased<F, S>(&self, trigger: &TriggerKey, fetcher: &F, store: &S) -> Result<Vec<Value>>
    where
        F: ItemFetcher + ?Sized,
        S: Store + ?Sized,
    {
        let last_poll = match cursor::read_last_poll(store).await? {
            Some(last_poll) => last_poll,
            None => {
                warn!(trigger = %trigger, "No watermark stored, polling from epoch 0");
                0
            }
        };

        let items = fetch(fetcher, FetchRequest::timebased(last_poll), trigger).await?;
        let items = timebased_items(items)?;

        let newest = items
            .iter()
            .map(|(epoch_millis, _)| *epoch_millis)
            .fold(last_poll, i64::max);
        cursor::write_last_poll(store, newest).await?;

        debug!(trigger = %trigger, last_poll, new_last_poll = newest, fetched = items.len(), "Watermark advanced");

        // Items at the old watermark were emitted by the previous cycle
        Ok(items
            .into_iter()
            .filter(|(epoch_millis, _)| *epoch_millis > last_poll)
            .map(|(_, data)| data)
            .collect())
    }

    async fn poll_last_item<F, S>(&self, trigger: &TriggerKey, fetcher: &F, store: &S) -> Result<Vec<Value>>
    where
        F: ItemFetcher + ?Sized,
        S: Store + ?Sized,
    {
        let last_item = cursor::read_last_item(store).await?;

        let items = fetch(fetcher, FetchRequest::last_item(last_item.clone()), trigger).await?;
        let mut items = last_items(items)?;
        let Some((newest, _)) = items.first() else {
            return Ok(Vec::new());
        };

        // Written before emission: a failure after this point loses the
        // batch rather than delivering it twice.
        cursor::write_last_item(store, newest.clone()).await?;

        let seen_at = last_item
            .as_ref()
            .and_then(|last| items.iter().position(|(id, _)| id == last));
        match seen_at {
            Some(position) => items.truncate(position),
            None => {
                if last_item.is_some() {
                    warn!(
                        trigger = %trigger,
                        fetched = items.len(),
                        "Last seen item not in batch, emitting the whole batch"
                    );
                }
            }
        }

        Ok(items.into_iter().map(|(_, data)| data).collect())
    }

    /// Disable a trigger. The cursor is kept so re-enabling resumes from it.
    pub async fn on_disable(&self, trigger: &TriggerKey, strategy: PollingStrategy) {
        // Wait for an in-flight poll of this trigger to finish
        let _guard = self.locks.lock(trigger).await;
        info!(trigger = %trigger, %strategy, "Polling trigger disabled, cursor retained");
    }

    /// Dry-run fetch for previews. Never reads or writes any cursor.
    ///
    /// TIMEBASED fetches from epoch 0; LAST_ITEM returns the raw batch.
    pub async fn test<F>(&self, strategy: PollingStrategy, fetcher: &F) -> Result<Vec<Value>>
    where
        F: ItemFetcher + ?Sized,
    {
        let request = match strategy {
            PollingStrategy::Timebased => FetchRequest::timebased(0),
            PollingStrategy::LastItem => FetchRequest::last_item(None),
        };
        let items = fetcher.fetch(request).await.map_err(PollingError::Fetch)?;
        check_strategy(strategy, &items)?;
        Ok(items.into_iter().map(PolledItem::into_data).collect())
    }

    /// Current cursor of a trigger, for inspection.
    pub async fn cursor<S>(&self, strategy: PollingStrategy, store: &S) -> Result<Cursor>
    where
        S: Store + ?Sized,
    {
        cursor::read(strategy, store).await
    }

    /// Forget a trigger's cursor.
    ///
    /// The next enable starts from a fresh baseline; a poll without enable
    /// falls back to epoch 0 or to emitting the whole batch.
    pub async fn reset<S>(&self, trigger: &TriggerKey, strategy: PollingStrategy, store: &S) -> Result<()>
    where
        S: Store + ?Sized,
    {
        let _guard = self.locks.lock(trigger).await;
        cursor::clear(strategy, store).await?;
        info!(trigger = %trigger, %strategy, "Polling cursor reset");
        Ok(())
    }
}

async fn fetch<F: ItemFetcher + ?Sized>(
    fetcher: &F,
    request: FetchRequest,
    trigger: &TriggerKey,
) -> Result<Vec<PolledItem>> {
    fetcher.fetch(request).await.map_err(|e| {
        warn!(trigger = %trigger, error = %e, "Fetch failed, cursor unchanged");
        PollingError::Fetch(e)
    })
}

fn check_strategy(expected: PollingStrategy, items: &[PolledItem]) -> Result<()> {
    match items.iter().find(|item| item.strategy() != expected) {
        Some(item) => Err(PollingError::StrategyMismatch {
            expected,
            found: item.strategy(),
        }),
        None => Ok(()),
    }
}

fn timebased_items(items: Vec<PolledItem>) -> Result<Vec<(i64, Value)>> {
    items
        .into_iter()
        .map(|item| match item {
            PolledItem::Timebased { epoch_millis, data } => Ok((epoch_millis, data)),
            PolledItem::LastItem { .. } => Err(PollingError::StrategyMismatch {
                expected: PollingStrategy::Timebased,
                found: PollingStrategy::LastItem,
            }),
        })
        .collect()
}

fn last_items(items: Vec<PolledItem>) -> Result<Vec<(Value, Value)>> {
    items
        .into_iter()
        .map(|item| match item {
            PolledItem::LastItem { id, data } => Ok((id, data)),
            PolledItem::Timebased { .. } => Err(PollingError::StrategyMismatch {
                expected: PollingStrategy::LastItem,
                found: PollingStrategy::Timebased,
            }),
        })
        .collect()
}
