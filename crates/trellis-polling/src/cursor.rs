// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persisted dedupe cursors.
//!
//! A TIMEBASED trigger stores its watermark under `lastPoll` as a JSON
//! integer; a LAST_ITEM trigger stores the newest id seen under `lastItem`.

use serde_json::Value;

use crate::error::{PollingError, Result};
use crate::item::PollingStrategy;
use crate::store::Store;

/// Store key of the TIMEBASED watermark.
pub const LAST_POLL_KEY: &str = "lastPoll";
/// Store key of the LAST_ITEM id.
pub const LAST_ITEM_KEY: &str = "lastItem";

/// Current dedupe state of one trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum Cursor {
    /// TIMEBASED watermark in epoch milliseconds, if set
    LastPoll(Option<i64>),
    /// Newest LAST_ITEM id seen, if any
    LastItem(Option<Value>),
}

impl Cursor {
    /// Strategy this cursor belongs to.
    pub fn strategy(&self) -> PollingStrategy {
        match self {
            Cursor::LastPoll(_) => PollingStrategy::Timebased,
            Cursor::LastItem(_) => PollingStrategy::LastItem,
        }
    }

    /// Whether the trigger has no persisted state yet.
    pub fn is_absent(&self) -> bool {
        matches!(self, Cursor::LastPoll(None) | Cursor::LastItem(None))
    }
}

pub(crate) async fn read<S: Store + ?Sized>(strategy: PollingStrategy, store: &S) -> Result<Cursor> {
    Ok(match strategy {
        PollingStrategy::Timebased => Cursor::LastPoll(read_last_poll(store).await?),
        PollingStrategy::LastItem => Cursor::LastItem(read_last_item(store).await?),
    })
}

pub(crate) async fn read_last_poll<S: Store + ?Sized>(store: &S) -> Result<Option<i64>> {
    match store.get(LAST_POLL_KEY).await? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| PollingError::CorruptCursor {
                key: LAST_POLL_KEY,
                reason: format!("expected an integer, found {}", value),
            }),
    }
}

pub(crate) async fn write_last_poll<S: Store + ?Sized>(store: &S, epoch_millis: i64) -> Result<()> {
    store.put(LAST_POLL_KEY, Value::from(epoch_millis)).await?;
    Ok(())
}

pub(crate) async fn read_last_item<S: Store + ?Sized>(store: &S) -> Result<Option<Value>> {
    match store.get(LAST_ITEM_KEY).await? {
        None | Some(Value::Null) => Ok(None),
        Some(id) => Ok(Some(id)),
    }
}

pub(crate) async fn write_last_item<S: Store + ?Sized>(store: &S, id: Value) -> Result<()> {
    store.put(LAST_ITEM_KEY, id).await?;
    Ok(())
}

pub(crate) async fn clear<S: Store + ?Sized>(strategy: PollingStrategy, store: &S) -> Result<()> {
    let key = match strategy {
        PollingStrategy::Timebased => LAST_POLL_KEY,
        PollingStrategy::LastItem => LAST_ITEM_KEY,
    };
    store.delete(key).await?;
    Ok(())
}
