// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Polled items and the fetch contract.

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Dedupe strategy of a polling trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollingStrategy {
    /// Watermark on item timestamps
    Timebased,
    /// Identity of the newest item seen
    LastItem,
}

impl PollingStrategy {
    /// String constant used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            PollingStrategy::Timebased => "TIMEBASED",
            PollingStrategy::LastItem => "LAST_ITEM",
        }
    }
}

impl fmt::Display for PollingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One item returned by a fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum PolledItem {
    /// Item of a TIMEBASED trigger
    Timebased {
        /// Creation time in epoch milliseconds
        epoch_millis: i64,
        /// Payload emitted to the flow
        data: Value,
    },
    /// Item of a LAST_ITEM trigger
    LastItem {
        /// Opaque identity, compared by equality
        id: Value,
        /// Payload emitted to the flow
        data: Value,
    },
}

impl PolledItem {
    /// Create a TIMEBASED item.
    pub fn timebased(epoch_millis: i64, data: impl Into<Value>) -> Self {
        PolledItem::Timebased {
            epoch_millis,
            data: data.into(),
        }
    }

    /// Create a LAST_ITEM item.
    pub fn last_item(id: impl Into<Value>, data: impl Into<Value>) -> Self {
        PolledItem::LastItem {
            id: id.into(),
            data: data.into(),
        }
    }

    /// Strategy this item belongs to.
    pub fn strategy(&self) -> PollingStrategy {
        match self {
            PolledItem::Timebased { .. } => PollingStrategy::Timebased,
            PolledItem::LastItem { .. } => PollingStrategy::LastItem,
        }
    }

    /// Payload of the item.
    pub fn data(&self) -> &Value {
        match self {
            PolledItem::Timebased { data, .. } | PolledItem::LastItem { data, .. } => data,
        }
    }

    /// Take the payload.
    pub fn into_data(self) -> Value {
        match self {
            PolledItem::Timebased { data, .. } | PolledItem::LastItem { data, .. } => data,
        }
    }
}

/// Cursor hints handed to a fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// Strategy of the trigger being polled
    pub strategy: PollingStrategy,
    /// Lower bound for TIMEBASED fetches; 0 means everything
    pub last_fetch_epoch_ms: i64,
    /// Newest id seen by a LAST_ITEM trigger
    pub last_item_id: Option<Value>,
}

impl FetchRequest {
    pub(crate) fn timebased(last_fetch_epoch_ms: i64) -> Self {
        Self {
            strategy: PollingStrategy::Timebased,
            last_fetch_epoch_ms,
            last_item_id: None,
        }
    }

    pub(crate) fn last_item(last_item_id: Option<Value>) -> Self {
        Self {
            strategy: PollingStrategy::LastItem,
            last_fetch_epoch_ms: 0,
            last_item_id,
        }
    }
}

/// Caller-supplied "list current items" function.
///
/// Implementations may return any number of items, including ones already
/// seen. LAST_ITEM batches must be ordered newest-first.
///
/// Implemented for async closures:
///
/// ```
/// use trellis_polling::{FetchRequest, PolledItem};
///
/// let fetch = |_req: FetchRequest| async {
///     Ok::<_, anyhow::Error>(vec![PolledItem::last_item("7", "e7")])
/// };
/// # fn assert_fetcher<F: trellis_polling::ItemFetcher>(_: &F) {}
/// # assert_fetcher(&fetch);
/// ```
#[async_trait]
pub trait ItemFetcher: Send + Sync {
    /// Fetch the items currently visible at the source.
    async fn fetch(&self, request: FetchRequest) -> anyhow::Result<Vec<PolledItem>>;
}

#[async_trait]
impl<F, Fut> ItemFetcher for F
where
    F: Fn(FetchRequest) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<PolledItem>>> + Send,
{
    async fn fetch(&self, request: FetchRequest) -> anyhow::Result<Vec<PolledItem>> {
        (self)(request).await
    }
}
