// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-trigger mutual exclusion.
//!
//! Every cursor read-modify-write for one trigger runs under that trigger's
//! lock; different triggers never contend. Slots are dropped once no caller
//! holds or waits on them.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Identity of one polling trigger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerKey {
    /// Flow instance owning the trigger
    pub flow_instance_id: String,
    /// Trigger within the flow instance
    pub trigger_id: String,
}

impl TriggerKey {
    /// Create a trigger key.
    pub fn new(flow_instance_id: impl Into<String>, trigger_id: impl Into<String>) -> Self {
        Self {
            flow_instance_id: flow_instance_id.into(),
            trigger_id: trigger_id.into(),
        }
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.flow_instance_id, self.trigger_id)
    }
}

/// Registry of one async lock per trigger.
#[derive(Debug, Default)]
pub(crate) struct KeyedLocks {
    slots: Mutex<HashMap<TriggerKey, Weak<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    fn slots(&self) -> MutexGuard<'_, HashMap<TriggerKey, Weak<AsyncMutex<()>>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait for exclusive access to `key`.
    pub(crate) async fn lock(&self, key: &TriggerKey) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots();
            slots.retain(|_, weak| weak.strong_count() > 0);
            match slots.get(key).and_then(Weak::upgrade) {
                Some(slot) => slot,
                None => {
                    let slot = Arc::new(AsyncMutex::new(()));
                    slots.insert(key.clone(), Arc::downgrade(&slot));
                    slot
                }
            }
        };
        slot.lock_owned().await
    }

    /// Number of live slots.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
