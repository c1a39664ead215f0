// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trigger-scoped key/value store contract.
//!
//! The engine only needs get/put/delete with read-your-writes consistency
//! per key. Each trigger gets its own store namespace; the engine never
//! qualifies keys itself.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;

/// Durable per-trigger key/value state.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read a value, `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write a value.
    async fn put(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Remove a value. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Process-local [`Store`] for tests and embedded use.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of every stored entry.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.values().clone()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.values().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.values().remove(key);
        Ok(())
    }
}
