// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for trellis-polling integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use trellis_polling::{FetchRequest, ItemFetcher, PolledItem, Store, StoreError};

/// Install a tracing subscriber once; honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// One scripted fetch result.
pub enum Batch {
    Items(Vec<PolledItem>),
    Fail(&'static str),
}

/// Fetcher replaying scripted batches; the last batch repeats forever.
pub struct ScriptedFetcher {
    batches: Mutex<VecDeque<Batch>>,
    requests: Mutex<Vec<FetchRequest>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl ScriptedFetcher {
    pub fn new(batches: Vec<Batch>) -> Self {
        Self {
            batches: Mutex::new(batches.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Fetcher that always returns `items`.
    pub fn always(items: Vec<PolledItem>) -> Self {
        Self::new(vec![Batch::Items(items)])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_batch(&self) -> Result<Vec<PolledItem>, &'static str> {
        let mut batches = self.batches.lock().unwrap();
        let batch = if batches.len() > 1 {
            batches.pop_front()
        } else {
            None
        };
        let batch = batch.as_ref().or(batches.front());
        match batch {
            Some(Batch::Items(items)) => Ok(items.clone()),
            Some(Batch::Fail(message)) => Err(message),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl ItemFetcher for ScriptedFetcher {
    async fn fetch(&self, request: FetchRequest) -> anyhow::Result<Vec<PolledItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.next_batch().map_err(|message| anyhow::anyhow!(message))
    }
}

/// Store whose every call fails.
pub struct UnavailableStore;

#[async_trait]
impl Store for UnavailableStore {
    async fn get(&self, _key: &str) -> Result<Option<Value>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn put(&self, _key: &str, _value: Value) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}
