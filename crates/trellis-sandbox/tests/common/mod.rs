// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for trellis-sandbox integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use trellis_sandbox::boundary::{IsolationBoundary, ResourceLimits};
use trellis_sandbox::{CodeRunner, IsolationPool, PoolConfig};

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

/// Pool rooted in a temp directory.
pub fn test_pool(temp_dir: &TempDir, max_units: usize, acquire_timeout: Duration) -> IsolationPool {
    IsolationPool::new(PoolConfig {
        scratch_root: temp_dir.path().to_path_buf(),
        max_units,
        acquire_timeout,
    })
}

/// Runner over a temp-directory pool and the given boundary.
pub fn test_runner(
    temp_dir: &TempDir,
    max_units: usize,
    boundary: Arc<dyn IsolationBoundary>,
    limits: ResourceLimits,
) -> CodeRunner {
    CodeRunner::builder()
        .pool(test_pool(temp_dir, max_units, Duration::from_secs(10)))
        .boundary(boundary)
        .limits(limits)
        .build()
        .expect("runner builds")
}

/// Build a `/bin/sh` artifact from a script body.
pub fn sh_artifact(body: &str) -> Vec<u8> {
    format!("#!/bin/sh\n{}\n", body).into_bytes()
}
