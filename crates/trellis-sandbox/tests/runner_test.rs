// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the code runner against the mock boundary.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{init_tracing, test_pool, test_runner};
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use trellis_sandbox::boundary::{MockBoundary, MockOutcome, ResourceLimits};
use trellis_sandbox::{CodeExecutionRequest, CodeRunner, SandboxError, Verdict};

fn request() -> CodeExecutionRequest {
    CodeExecutionRequest::new(b"#!/bin/sh\nexit 0\n".to_vec(), json!({"order": 7}))
}

async fn run_with(outcome: MockOutcome) -> trellis_sandbox::CodeExecutionResult {
    let temp_dir = TempDir::new().unwrap();
    let runner = test_runner(
        &temp_dir,
        1,
        Arc::new(MockBoundary::with_outcome(outcome)),
        ResourceLimits {
            timeout: Duration::from_millis(50),
            ..ResourceLimits::default()
        },
    );
    runner.execute(&request()).await.unwrap()
}

// ============================================================================
// Verdicts
// ============================================================================

#[tokio::test]
async fn test_ok_returns_output() {
    init_tracing();
    let result = run_with(MockOutcome::Output(json!({"total": 99}))).await;

    assert_eq!(result.verdict, Verdict::Ok);
    assert_eq!(result.output, Some(json!({"total": 99})));
}

#[tokio::test]
async fn test_runtime_error_keeps_program_stderr() {
    let result = run_with(MockOutcome::RuntimeError {
        exit_code: 1,
        stderr: "TypeError: x is undefined".to_string(),
    })
    .await;

    assert_eq!(result.verdict, Verdict::RuntimeError);
    assert_eq!(result.output, None);
    assert_eq!(result.standard_error, "TypeError: x is undefined");
}

#[tokio::test]
async fn test_runtime_error_without_stderr_gets_message() {
    let result = run_with(MockOutcome::RuntimeError {
        exit_code: 4,
        stderr: String::new(),
    })
    .await;

    assert_eq!(result.verdict, Verdict::RuntimeError);
    assert_eq!(result.standard_error, "Program exited with code 4");
}

#[tokio::test]
async fn test_timeout_verdict() {
    let result = run_with(MockOutcome::Timeout).await;

    assert_eq!(result.verdict, Verdict::Timeout);
    assert!(result.standard_error.contains("timeout"));
    assert!(result.duration_seconds >= 0.05);
}

#[tokio::test]
async fn test_crash_verdict() {
    let result = run_with(MockOutcome::Crash { signal: 11 }).await;

    assert_eq!(result.verdict, Verdict::Crashed);
    assert_eq!(result.standard_error, "Program was killed by signal 11");
}

#[tokio::test]
async fn test_internal_error_verdict() {
    let result = run_with(MockOutcome::InternalError("runtime missing".to_string())).await;

    assert_eq!(result.verdict, Verdict::InternalError);
    assert_eq!(result.standard_error, "Internal error: runtime missing");
}

#[tokio::test]
async fn test_unknown_status_verdict() {
    let result = run_with(MockOutcome::Raw {
        meta: Some("status:ML\n".to_string()),
        output: None,
    })
    .await;

    assert_eq!(result.verdict, Verdict::UnknownError);
    assert!(result.standard_error.contains("ML"));
}

#[tokio::test]
async fn test_malformed_output_is_internal_error() {
    let result = run_with(MockOutcome::Raw {
        meta: Some("exitcode:0\n".to_string()),
        output: Some("{not json".to_string()),
    })
    .await;

    assert_eq!(result.verdict, Verdict::InternalError);
    assert!(result.standard_error.contains("malformed output"));
    assert_eq!(result.output, None);
}

#[tokio::test]
async fn test_missing_status_marker_is_internal_error() {
    let result = run_with(MockOutcome::Raw {
        meta: None,
        output: None,
    })
    .await;

    assert_eq!(result.verdict, Verdict::InternalError);
}

// ============================================================================
// Unit hygiene
// ============================================================================

#[tokio::test]
async fn test_crashed_unit_is_wiped_before_reuse() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let pool = test_pool(&temp_dir, 1, Duration::from_secs(5));
    let runner = CodeRunner::builder()
        .pool(pool.clone())
        .boundary(Arc::new(MockBoundary::with_outcome(MockOutcome::Crash {
            signal: 9,
        })))
        .build()
        .unwrap();

    let result = runner.execute(&request()).await.unwrap();
    assert_eq!(result.verdict, Verdict::Crashed);

    let lease = pool.acquire(&CancellationToken::new()).await.unwrap();
    let leftovers: Vec<_> = std::fs::read_dir(lease.unit().scratch_path())
        .unwrap()
        .collect();
    assert!(leftovers.is_empty(), "scratch not wiped: {:?}", leftovers);
    lease.release(false).await;
    assert_eq!(pool.stats().retired, 0);
}

#[tokio::test]
async fn test_ok_unit_is_cleared_before_reuse() {
    let temp_dir = TempDir::new().unwrap();
    let pool = test_pool(&temp_dir, 1, Duration::from_secs(5));
    let runner = CodeRunner::builder()
        .pool(pool.clone())
        .boundary(Arc::new(MockBoundary::new()))
        .build()
        .unwrap();

    runner.execute(&request()).await.unwrap();

    let lease = pool.acquire(&CancellationToken::new()).await.unwrap();
    assert!(!lease.unit().scratch_path().join("output.json").exists());
    assert!(!lease.unit().scratch_path().join("artifact").exists());
    lease.release(false).await;
}

#[tokio::test]
async fn test_boundary_panic_releases_unit() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let pool = test_pool(&temp_dir, 1, Duration::from_millis(500));
    let runner = CodeRunner::builder()
        .pool(pool.clone())
        .boundary(Arc::new(MockBoundary::panicking()))
        .build()
        .unwrap();

    let task = {
        let runner = runner.clone();
        tokio::spawn(async move { runner.execute(&request()).await })
    };
    assert!(task.await.unwrap_err().is_panic());

    // Acquiring again waits for the dropped lease's wipe
    let lease = pool.acquire(&CancellationToken::new()).await.unwrap();
    let stats = pool.stats();
    assert_eq!(stats.live, 1);
    assert_eq!(stats.in_use, 1);
    lease.release(false).await;
    assert_eq!(pool.stats().idle, 1);
}

// ============================================================================
// Pool bound
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_unit_serializes_executions() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let boundary = Arc::new(MockBoundary::new().with_delay(Duration::from_millis(50)));
    let runner = test_runner(&temp_dir, 1, boundary.clone(), ResourceLimits::default());

    let (first, second) = (request(), request());
    let started = Instant::now();
    let (a, b) = tokio::join!(runner.execute(&first), runner.execute(&second));
    let elapsed = started.elapsed();

    assert_eq!(a.unwrap().verdict, Verdict::Ok);
    assert_eq!(b.unwrap().verdict, Verdict::Ok);
    assert!(elapsed >= Duration::from_millis(100), "ran concurrently: {:?}", elapsed);
    assert_eq!(boundary.max_concurrent(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_never_exceeds_pool_size() {
    let temp_dir = TempDir::new().unwrap();
    let boundary = Arc::new(MockBoundary::new().with_delay(Duration::from_millis(20)));
    let runner = test_runner(&temp_dir, 3, boundary.clone(), ResourceLimits::default());

    let runs = (0..12).map(|_| {
        let runner = runner.clone();
        async move { runner.execute(&request()).await }
    });
    for result in futures::future::join_all(runs).await {
        assert_eq!(result.unwrap().verdict, Verdict::Ok);
    }

    assert_eq!(boundary.runs(), 12);
    assert!(boundary.max_concurrent() <= 3);
    assert!(runner.pool().stats().live <= 3);
}

#[tokio::test]
async fn test_exhausted_pool_is_not_a_verdict() {
    let temp_dir = TempDir::new().unwrap();
    let pool = test_pool(&temp_dir, 1, Duration::from_millis(50));
    let runner = CodeRunner::builder()
        .pool(pool.clone())
        .boundary(Arc::new(MockBoundary::new()))
        .build()
        .unwrap();

    let held = pool.acquire(&CancellationToken::new()).await.unwrap();
    let result = runner.execute(&request()).await;
    assert!(matches!(result, Err(SandboxError::PoolTimeout { .. })));
    held.release(false).await;
}

#[tokio::test]
async fn test_cancelled_before_acquire() {
    let temp_dir = TempDir::new().unwrap();
    let pool = test_pool(&temp_dir, 1, Duration::from_secs(5));
    let runner = CodeRunner::builder()
        .pool(pool.clone())
        .boundary(Arc::new(MockBoundary::new()))
        .build()
        .unwrap();

    let held = pool.acquire(&CancellationToken::new()).await.unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = runner.execute_cancellable(&request(), &cancel).await;
    assert!(matches!(result, Err(SandboxError::Cancelled)));
    held.release(false).await;
}
