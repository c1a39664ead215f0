// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Trellis Sandbox - Code Step Execution
//!
//! This crate runs untrusted, user-authored code steps of a flow. Each
//! execution gets a disposable scratch directory from a bounded pool, runs
//! under a hard timeout behind an isolation boundary, and is reported back as
//! a classified [`Verdict`] rather than an error.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Flow step executor                               │
//! │            CodeExecutionRequest ──►  ◄── CodeExecutionResult            │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            CodeRunner                                   │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐     │
//! │  │  Isolation  │  │  Artifact   │  │  Isolation  │  │   Verdict   │     │
//! │  │    Pool     │  │   Stager    │  │  Boundary   │  │  Classifier │     │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └─────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           │                                   │
//!           ▼                                   ▼ spawn (process group,
//! ┌───────────────────────┐          ┌─────────────────────────┐ rlimits)
//! │ {root}/unit-{id}/     │◄─────────│  sh harness.sh          │
//! │  artifact input.json  │          │   └─ ./artifact         │
//! │  output.json meta     │          └─────────────────────────┘
//! └───────────────────────┘
//! ```
//!
//! # Execution State Machine
//!
//! ```text
//!   Staging ──► Running ──┬──► Completed ──┐
//!      │                  ├──► TimedOut  ──┼──► Released
//!      │                  └──► Crashed   ──┘        ▲
//!      └────────────── (staging failure) ───────────┘
//! ```
//!
//! # Verdicts
//!
//! | Exit signal | Verdict | Unit tainted |
//! |-------------|---------|--------------|
//! | normal exit | `OK` | no |
//! | internal/setup failure | `INTERNAL_ERROR` | yes |
//! | wall-clock budget exceeded | `TIMEOUT` | yes |
//! | non-zero exit | `RUNTIME_ERROR` | no |
//! | killed by signal | `CRASHED` | yes |
//! | unrecognized marker | `UNKNOWN_ERROR` | yes |
//!
//! # Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `TRELLIS_SANDBOX_ROOT` | `.data/sandbox` | Scratch root for isolation units |
//! | `TRELLIS_MAX_UNITS` | `4` | Maximum concurrent executions |
//! | `TRELLIS_ACQUIRE_TIMEOUT_SECS` | `30` | Bounded wait for a free unit |
//! | `TRELLIS_EXECUTION_TIMEOUT_SECS` | `600` | Default execution timeout |
//! | `TRELLIS_KILL_GRACE_MS` | `500` | Grace between SIGTERM and SIGKILL |
//! | `TRELLIS_MAX_OUTPUT_BYTES` | `65536` | Cap per captured stream |
//! | `TRELLIS_MEMORY_LIMIT_MB` | - | Address-space limit |
//! | `TRELLIS_MAX_OPEN_FILES` | - | Open file descriptor limit |
//!
//! # Modules
//!
//! - [`boundary`]: The isolation boundary seam and its implementations
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Infrastructure error types
//! - [`pool`]: Bounded pool of isolation units
//! - [`runner`]: Orchestration of one execution
//! - [`stager`]: Scratch directory preparation
//! - [`types`]: Wire contract (request/result)
//! - [`unit`]: Isolation unit primitive
//! - [`verdict`]: Exit report parsing and verdict classification

#![deny(missing_docs)]

/// Isolation boundary trait and implementations (subprocess, mock).
pub mod boundary;

/// Configuration loaded from environment variables.
pub mod config;

/// Error types for sandbox infrastructure failures.
pub mod error;

/// Bounded pool of isolation units with scoped leases.
pub mod pool;

/// Code runner orchestrating stage, run, classify and release.
pub mod runner;

/// Materializes artifact, input and harness into a unit's scratch space.
pub mod stager;

/// Code execution request/result contract.
pub mod types;

/// Isolation unit primitive.
pub mod unit;

/// Exit reports and verdict classification.
pub mod verdict;

pub use config::Config;
pub use error::{Result, SandboxError};
pub use pool::{IsolationPool, PoolConfig, PoolStats, UnitLease};
pub use runner::{CodeRunner, CodeRunnerBuilder, ExecutionPhase};
pub use types::{CodeExecutionRequest, CodeExecutionResult};
pub use verdict::Verdict;
