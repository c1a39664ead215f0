// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for trellis-sandbox.
//!
//! These are infrastructure errors: the runtime could not attempt the work.
//! A program that ran and failed is reported as a [`crate::Verdict`] instead.

use std::time::Duration;

use thiserror::Error;

/// Sandbox infrastructure errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SandboxError {
    /// No isolation unit became available within the bounded wait.
    #[error("Timed out after {waited:?} waiting for an isolation unit")]
    PoolTimeout {
        /// How long the caller waited.
        waited: Duration,
    },

    /// The caller cancelled while waiting for an isolation unit.
    #[error("Acquire cancelled")]
    Cancelled,

    /// The pool was closed and accepts no further acquisitions.
    #[error("Isolation pool is closed")]
    PoolClosed,

    /// The artifact can never run; retrying the same request fails again.
    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    /// Preparing the scratch directory failed.
    #[error("Staging failed: {0}")]
    Staging(String),

    /// The isolation boundary could not run the program at all.
    #[error("Isolation boundary failed: {0}")]
    Boundary(String),

    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SandboxError {
    /// Whether the error means the execution never started.
    ///
    /// Such failures are eligible for caller-level retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SandboxError::PoolTimeout { .. } | SandboxError::Staging(_) | SandboxError::Io(_)
        )
    }
}

/// Result type using SandboxError.
pub type Result<T> = std::result::Result<T, SandboxError>;
