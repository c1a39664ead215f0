// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for trellis-polling.

use thiserror::Error;

use crate::item::PollingStrategy;

/// Errors raised by a [`crate::store::Store`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A value could not be encoded or decoded.
    #[error("Store serialization error: {0}")]
    Serialization(String),
}

/// Polling engine errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PollingError {
    /// The caller's fetch failed; surfaced unmodified.
    #[error(transparent)]
    Fetch(anyhow::Error),

    /// Reading or writing the cursor failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The stored cursor has an unexpected shape.
    #[error("Corrupt cursor under '{key}': {reason}")]
    CorruptCursor {
        /// Store key holding the cursor
        key: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// The fetch returned an item of the other strategy.
    #[error("Fetched a {found} item for a {expected} trigger")]
    StrategyMismatch {
        /// Strategy the trigger uses
        expected: PollingStrategy,
        /// Strategy of the offending item
        found: PollingStrategy,
    },
}

/// Result type using PollingError.
pub type Result<T> = std::result::Result<T, PollingError>;
