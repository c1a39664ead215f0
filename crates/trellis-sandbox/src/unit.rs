// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Isolation unit primitive.
//!
//! A unit is one pool slot: an exclusive scratch directory plus the state the
//! pool tracks for it. Units are only ever handed out through a
//! [`crate::pool::UnitLease`].

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Opaque handle of a pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub u64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit-{}", self.0)
    }
}

/// Lifecycle state of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    /// Owned by the pool, ready to be acquired
    Idle,
    /// Exclusively owned by one caller
    Acquired,
    /// A program is running in the unit's scratch directory
    Executing,
    /// Last execution left undefined state; must be wiped before reuse
    Tainted,
}

/// One disposable execution environment.
#[derive(Debug, Clone)]
pub struct IsolationUnit {
    id: UnitId,
    scratch_path: PathBuf,
}

impl IsolationUnit {
    pub(crate) fn new(id: UnitId, scratch_root: &Path) -> Self {
        Self {
            id,
            scratch_path: scratch_root.join(id.to_string()),
        }
    }

    /// Handle of this unit.
    pub fn id(&self) -> UnitId {
        self.id
    }

    /// Exclusive scratch directory of this unit.
    pub fn scratch_path(&self) -> &Path {
        &self.scratch_path
    }

    /// Create the scratch directory if it does not exist yet.
    pub(crate) async fn prepare(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.scratch_path).await
    }

    /// Remove every entry inside the scratch directory, keeping the directory.
    pub(crate) async fn clear(&self) -> std::io::Result<()> {
        let mut entries = tokio::fs::read_dir(&self.scratch_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }

    /// Delete and recreate the scratch directory.
    pub(crate) async fn wipe(&self) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(&self.scratch_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        tokio::fs::create_dir_all(&self.scratch_path).await
    }

    /// Blocking variant of [`wipe`](Self::wipe) for release from `Drop`.
    pub(crate) fn wipe_blocking(&self) -> std::io::Result<()> {
        match std::fs::remove_dir_all(&self.scratch_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        std::fs::create_dir_all(&self.scratch_path)
    }
}
