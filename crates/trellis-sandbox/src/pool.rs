// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded pool of isolation units.
//!
//! The pool bounds the number of concurrently running executions and
//! guarantees that no two executions share a scratch directory. Units are
//! created lazily up to `max_units` and reused afterwards.
//!
//! A unit leaves the pool only inside a [`UnitLease`]. Releasing the lease
//! returns the unit; dropping it on any other path (early return, error,
//! panic) releases it as tainted, so a unit can never leak.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SandboxError};
use crate::unit::{IsolationUnit, UnitId, UnitState};

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Base directory holding one scratch directory per unit
    pub scratch_root: PathBuf,
    /// Maximum number of units (and concurrent executions)
    pub max_units: usize,
    /// Bounded wait in [`IsolationPool::acquire`]
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            scratch_root: PathBuf::from(".data/sandbox"),
            max_units: 4,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Configured bound
    pub max_units: usize,
    /// Units currently known to the pool (idle + in use)
    pub live: usize,
    /// Units ready to be acquired
    pub idle: usize,
    /// Units held by a lease
    pub in_use: usize,
    /// Units discarded after a failed wipe
    pub retired: u64,
}

#[derive(Default)]
struct Registry {
    states: HashMap<UnitId, UnitState>,
    idle: VecDeque<IsolationUnit>,
    next_id: u64,
    retired: u64,
}

struct PoolInner {
    config: PoolConfig,
    permits: Arc<Semaphore>,
    registry: Mutex<Registry>,
}

impl PoolInner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Critical sections never leave the registry half-updated
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take an idle unit or allocate a new slot. Caller holds a permit.
    fn check_out(&self) -> (IsolationUnit, bool) {
        let mut registry = self.registry();
        if let Some(unit) = registry.idle.pop_front() {
            registry.states.insert(unit.id(), UnitState::Acquired);
            return (unit, false);
        }

        let id = UnitId(registry.next_id);
        registry.next_id += 1;
        registry.states.insert(id, UnitState::Acquired);
        (IsolationUnit::new(id, &self.config.scratch_root), true)
    }

    fn set_state(&self, id: UnitId, state: UnitState) {
        let mut registry = self.registry();
        if let Some(current) = registry.states.get_mut(&id) {
            *current = state;
        }
    }

    fn state(&self, id: UnitId) -> Option<UnitState> {
        self.registry().states.get(&id).copied()
    }

    /// Return a unit to the idle list, or retire it.
    ///
    /// Returning a unit that is already idle or retired is a no-op.
    fn check_in(&self, unit: IsolationUnit, reusable: bool) {
        let mut registry = self.registry();
        let id = unit.id();
        match registry.states.get(&id) {
            None => {
                debug!(unit_id = %id, "Unit already retired, ignoring release");
                return;
            }
            Some(UnitState::Idle) => {
                debug!(unit_id = %id, "Unit already idle, ignoring release");
                return;
            }
            Some(_) => {}
        }

        if reusable {
            registry.states.insert(id, UnitState::Idle);
            registry.idle.push_back(unit);
            debug!(unit_id = %id, "Unit returned to pool");
        } else {
            registry.states.remove(&id);
            registry.retired += 1;
            warn!(unit_id = %id, "Unit retired");
        }
    }
}

/// Bounded pool of isolation units.
///
/// Cheap to clone; clones share the same units.
#[derive(Clone)]
pub struct IsolationPool {
    inner: Arc<PoolInner>,
}

impl IsolationPool {
    /// Create a new pool. No unit is created until first acquired.
    pub fn new(config: PoolConfig) -> Self {
        info!(
            scratch_root = %config.scratch_root.display(),
            max_units = config.max_units,
            acquire_timeout_ms = config.acquire_timeout.as_millis() as u64,
            "Isolation pool created"
        );

        Self {
            inner: Arc::new(PoolInner {
                permits: Arc::new(Semaphore::new(config.max_units)),
                registry: Mutex::new(Registry::default()),
                config,
            }),
        }
    }

    /// Pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Acquire a unit, waiting until one is free.
    ///
    /// Fails with [`SandboxError::Cancelled`] if `cancel` fires while
    /// waiting, and with [`SandboxError::PoolTimeout`] once the configured
    /// bounded wait elapses. Neither path grants a unit.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<UnitLease> {
        let started = Instant::now();
        let wait = self.inner.config.acquire_timeout;

        // A permit granted concurrently with cancellation is returned to the
        // semaphore when the losing acquire future is dropped.
        let permit = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("Acquire cancelled while waiting for a unit");
                return Err(SandboxError::Cancelled);
            }

            acquired = tokio::time::timeout(wait, self.inner.permits.clone().acquire_owned()) => {
                match acquired {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return Err(SandboxError::PoolClosed),
                    Err(_) => {
                        let waited = started.elapsed();
                        warn!(waited_ms = waited.as_millis() as u64, "Timed out waiting for an isolation unit");
                        return Err(SandboxError::PoolTimeout { waited });
                    }
                }
            }
        };

        let (unit, fresh) = self.inner.check_out();
        let lease = UnitLease {
            pool: self.inner.clone(),
            unit,
            released: false,
            permit: Some(permit),
        };

        if fresh && let Err(e) = lease.unit.prepare().await {
            error!(unit_id = %lease.unit.id(), error = %e, "Failed to create scratch directory");
            lease.release(true).await;
            return Err(SandboxError::Staging(format!(
                "cannot create scratch directory: {}",
                e
            )));
        }

        debug!(
            unit_id = %lease.unit.id(),
            fresh = fresh,
            waited_ms = started.elapsed().as_millis() as u64,
            "Unit acquired"
        );
        Ok(lease)
    }

    /// Close the pool. Pending and future acquisitions fail with `PoolClosed`.
    pub fn close(&self) {
        self.inner.permits.close();
        info!("Isolation pool closed");
    }

    /// Current pool statistics.
    pub fn stats(&self) -> PoolStats {
        let registry = self.inner.registry();
        let live = registry.states.len();
        let idle = registry.idle.len();
        PoolStats {
            max_units: self.inner.config.max_units,
            live,
            idle,
            in_use: live - idle,
            retired: registry.retired,
        }
    }

    /// State of a unit, or `None` if it is unknown or retired.
    pub fn unit_state(&self, id: UnitId) -> Option<UnitState> {
        self.inner.state(id)
    }
}

/// Scoped, exclusive ownership of one isolation unit.
///
/// Call [`release`](Self::release) to return the unit. A lease dropped
/// without being released is treated as tainted: its wipe runs on the
/// blocking pool, and the unit's slot stays taken until the wipe is done.
pub struct UnitLease {
    pool: Arc<PoolInner>,
    unit: IsolationUnit,
    released: bool,
    // Taken by the Drop path so the slot frees only after check-in
    permit: Option<OwnedSemaphorePermit>,
}

impl UnitLease {
    /// The leased unit.
    pub fn unit(&self) -> &IsolationUnit {
        &self.unit
    }

    /// Mark the unit as running a program.
    pub fn mark_executing(&self) {
        self.pool.set_state(self.unit.id(), UnitState::Executing);
    }

    /// Return the unit to the pool.
    ///
    /// A tainted unit has its scratch directory deleted and recreated; if
    /// that fails the unit is retired instead of being reused. An untainted
    /// unit only has its scratch contents cleared.
    pub async fn release(mut self, tainted: bool) {
        let id = self.unit.id();
        let reusable = if tainted {
            self.pool.set_state(id, UnitState::Tainted);
            wipe_or_retire(&self.unit).await
        } else {
            match self.unit.clear().await {
                Ok(()) => true,
                Err(e) => {
                    warn!(unit_id = %id, error = %e, "Failed to clear scratch directory, wiping unit");
                    self.pool.set_state(id, UnitState::Tainted);
                    wipe_or_retire(&self.unit).await
                }
            }
        };

        // Only set after the awaits: a release future dropped mid-wipe still
        // falls back to the Drop path.
        self.released = true;
        self.pool.check_in(self.unit.clone(), reusable);
        debug!(unit_id = %id, tainted = tainted, "Unit released");
    }
}

async fn wipe_or_retire(unit: &IsolationUnit) -> bool {
    match unit.wipe().await {
        Ok(()) => true,
        Err(e) => {
            error!(unit_id = %unit.id(), error = %e, "Failed to wipe tainted unit");
            false
        }
    }
}

impl Drop for UnitLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let id = self.unit.id();
        warn!(unit_id = %id, "Lease dropped without release, wiping unit");
        self.pool.set_state(id, UnitState::Tainted);

        let pool = self.pool.clone();
        let unit = self.unit.clone();
        let permit = self.permit.take();
        let wipe = move || {
            let reusable = match unit.wipe_blocking() {
                Ok(()) => true,
                Err(e) => {
                    error!(unit_id = %unit.id(), error = %e, "Failed to wipe tainted unit");
                    false
                }
            };
            pool.check_in(unit, reusable);
            drop(permit);
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(wipe);
            }
            // Outside a runtime there is no worker to block
            Err(_) => wipe(),
        }
    }
}
