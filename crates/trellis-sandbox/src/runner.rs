// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Code runner.
//!
//! Orchestrates one execution: acquire a unit, stage the artifact, run it
//! behind the isolation boundary, classify the outcome and release the unit.
//! A failing program is a [`Verdict`], not an error; `Err` means the
//! execution could not be attempted.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::boundary::{IsolationBoundary, ResourceLimits, SubprocessBoundary};
use crate::config::{Config, ConfigError};
use crate::error::{Result, SandboxError};
use crate::pool::{IsolationPool, PoolConfig};
use crate::stager::ArtifactStager;
use crate::types::{CodeExecutionRequest, CodeExecutionResult};
use crate::verdict::{OutputFile, Verdict, classify, describe};

/// Phase of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    /// Writing artifact and input into the unit
    Staging,
    /// Program running behind the boundary
    Running,
    /// Program exited on its own
    Completed,
    /// Program was killed after exceeding its timeout
    TimedOut,
    /// Program was killed by a signal
    Crashed,
    /// Unit returned to the pool
    Released,
}

impl ExecutionPhase {
    fn after_run(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Timeout => ExecutionPhase::TimedOut,
            Verdict::Crashed => ExecutionPhase::Crashed,
            _ => ExecutionPhase::Completed,
        }
    }
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionPhase::Staging => "staging",
            ExecutionPhase::Running => "running",
            ExecutionPhase::Completed => "completed",
            ExecutionPhase::TimedOut => "timed_out",
            ExecutionPhase::Crashed => "crashed",
            ExecutionPhase::Released => "released",
        };
        f.write_str(name)
    }
}

/// Builder for creating a [`CodeRunner`].
pub struct CodeRunnerBuilder {
    pool: Option<IsolationPool>,
    boundary: Option<Arc<dyn IsolationBoundary>>,
    limits: ResourceLimits,
}

impl Default for CodeRunnerBuilder {
    fn default() -> Self {
        Self {
            pool: None,
            boundary: None,
            limits: ResourceLimits::default(),
        }
    }
}

impl CodeRunnerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the isolation pool.
    ///
    /// Default: a pool built from [`PoolConfig::default()`]
    pub fn pool(mut self, pool: IsolationPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Set the isolation boundary.
    ///
    /// Default: [`SubprocessBoundary`]
    pub fn boundary(mut self, boundary: Arc<dyn IsolationBoundary>) -> Self {
        self.boundary = Some(boundary);
        self
    }

    /// Set the timeout applied when a request carries none.
    ///
    /// Default: 600 seconds
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.limits.timeout = timeout;
        self
    }

    /// Set the resource limits, including the default timeout.
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Build the runner.
    pub fn build(self) -> Result<CodeRunner> {
        if self.limits.timeout.is_zero() {
            return Err(SandboxError::Config(ConfigError::Invalid(
                "default timeout",
                "must be greater than zero",
            )));
        }

        let pool = self
            .pool
            .unwrap_or_else(|| IsolationPool::new(PoolConfig::default()));
        let boundary = self
            .boundary
            .unwrap_or_else(|| Arc::new(SubprocessBoundary::new()));

        info!(
            boundary = boundary.boundary_type(),
            max_units = pool.config().max_units,
            default_timeout_ms = self.limits.timeout.as_millis() as u64,
            "Code runner ready"
        );

        Ok(CodeRunner {
            pool,
            stager: ArtifactStager::new(),
            boundary,
            limits: self.limits,
        })
    }
}

/// Runs code steps inside pooled isolation units.
///
/// Cheap to clone; clones share the pool and the boundary.
#[derive(Clone)]
pub struct CodeRunner {
    pool: IsolationPool,
    stager: ArtifactStager,
    boundary: Arc<dyn IsolationBoundary>,
    limits: ResourceLimits,
}

impl CodeRunner {
    /// Create a builder.
    pub fn builder() -> CodeRunnerBuilder {
        CodeRunnerBuilder::new()
    }

    /// Create a runner using the subprocess boundary and settings from `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        CodeRunnerBuilder::new()
            .pool(IsolationPool::new(config.pool_config()))
            .boundary(Arc::new(SubprocessBoundary::new()))
            .limits(config.resource_limits())
            .build()
    }

    /// The runner's pool.
    pub fn pool(&self) -> &IsolationPool {
        &self.pool
    }

    /// Execute one request, waiting for a free unit as long as the pool allows.
    pub async fn execute(&self, request: &CodeExecutionRequest) -> Result<CodeExecutionResult> {
        self.execute_cancellable(request, &CancellationToken::new())
            .await
    }

    /// Execute one request.
    ///
    /// `cancel` only interrupts the wait for a unit. Once staged, the program
    /// runs to completion or timeout.
    pub async fn execute_cancellable(
        &self,
        request: &CodeExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<CodeExecutionResult> {
        let execution_id = Uuid::new_v4();
        let limits = ResourceLimits {
            timeout: request
                .timeout
                .filter(|timeout| !timeout.is_zero())
                .unwrap_or(self.limits.timeout),
            ..self.limits.clone()
        };

        let lease = self.pool.acquire(cancel).await?;
        let unit_id = lease.unit().id();
        debug!(
            %execution_id,
            unit_id = %unit_id,
            phase = %ExecutionPhase::Staging,
            "Execution phase"
        );

        let staged = match self
            .stager
            .stage(lease.unit(), &request.artifact, &request.input)
            .await
        {
            Ok(staged) => staged,
            Err(e) => {
                error!(%execution_id, unit_id = %unit_id, error = %e, "Staging failed");
                lease.release(true).await;
                debug!(%execution_id, phase = %ExecutionPhase::Released, "Execution phase");
                return Err(e);
            }
        };

        lease.mark_executing();
        debug!(
            %execution_id,
            unit_id = %unit_id,
            phase = %ExecutionPhase::Running,
            digest = %staged.artifact_digest,
            timeout_ms = limits.timeout.as_millis() as u64,
            "Execution phase"
        );

        let started = Instant::now();
        let outcome = match self.boundary.run(&staged, &limits).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(%execution_id, unit_id = %unit_id, error = %e, "Isolation boundary failed");
                lease.release(true).await;
                debug!(%execution_id, phase = %ExecutionPhase::Released, "Execution phase");
                return Err(e);
            }
        };
        let duration = started.elapsed();

        let verdict = classify(outcome.report.as_ref(), &outcome.output);
        let phase = ExecutionPhase::after_run(verdict);
        if outcome.stdout.truncated || outcome.stderr.truncated {
            warn!(%execution_id, unit_id = %unit_id, "Captured output was truncated");
        }

        let mut standard_error = outcome.stderr.into_text();
        if verdict != Verdict::Ok && standard_error.trim().is_empty() {
            standard_error = describe(verdict, outcome.report.as_ref(), &outcome.output);
        }
        let output = match (verdict, outcome.output) {
            (Verdict::Ok, OutputFile::Valid(value)) => Some(value),
            (Verdict::Ok, _) => Some(serde_json::Value::Null),
            _ => None,
        };

        info!(
            %execution_id,
            unit_id = %unit_id,
            phase = %phase,
            verdict = %verdict,
            duration_ms = duration.as_millis() as u64,
            "Execution finished"
        );

        lease.release(verdict.taints_unit()).await;
        debug!(
            %execution_id,
            unit_id = %unit_id,
            phase = %ExecutionPhase::Released,
            tainted = verdict.taints_unit(),
            "Execution phase"
        );

        Ok(CodeExecutionResult {
            verdict,
            duration_seconds: duration.as_secs_f64(),
            output,
            standard_output: outcome.stdout.into_text(),
            standard_error,
        })
    }
}
