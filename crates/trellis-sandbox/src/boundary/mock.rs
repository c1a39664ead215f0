// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock boundary for testing.
//!
//! Simulates a run without spawning processes: it writes the status marker
//! and output file a real harness would leave behind, then reads them back
//! the same way the subprocess boundary does.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;

use super::{BoundaryOutcome, CapturedStream, IsolationBoundary, ResourceLimits, collect_exit_files};
use crate::error::Result;
use crate::stager::StagedExecution;
use crate::verdict::ExitReport;

/// What a mock run pretends the program did.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Exit 0 and write the staged input back as output
    EchoInput,
    /// Exit 0 and write the given output
    Output(Value),
    /// Exit non-zero
    RuntimeError {
        /// Program exit code
        exit_code: i32,
        /// Text the program printed to stderr
        stderr: String,
    },
    /// Run past the timeout
    Timeout,
    /// Get killed by a signal
    Crash {
        /// Terminating signal
        signal: i32,
    },
    /// Harness failure with a message
    InternalError(String),
    /// Leave the given raw marker and output file contents
    Raw {
        /// Contents of the status marker, if any
        meta: Option<String>,
        /// Contents of the output file, if any
        output: Option<String>,
    },
}

/// Mock boundary for testing.
pub struct MockBoundary {
    /// Simulated execution time (in milliseconds)
    pub execution_delay_ms: u64,
    /// If true, `run` panics after the delay
    pub panic_on_run: bool,
    /// Simulated result
    pub outcome: MockOutcome,
    runs: AtomicUsize,
    active: Arc<AtomicUsize>,
    max_concurrent: AtomicUsize,
}

impl Default for MockBoundary {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBoundary {
    /// Create a mock boundary echoing its input after 10ms.
    pub fn new() -> Self {
        Self::with_outcome(MockOutcome::EchoInput)
    }

    /// Create a mock boundary producing the given outcome.
    pub fn with_outcome(outcome: MockOutcome) -> Self {
        Self {
            execution_delay_ms: 10,
            panic_on_run: false,
            outcome,
            runs: AtomicUsize::new(0),
            active: Arc::new(AtomicUsize::new(0)),
            max_concurrent: AtomicUsize::new(0),
        }
    }

    /// Set the simulated execution time.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.execution_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Create a mock boundary whose runs panic.
    pub fn panicking() -> Self {
        Self {
            panic_on_run: true,
            ..Self::new()
        }
    }

    /// Number of runs started.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Highest number of runs observed in flight at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    async fn leave_files(&self, staged: &StagedExecution) -> std::io::Result<CapturedStream> {
        let mut stderr = CapturedStream::default();
        let (meta, output): (Option<String>, Option<String>) = match &self.outcome {
            MockOutcome::EchoInput => {
                let input = fs::read_to_string(&staged.input_path).await?;
                (Some("exitcode:0\n".into()), Some(input))
            }
            MockOutcome::Output(value) => (Some("exitcode:0\n".into()), Some(value.to_string())),
            MockOutcome::RuntimeError {
                exit_code,
                stderr: text,
            } => {
                stderr.text = text.clone();
                (Some(format!("status:RE\nexitcode:{}\n", exit_code)), None)
            }
            MockOutcome::Crash { signal } => (
                Some(format!("status:SG\nexitsig:{}\nexitcode:{}\n", signal, 128 + signal)),
                None,
            ),
            MockOutcome::InternalError(message) => {
                (Some(format!("status:XX\nmessage:{}\n", message)), None)
            }
            MockOutcome::Raw { meta, output } => (meta.clone(), output.clone()),
            // Reported by the boundary itself, not the harness
            MockOutcome::Timeout => (None, None),
        };

        if let Some(meta) = meta {
            fs::write(&staged.meta_path, meta).await?;
        }
        if let Some(output) = output {
            fs::write(&staged.output_path, output).await?;
        }
        Ok(stderr)
    }
}

/// Decrements the in-flight counter even if the run panics.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl IsolationBoundary for MockBoundary {
    fn boundary_type(&self) -> &'static str {
        "mock"
    }

    async fn run(&self, staged: &StagedExecution, limits: &ResourceLimits) -> Result<BoundaryOutcome> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);
        let _active = ActiveGuard(self.active.clone());

        let delay = match self.outcome {
            MockOutcome::Timeout => limits.timeout,
            _ => Duration::from_millis(self.execution_delay_ms),
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.panic_on_run {
            panic!("mock boundary panicked");
        }

        let stderr = self.leave_files(staged).await?;
        let (meta, output) = collect_exit_files(staged).await;
        let report = match self.outcome {
            MockOutcome::Timeout => Some(ExitReport::timed_out(format!(
                "Execution exceeded timeout of {}ms",
                limits.timeout.as_millis()
            ))),
            _ => meta,
        };

        Ok(BoundaryOutcome {
            report,
            output,
            stdout: CapturedStream::default(),
            stderr,
        })
    }
}
