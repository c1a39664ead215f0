// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Isolation boundary - the OS primitive that actually runs a program.
//!
//! A boundary runs a staged program under resource limits and reports how it
//! exited. It is a pure execution engine: it never touches the pool and never
//! classifies. Implementations (subprocess + rlimits, containers, microVMs)
//! are swappable behind [`IsolationBoundary`].

pub mod mock;
pub mod subprocess;

use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;

use crate::error::Result;
use crate::stager::StagedExecution;
use crate::verdict::{ExitReport, OutputFile};

pub use mock::{MockBoundary, MockOutcome};
pub use subprocess::SubprocessBoundary;

/// Resource limits applied to one execution.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Wall-clock budget; exceeding it is a hard kill
    pub timeout: Duration,
    /// Grace between SIGTERM and SIGKILL
    pub kill_grace: Duration,
    /// Cap on each captured output stream
    pub max_output_bytes: usize,
    /// Address-space limit (`RLIMIT_AS`)
    pub memory_bytes: Option<u64>,
    /// Open file descriptor limit (`RLIMIT_NOFILE`)
    pub max_open_files: Option<u64>,
    /// Largest file the program may create (`RLIMIT_FSIZE`)
    pub max_file_size_bytes: Option<u64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            kill_grace: Duration::from_millis(500),
            max_output_bytes: 64 * 1024,
            memory_bytes: None,
            max_open_files: None,
            max_file_size_bytes: Some(64 * 1024 * 1024),
        }
    }
}

/// A captured output stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedStream {
    /// Captured text, lossily decoded
    pub text: String,
    /// Whether bytes past the cap were discarded
    pub truncated: bool,
}

impl CapturedStream {
    /// Stream text with a marker appended when it was truncated.
    pub fn into_text(self) -> String {
        if self.truncated {
            format!("{}\n[output truncated]", self.text)
        } else {
            self.text
        }
    }
}

/// What a boundary observed for one run.
#[derive(Debug, Clone)]
pub struct BoundaryOutcome {
    /// Exit report, or `None` if the harness left no status marker
    pub report: Option<ExitReport>,
    /// State of the program's output file
    pub output: OutputFile,
    /// Captured stdout
    pub stdout: CapturedStream,
    /// Captured stderr
    pub stderr: CapturedStream,
}

/// Trait for isolation boundaries.
///
/// `run` returns `Err` only when the program could not be run at all
/// (e.g. the sandbox tool is missing). A crashing or hanging program is a
/// normal outcome.
#[async_trait]
pub trait IsolationBoundary: Send + Sync {
    /// Boundary type identifier (e.g., "subprocess", "mock")
    fn boundary_type(&self) -> &'static str;

    /// Run a staged program to completion or timeout.
    async fn run(&self, staged: &StagedExecution, limits: &ResourceLimits)
    -> Result<BoundaryOutcome>;
}

/// Read the status marker and output file left in a scratch directory.
pub(crate) async fn collect_exit_files(staged: &StagedExecution) -> (Option<ExitReport>, OutputFile) {
    let report = match fs::read_to_string(&staged.meta_path).await {
        Ok(text) => Some(ExitReport::parse(&text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => Some(ExitReport::internal(format!("cannot read status marker: {}", e))),
    };

    let output = match fs::read_to_string(&staged.output_path).await {
        Ok(raw) => OutputFile::from_contents(Some(&raw)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => OutputFile::Missing,
        Err(e) => OutputFile::Malformed(e.to_string()),
    };

    (report, output)
}
