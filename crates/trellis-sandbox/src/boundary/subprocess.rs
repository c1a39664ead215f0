// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Subprocess isolation boundary.
//!
//! Runs the harness with `/bin/sh` in the unit's scratch directory, in its
//! own process group, with a cleared environment and POSIX rlimits installed
//! in a `pre_exec` hook (after `fork()`, before `execve()`), so the program
//! never runs without its limits.
//!
//! The timeout is enforced here, not by the caller: when it fires the whole
//! process group gets SIGTERM, then SIGKILL once the grace period is over.

use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nix::sys::resource::{Resource, rlim_t, setrlimit};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BoundaryOutcome, CapturedStream, IsolationBoundary, ResourceLimits, collect_exit_files};
use crate::error::{Result, SandboxError};
use crate::stager::{HARNESS_FILE, StagedExecution};
use crate::verdict::ExitReport;

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Boundary running each execution as a limited child process.
#[derive(Debug, Clone)]
pub struct SubprocessBoundary {
    shell: PathBuf,
}

impl Default for SubprocessBoundary {
    fn default() -> Self {
        Self::new()
    }
}

impl SubprocessBoundary {
    /// Create a boundary using `/bin/sh` to run the harness.
    pub fn new() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
        }
    }

    /// Use a different shell to run the harness.
    pub fn with_shell(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    fn command(&self, staged: &StagedExecution, limits: &ResourceLimits) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.arg(HARNESS_FILE)
            .current_dir(&staged.scratch_dir)
            .env_clear()
            .env("PATH", DEFAULT_PATH)
            .env("HOME", &staged.scratch_dir)
            .env("TRELLIS_INPUT_FILE", &staged.input_path)
            .env("TRELLIS_OUTPUT_FILE", &staged.output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        attach_rlimits(&mut cmd, limits);
        cmd
    }
}

/// Install rlimits in the child between `fork()` and `execve()`.
fn attach_rlimits(cmd: &mut Command, limits: &ResourceLimits) {
    let memory = limits.memory_bytes;
    let open_files = limits.max_open_files;
    let file_size = limits.max_file_size_bytes;

    // SAFETY: the hook only calls setrlimit, which is async-signal-safe.
    unsafe {
        cmd.pre_exec(move || {
            if let Some(bytes) = memory {
                setrlimit(Resource::RLIMIT_AS, bytes as rlim_t, bytes as rlim_t)?;
            }
            if let Some(n) = open_files {
                setrlimit(Resource::RLIMIT_NOFILE, n as rlim_t, n as rlim_t)?;
            }
            if let Some(bytes) = file_size {
                setrlimit(Resource::RLIMIT_FSIZE, bytes as rlim_t, bytes as rlim_t)?;
            }
            setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
            Ok(())
        });
    }
}

/// Drain a pipe, keeping at most `limit` bytes.
///
/// Bytes past the cap are read and discarded so the child never blocks on
/// a full pipe.
async fn read_bounded<R: AsyncRead + Unpin>(reader: Option<R>, limit: usize) -> CapturedStream {
    let Some(mut reader) = reader else {
        return CapturedStream::default();
    };

    let mut kept = Vec::new();
    let mut total = 0usize;
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                total += n;
                if kept.len() < limit {
                    let take = n.min(limit - kept.len());
                    kept.extend_from_slice(&buf[..take]);
                }
            }
        }
    }

    CapturedStream {
        text: String::from_utf8_lossy(&kept).into_owned(),
        truncated: total > kept.len(),
    }
}

/// Whether any process is left in the group.
fn group_alive(pgid: Pid) -> bool {
    killpg(pgid, None).is_ok()
}

/// SIGTERM the process group, then SIGKILL whatever survives the grace period.
async fn terminate_group(child: &mut Child, pgid: Pid, grace: Duration) {
    let _ = killpg(pgid, Signal::SIGTERM);

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        // Reap the harness so a zombie does not keep the group alive
        let _ = child.try_wait();
        if !group_alive(pgid) {
            return;
        }
        tokio::time::sleep(GROUP_POLL_INTERVAL).await;
    }

    warn!(pgid = pgid.as_raw(), "Process group survived SIGTERM, sending SIGKILL");
    let _ = killpg(pgid, Signal::SIGKILL);
}

/// Kills the process group when dropped while armed.
///
/// The run future can be dropped at any await point, and `kill_on_drop`
/// only reaches the harness. Disarmed once the group is known to be gone.
struct GroupKiller {
    pgid: Pid,
    armed: bool,
}

impl GroupKiller {
    fn new(pgid: Pid) -> Self {
        Self { pgid, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for GroupKiller {
    fn drop(&mut self) {
        if self.armed {
            warn!(pgid = self.pgid.as_raw(), "Execution abandoned while running, killing process group");
            let _ = killpg(self.pgid, Signal::SIGKILL);
        }
    }
}

/// Wait for a reader task, abandoning it after `grace`.
///
/// A descendant that escaped the process group can hold the pipe open
/// forever; its output is dropped rather than hanging the runner.
async fn join_reader(handle: JoinHandle<CapturedStream>, grace: Duration) -> CapturedStream {
    let abort = handle.abort_handle();
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(_)) => CapturedStream::default(),
        Err(_) => {
            abort.abort();
            warn!("Output stream still open after program exit, abandoning it");
            CapturedStream {
                text: String::new(),
                truncated: true,
            }
        }
    }
}

#[async_trait]
impl IsolationBoundary for SubprocessBoundary {
    fn boundary_type(&self) -> &'static str {
        "subprocess"
    }

    async fn run(&self, staged: &StagedExecution, limits: &ResourceLimits) -> Result<BoundaryOutcome> {
        let mut child = self.command(staged, limits).spawn().map_err(|e| {
            SandboxError::Boundary(format!("cannot spawn {}: {}", self.shell.display(), e))
        })?;

        let pgid = child
            .id()
            .map(|pid| Pid::from_raw(pid as i32))
            .ok_or_else(|| SandboxError::Boundary("child exited before it was tracked".to_string()))?;
        let mut killer = GroupKiller::new(pgid);

        debug!(
            pgid = pgid.as_raw(),
            scratch_dir = %staged.scratch_dir.display(),
            timeout_ms = limits.timeout.as_millis() as u64,
            "Harness spawned"
        );

        let stdout = tokio::spawn(read_bounded(child.stdout.take(), limits.max_output_bytes));
        let stderr = tokio::spawn(read_bounded(child.stderr.take(), limits.max_output_bytes));

        let waited = tokio::time::timeout(limits.timeout, child.wait()).await;
        let (status, timed_out) = match waited {
            Ok(status) => (status, false),
            Err(_) => {
                info!(pgid = pgid.as_raw(), "Execution timed out, terminating process group");
                terminate_group(&mut child, pgid, limits.kill_grace).await;
                (child.wait().await, true)
            }
        };
        let status = status.map_err(|e| SandboxError::Boundary(format!("wait failed: {}", e)))?;

        // Nothing the program started may outlive the execution
        if group_alive(pgid) {
            debug!(pgid = pgid.as_raw(), "Killing leftover processes");
            let _ = killpg(pgid, Signal::SIGKILL);
        }
        killer.disarm();

        let stdout = join_reader(stdout, limits.kill_grace).await;
        let stderr = join_reader(stderr, limits.kill_grace).await;

        let (meta, output) = collect_exit_files(staged).await;
        let report = if timed_out {
            Some(ExitReport::timed_out(format!(
                "Execution exceeded timeout of {}ms",
                limits.timeout.as_millis()
            )))
        } else if let Some(signal) = status.signal() {
            Some(ExitReport::signaled(signal))
        } else if !status.success() {
            Some(ExitReport::internal(format!(
                "harness exited with code {}",
                status.code().unwrap_or(-1)
            )))
        } else {
            meta
        };

        Ok(BoundaryOutcome {
            report,
            output,
            stdout,
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_bounded_truncates() {
        let data: &[u8] = b"0123456789";
        let stream = read_bounded(Some(data), 4).await;
        assert_eq!(stream.text, "0123");
        assert!(stream.truncated);
    }

    #[tokio::test]
    async fn test_read_bounded_under_limit() {
        let data: &[u8] = b"hello";
        let stream = read_bounded(Some(data), 64).await;
        assert_eq!(stream.text, "hello");
        assert!(!stream.truncated);
    }

    #[tokio::test]
    async fn test_disarmed_killer_leaves_group_alone() {
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg("sleep 5")
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let pgid = Pid::from_raw(child.id().unwrap() as i32);

        let mut killer = GroupKiller::new(pgid);
        killer.disarm();
        drop(killer);
        assert!(child.try_wait().unwrap().is_none());

        drop(GroupKiller::new(pgid));
        let status = child.wait().await.unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGKILL as i32));
    }

    #[tokio::test]
    async fn test_read_bounded_without_pipe() {
        let stream = read_bounded::<&[u8]>(None, 64).await;
        assert_eq!(stream, CapturedStream::default());
    }
}
