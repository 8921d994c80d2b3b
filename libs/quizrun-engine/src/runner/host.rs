//! Direct host execution.
//!
//! Each child is the leader of its own process group so that a timeout
//! can take down everything it forked, not just the immediate child.

use super::{ProcessRunner, RawOutput};
use crate::toolchain::CommandSpec;
use anyhow::{Context, Result};
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use quizrun_common::types::Language;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

pub struct HostRunner {
    max_output_bytes: usize,
}

impl HostRunner {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }
}

/// Time allowed after the deadline for pipes to drain once the group is dead
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// SIGKILL the whole group led by `pid`. A group that is already gone is fine.
fn kill_process_group(pid: u32) {
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pid = pid, error = %e, "Failed to kill process group"),
    }
}

/// Kills the process group when dropped while armed. `kill_on_drop` only
/// reaches the direct child, so an abandoned step needs this to take its
/// grandchildren down too.
struct GroupGuard {
    pid: u32,
    armed: bool,
}

impl GroupGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!(pid = self.pid, "Step abandoned - killing process group");
            kill_process_group(self.pid);
        }
    }
}

/// Read up to `cap` bytes into `buf`, then drain the rest so the writer
/// never blocks on a full pipe. Returns whether anything was dropped.
///
/// Bytes land in the caller's buffer, so whatever was captured survives if
/// this future is cut short.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize, buf: &mut Vec<u8>) -> bool {
    let mut chunk = [0u8; 8192];
    let mut dropped = false;
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => return dropped,
            Ok(n) => {
                let room = cap.saturating_sub(buf.len());
                if n > room {
                    dropped = true;
                }
                buf.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) => {
                debug!(error = %e, "Output stream closed with error");
                return dropped;
            }
        }
    }
}

#[async_trait]
impl ProcessRunner for HostRunner {
    fn name(&self) -> &'static str {
        "host"
    }

    async fn execute(
        &self,
        _language: Language,
        cmd: &CommandSpec,
        work_dir: &Path,
        stdin: &str,
        timeout: Duration,
    ) -> Result<RawOutput> {
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .current_dir(work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to launch '{}'", cmd.program))?;
        let pid = child.id().context("Child exited before its pid was read")?;
        let group = GroupGuard { pid, armed: true };

        let stdin_pipe = child.stdin.take();
        let stdout_pipe = child.stdout.take().context("stdout was not piped")?;
        let stderr_pipe = child.stderr.take().context("stderr was not piped")?;

        let feed = async move {
            if let Some(mut pipe) = stdin_pipe {
                // The program may exit without reading; a broken pipe is not our error
                if let Err(e) = pipe.write_all(stdin.as_bytes()).await {
                    debug!(error = %e, "Child stopped accepting stdin");
                }
                let _ = pipe.shutdown().await;
            }
        };

        let wait = async {
            match tokio::time::timeout_at(deadline, child.wait()).await {
                Ok(status) => {
                    // Reap stragglers that outlived the leader and still hold the pipes
                    kill_process_group(pid);
                    (status, false)
                }
                Err(_) => {
                    warn!(
                        pid = pid,
                        timeout_ms = timeout.as_millis() as u64,
                        "Process timed out - killing process group"
                    );
                    kill_process_group(pid);
                    (child.wait().await, true)
                }
            }
        };

        let cap = self.max_output_bytes;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        // A process that left the group (setsid) can hold stdin or the output
        // pipes open indefinitely; the whole step is bounded by the deadline.
        let io = async {
            let (out_truncated, err_truncated, ()) = tokio::join!(
                read_capped(stdout_pipe, cap, &mut stdout),
                read_capped(stderr_pipe, cap, &mut stderr),
                feed
            );
            out_truncated || err_truncated
        };
        let bounded_io = tokio::time::timeout_at(deadline + DRAIN_GRACE, io);

        let (io_result, (status, wait_timed_out)) = tokio::join!(bounded_io, wait);
        group.disarm();

        let (truncated, pipes_held) = match io_result {
            Ok(truncated) => (truncated, false),
            Err(_) => {
                warn!(
                    pid = pid,
                    "Output pipes still open past the deadline - an escaped process holds them"
                );
                (false, true)
            }
        };
        let timed_out = wait_timed_out || pipes_held;

        let status = status.context("Failed to wait for child process")?;
        let exit_code = if timed_out {
            None
        } else {
            status
                .code()
                .map(i64::from)
                .or_else(|| status.signal().map(|sig| 128 + i64::from(sig)))
        };

        Ok(RawOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
            timed_out,
            truncated,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}
