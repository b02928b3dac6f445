//! Running child processes with deadlines and bounded captured output.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Captured result of one child process.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes discarded beyond the capture limit, across both streams.
    pub truncated_bytes: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }

    /// True only for a clean zero exit within the deadline.
    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Render both streams as one observation-ready text block, with
    /// truncation and timeout notices appended.
    pub fn combined(&self) -> String {
        let mut buf = String::new();
        buf.push_str(String::from_utf8_lossy(&self.stdout).trim_end());
        let stderr = String::from_utf8_lossy(&self.stderr);
        let stderr = stderr.trim_end();
        if !stderr.is_empty() {
            if !buf.is_empty() {
                buf.push('\n');
            }
            buf.push_str(stderr);
        }
        if self.truncated_bytes > 0 {
            if !buf.is_empty() {
                buf.push('\n');
            }
            buf.push_str(&format!("[output truncated, {} bytes dropped]", self.truncated_bytes));
        }
        if self.timed_out {
            if !buf.is_empty() {
                buf.push('\n');
            }
            buf.push_str("[command timed out]");
        }
        buf
    }
}

/// Run `cmd` with a deadline, feeding optional stdin and capturing both
/// output streams without risking pipe deadlocks.
///
/// Each stream is drained on its own thread; bytes beyond `output_limit_bytes`
/// per stream are counted and discarded while the pipe keeps draining. On
/// timeout the child is killed and the partial output is returned with
/// `timed_out` set.
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!(timeout_secs = timeout.as_secs(), "spawning child process");
    let mut child = cmd.spawn().context("spawn command")?;

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        child_stdin.write_all(input).context("write stdin")?;
        // Dropping the handle closes the pipe so the child sees EOF.
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || drain_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || drain_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_dropped) = join_reader(stdout_handle).context("join stdout")?;
    let (stderr, stderr_dropped) = join_reader(stderr_handle).context("join stderr")?;
    let truncated_bytes = stdout_dropped + stderr_dropped;
    if truncated_bytes > 0 {
        warn!(truncated_bytes, "child output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        truncated_bytes,
        timed_out,
    })
}

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn drain_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).context("read child output")?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        let take = n.min(room);
        kept.extend_from_slice(&buf[..take]);
        dropped += n - take;
    }
    Ok((kept, dropped))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_exit_status() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err >&2");
        let output =
            run_command_with_timeout(cmd, None, Duration::from_secs(5), 10_000).expect("run");

        assert!(output.success());
        assert_eq!(output.exit_code(), Some(0));
        assert_eq!(output.combined(), "out\nerr");
    }

    #[test]
    fn nonzero_exit_is_captured_not_raised() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo broken; exit 3");
        let output =
            run_command_with_timeout(cmd, None, Duration::from_secs(5), 10_000).expect("run");

        assert!(!output.success());
        assert_eq!(output.exit_code(), Some(3));
        assert!(output.combined().contains("broken"));
    }

    #[test]
    fn stdin_is_fed_to_the_child() {
        let cmd = Command::new("cat");
        let output = run_command_with_timeout(
            cmd,
            Some(b"hello from stdin"),
            Duration::from_secs(5),
            10_000,
        )
        .expect("run");

        assert!(output.success());
        assert_eq!(output.combined(), "hello from stdin");
    }

    #[test]
    fn timeout_kills_the_child() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("sleep 30");
        let output =
            run_command_with_timeout(cmd, None, Duration::from_millis(200), 10_000).expect("run");

        assert!(output.timed_out);
        assert!(!output.success());
        assert!(output.combined().contains("timed out"));
    }

    #[test]
    fn output_beyond_the_limit_is_dropped() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("head -c 5000 /dev/zero | tr '\\0' 'x'");
        let output = run_command_with_timeout(cmd, None, Duration::from_secs(5), 100).expect("run");

        assert_eq!(output.stdout.len(), 100);
        assert_eq!(output.truncated_bytes, 4900);
        assert!(output.combined().contains("truncated"));
    }
}
