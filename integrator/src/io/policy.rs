//! Policy seam: the decision procedure that picks the next action.
//!
//! The [`Policy`] trait decouples the loop from the inference backend. The
//! shipped [`CommandPolicy`] feeds the rendered prompt to an external command
//! on stdin and reads the action text from stdout; tests use scripted
//! policies that return predetermined responses without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::io::process::run_command_with_timeout;

/// Parameters for one policy invocation.
#[derive(Debug, Clone)]
pub struct PolicyRequest {
    /// Rendered mission prompt.
    pub prompt: String,
    /// Working directory for the policy process.
    pub workdir: PathBuf,
    /// Maximum time to wait for a completion.
    pub timeout: Duration,
    /// Truncate captured policy output beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// Abstraction over inference backends.
pub trait Policy {
    /// Produce the raw action text for the given request.
    fn complete(&self, request: &PolicyRequest) -> Result<String>;
}

/// Policy that spawns a configured external command, writing the prompt to
/// its stdin and reading the action text from its stdout.
#[derive(Debug)]
pub struct CommandPolicy {
    command: Vec<String>,
}

impl CommandPolicy {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.is_empty() || command[0].trim().is_empty() {
            return Err(anyhow!("policy.command must be a non-empty array"));
        }
        Ok(Self { command })
    }
}

impl Policy for CommandPolicy {
    fn complete(&self, request: &PolicyRequest) -> Result<String> {
        info!(command = %self.command[0], "invoking policy command");
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]).current_dir(&request.workdir);

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
        )
        .context("run policy command")?;

        if output.timed_out {
            return Err(anyhow!(
                "policy command timed out after {:?}",
                request.timeout
            ));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "policy command failed with status {:?}: {}",
                output.exit_code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        debug!("policy command completed");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Ask the policy for a completion, retrying transient failures with a fixed
/// pause up to a bounded attempt count. Exhaustion aborts the run.
pub fn complete_with_retry<P: Policy + ?Sized>(
    policy: &P,
    request: &PolicyRequest,
    max_attempts: u32,
    backoff: Duration,
) -> Result<String> {
    let mut last_err = None;
    for attempt in 1..=max_attempts.max(1) {
        match policy.complete(request) {
            Ok(response) => return Ok(response),
            Err(err) => {
                warn!(attempt, max_attempts, err = %err, "policy attempt failed");
                last_err = Some(err);
                if attempt < max_attempts {
                    thread::sleep(backoff);
                }
            }
        }
    }
    Err(last_err.expect("at least one attempt ran"))
        .with_context(|| format!("policy failed after {max_attempts} attempts"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(temp: &tempfile::TempDir) -> PolicyRequest {
        PolicyRequest {
            prompt: "choose an action".to_string(),
            workdir: temp.path().to_path_buf(),
            timeout: Duration::from_secs(5),
            output_limit_bytes: 10_000,
        }
    }

    #[test]
    fn command_policy_requires_a_command() {
        let err = CommandPolicy::new(Vec::new()).expect_err("empty command");
        assert!(err.to_string().contains("policy.command"));
    }

    #[test]
    fn command_policy_pipes_prompt_and_returns_stdout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let policy = CommandPolicy::new(vec!["cat".to_string()]).expect("policy");

        let response = policy.complete(&request(&temp)).expect("complete");
        assert_eq!(response, "choose an action");
    }

    #[test]
    fn command_policy_surfaces_nonzero_exit_as_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let policy = CommandPolicy::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo provider overloaded >&2; exit 1".to_string(),
        ])
        .expect("policy");

        let err = policy.complete(&request(&temp)).expect_err("should fail");
        assert!(err.to_string().contains("provider overloaded"));
    }

    #[test]
    fn retry_recovers_from_transient_failures() {
        struct Flaky {
            failures: std::cell::Cell<u32>,
        }
        impl Policy for Flaky {
            fn complete(&self, _request: &PolicyRequest) -> Result<String> {
                if self.failures.get() > 0 {
                    self.failures.set(self.failures.get() - 1);
                    return Err(anyhow!("transient"));
                }
                Ok("{\"action\": \"validate\"}".to_string())
            }
        }

        let temp = tempfile::tempdir().expect("tempdir");
        let policy = Flaky {
            failures: std::cell::Cell::new(2),
        };
        let response = complete_with_retry(&policy, &request(&temp), 3, Duration::from_millis(1))
            .expect("should recover");
        assert!(response.contains("validate"));
    }

    #[test]
    fn retry_exhaustion_is_fatal() {
        struct AlwaysFails;
        impl Policy for AlwaysFails {
            fn complete(&self, _request: &PolicyRequest) -> Result<String> {
                Err(anyhow!("unavailable"))
            }
        }

        let temp = tempfile::tempdir().expect("tempdir");
        let err = complete_with_retry(&AlwaysFails, &request(&temp), 2, Duration::from_millis(1))
            .expect_err("should exhaust");
        assert!(err.to_string().contains("after 2 attempts"));
    }
}
