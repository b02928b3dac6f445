//! The bounded capability set the loop may invoke.
//!
//! Every operation is total at the agent boundary: failures come back as
//! error text inside a [`ToolResult`], never as an `Err`, so a bad read or a
//! failing command becomes an observation and the loop continues. Side
//! effects are confined to the project tree and child processes.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info};

use crate::io::config::AgentConfig;
use crate::io::embed::{Embedder, embed_with_retry};
use crate::io::paths::resolve_under;
use crate::io::process::run_command_with_timeout;
use crate::io::store::LoadedIndex;

/// Outcome of one capability invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub ok: bool,
    pub output: String,
}

impl ToolResult {
    fn success(output: impl Into<String>) -> Self {
        Self {
            ok: true,
            output: output.into(),
        }
    }

    fn failure(output: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: output.into(),
        }
    }
}

/// Result of running the validation gate.
///
/// Pass means a zero exit status *and* clean (whitespace-only) combined
/// output; anything else fails with the raw diagnostic text as the
/// corrective payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub passed: bool,
    pub exit_code: Option<i32>,
    pub output: String,
}

/// The fixed capability set, constructed with an explicit project root.
///
/// Nothing here reads ambient process environment: two toolboxes over
/// different roots can coexist in one process (e.g. under test) without
/// interfering.
pub struct Toolbox {
    project_root: PathBuf,
    validation_command: Vec<String>,
    command_timeout: Duration,
    output_limit_bytes: usize,
    top_k: usize,
    embed_max_retries: u32,
    embed_backoff: Duration,
    index: LoadedIndex,
    embedder: Box<dyn Embedder>,
}

impl Toolbox {
    pub fn new(
        project_root: PathBuf,
        config: &AgentConfig,
        index: LoadedIndex,
        embedder: Box<dyn Embedder>,
    ) -> Self {
        Self {
            project_root,
            validation_command: config.validation.command.clone(),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
            top_k: config.index.top_k,
            embed_max_retries: config.index.embed_max_retries,
            embed_backoff: Duration::from_secs(config.index.embed_retry_backoff_secs),
            index,
            embedder,
        }
    }

    pub fn project_root(&self) -> &PathBuf {
        &self.project_root
    }

    /// Read a file relative to the project root.
    pub fn read_file(&self, path: &str) -> ToolResult {
        let resolved = match resolve_under(&self.project_root, path) {
            Ok(resolved) => resolved,
            Err(reason) => return ToolResult::failure(reason),
        };
        match fs::read_to_string(&resolved) {
            Ok(content) => ToolResult::success(content),
            Err(err) => ToolResult::failure(format!("error reading file {path}: {err}")),
        }
    }

    /// Write a file relative to the project root, creating intermediate
    /// directories and overwriting existing content.
    pub fn write_file(&self, path: &str, content: &str) -> ToolResult {
        let resolved = match resolve_under(&self.project_root, path) {
            Ok(resolved) => resolved,
            Err(reason) => return ToolResult::failure(reason),
        };
        if let Some(parent) = resolved.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                return ToolResult::failure(format!("error creating directories for {path}: {err}"));
            }
        }
        match fs::write(&resolved, content) {
            Ok(()) => {
                debug!(path, bytes = content.len(), "file written");
                ToolResult::success(format!("wrote {} bytes to {path}", content.len()))
            }
            Err(err) => ToolResult::failure(format!("error writing file {path}: {err}")),
        }
    }

    /// List directory entries relative to the project root, sorted, with
    /// directories suffixed `/`.
    pub fn list_directory(&self, path: &str) -> ToolResult {
        let resolved = match resolve_under(&self.project_root, path) {
            Ok(resolved) => resolved,
            Err(reason) => return ToolResult::failure(reason),
        };
        let entries = match fs::read_dir(&resolved) {
            Ok(entries) => entries,
            Err(err) => {
                return ToolResult::failure(format!("error listing directory {path}: {err}"));
            }
        };
        let mut names = Vec::new();
        for entry in entries {
            let Ok(entry) = entry else { continue };
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        ToolResult::success(names.join("\n"))
    }

    /// Run a shell command in the project root under the configured deadline.
    ///
    /// A non-zero exit or a timeout is a normal, recoverable result: the
    /// combined output plus an exit-status trailer comes back for the policy
    /// to react to.
    pub fn run_command(&self, command: &str) -> ToolResult {
        info!(command, "running shell command");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&self.project_root);

        let output = match run_command_with_timeout(
            cmd,
            None,
            self.command_timeout,
            self.output_limit_bytes,
        ) {
            Ok(output) => output,
            Err(err) => return ToolResult::failure(format!("error running command: {err:#}")),
        };

        let mut text = output.combined();
        if !output.success() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&format!("[exit status: {:?}]", output.exit_code()));
            return ToolResult::failure(text);
        }
        ToolResult::success(text)
    }

    /// Run the configured check-only validation command (argv, no shell).
    pub fn validate(&self) -> ValidationOutcome {
        if self.validation_command.is_empty() {
            return ValidationOutcome {
                passed: false,
                exit_code: None,
                output: "no validation command configured".to_string(),
            };
        }
        info!(command = ?self.validation_command, "running validation gate");
        let mut cmd = Command::new(&self.validation_command[0]);
        cmd.args(&self.validation_command[1..])
            .current_dir(&self.project_root);

        let output = match run_command_with_timeout(
            cmd,
            None,
            self.command_timeout,
            self.output_limit_bytes,
        ) {
            Ok(output) => output,
            Err(err) => {
                return ValidationOutcome {
                    passed: false,
                    exit_code: None,
                    output: format!("error running validation command: {err:#}"),
                };
            }
        };

        let text = output.combined();
        let passed = output.success() && text.trim().is_empty();
        ValidationOutcome {
            passed,
            exit_code: output.exit_code(),
            output: text,
        }
    }

    /// Retrieve the top-k most relevant indexed chunks for `query`.
    ///
    /// An empty index yields an empty (successful) result. Embedding failures
    /// after retries come back as error text, keeping the boundary total.
    pub fn retrieve_context(&self, query: &str) -> ToolResult {
        if self.index.is_empty() {
            return ToolResult::success(String::new());
        }
        let embedding = match embed_with_retry(
            self.embedder.as_ref(),
            query,
            self.embed_max_retries,
            self.embed_backoff,
        ) {
            Ok(embedding) => embedding,
            Err(err) => return ToolResult::failure(format!("error embedding query: {err:#}")),
        };

        let hits = self.index.nearest(&embedding, self.top_k);
        let mut sections = Vec::with_capacity(hits.len());
        for chunk in hits {
            sections.push(format!(
                "--- {}:{}-{} ---\n{}",
                chunk.path, chunk.start, chunk.end, chunk.text
            ));
        }
        ToolResult::success(sections.join("\n\n"))
    }
}
