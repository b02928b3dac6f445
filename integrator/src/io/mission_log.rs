//! Per-iteration artifacts under `<state dir>/runs/<run-id>/<iter>/`.
//!
//! Always written, unaffected by `RUST_LOG`; this is the durable record of
//! what the loop did, distinct from dev-time tracing.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::transcript::TranscriptEntry;

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub entry_path: PathBuf,
    pub prompt_path: PathBuf,
    pub raw_action_path: PathBuf,
}

impl IterationPaths {
    pub fn new(runs_dir: &Path, run_id: &str, iter: u32) -> Self {
        let dir = runs_dir.join(run_id).join(iter.to_string());
        Self {
            entry_path: dir.join("entry.json"),
            prompt_path: dir.join("prompt.md"),
            raw_action_path: dir.join("raw_action.txt"),
            dir,
        }
    }
}

pub struct IterationWriteRequest<'a> {
    pub runs_dir: &'a Path,
    pub run_id: &'a str,
    pub iter: u32,
    pub entry: &'a TranscriptEntry,
    pub prompt: &'a str,
    pub raw_action: &'a str,
}

pub fn write_iteration(request: &IterationWriteRequest<'_>) -> Result<IterationPaths> {
    let paths = IterationPaths::new(request.runs_dir, request.run_id, request.iter);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create iteration dir {}", paths.dir.display()))?;

    // Write in deterministic order to keep logs stable.
    write_json(&paths.entry_path, request.entry)?;
    write_text(&paths.prompt_path, request.prompt)?;
    write_text(&paths.raw_action_path, request.raw_action)?;

    Ok(paths)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = IterationPaths::new(temp.path(), "run-1", 3);

        assert!(paths.dir.ends_with(Path::new("run-1/3")));
        assert!(paths.entry_path.ends_with("entry.json"));
        assert!(paths.prompt_path.ends_with("prompt.md"));
        assert!(paths.raw_action_path.ends_with("raw_action.txt"));
    }

    #[test]
    fn writes_all_iteration_artifacts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let entry = TranscriptEntry {
            step: 1,
            action: "validate".to_string(),
            input: String::new(),
            observation: "validation passed".to_string(),
            at_epoch_secs: 1_700_000_000,
            duration_ms: 42,
        };

        let paths = write_iteration(&IterationWriteRequest {
            runs_dir: temp.path(),
            run_id: "run-9",
            iter: 1,
            entry: &entry,
            prompt: "the prompt",
            raw_action: "{\"action\": \"validate\"}",
        })
        .expect("write");

        assert!(paths.entry_path.is_file());
        assert!(paths.prompt_path.is_file());
        assert!(paths.raw_action_path.is_file());
        let recorded = fs::read_to_string(&paths.entry_path).expect("read");
        assert!(recorded.contains("\"validation passed\""));
    }
}
