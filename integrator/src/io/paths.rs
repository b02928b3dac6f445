//! Canonical layout of the agent-owned state directory.
//!
//! All agent state lives in `.integrator/` next to the project root, so the
//! target project tree itself is never polluted:
//!
//! ```text
//! parent/
//!   site/            <- project root (read-write through the toolbox only)
//!   .integrator/
//!     config.toml
//!     index/         <- persisted chunk index, rebuilt wholesale
//!     runs/<run-id>/<iter>/
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};

/// All canonical agent-owned paths for a project root.
#[derive(Debug, Clone)]
pub struct AgentPaths {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub index_dir: PathBuf,
    pub runs_dir: PathBuf,
}

impl AgentPaths {
    /// Derive the state layout for `project_root`.
    ///
    /// The root must have a parent directory to hold the sibling state dir;
    /// callers canonicalize first so relative roots resolve properly.
    pub fn new(project_root: impl Into<PathBuf>) -> Result<Self> {
        let project_root = project_root.into();
        let parent = project_root
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| {
                anyhow!(
                    "project root {} has no parent directory for agent state",
                    project_root.display()
                )
            })?;
        let state_dir = parent.join(".integrator");
        Ok(Self {
            project_root: project_root.clone(),
            config_path: state_dir.join("config.toml"),
            index_dir: state_dir.join("index"),
            runs_dir: state_dir.join("runs"),
            state_dir,
        })
    }

    /// Per-iteration artifact directory for a run.
    pub fn iteration_dir(&self, run_id: &str, iter: u32) -> PathBuf {
        self.runs_dir.join(run_id).join(iter.to_string())
    }
}

/// Reject path components that would escape `root`, resolving `.` and `..`
/// lexically. Returns the joined absolute path on success.
pub fn resolve_under(root: &Path, relative: &str) -> Result<PathBuf, String> {
    use std::path::Component;

    let rel = Path::new(relative);
    if rel.is_absolute() {
        return Err(format!("path {relative} must be relative to the project root"));
    }
    let mut resolved = PathBuf::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() {
                    return Err(format!("path {relative} escapes the project root"));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("path {relative} must be relative to the project root"));
            }
        }
    }
    Ok(root.join(resolved))
}
