//! Configuration checks that must pass before any loop starts.
//!
//! Everything that can abort a run is established here; once the loop is
//! running, failures become observations instead.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::io::config::{AgentConfig, load_config, write_config};
use crate::io::paths::AgentPaths;

/// Validated startup state for a project.
#[derive(Debug, Clone)]
pub struct Preflight {
    pub paths: AgentPaths,
    pub config: AgentConfig,
    /// Content schema document (mission input, read-only).
    pub schema_doc_path: PathBuf,
    /// Page-to-component mapping document (mission input, read-only).
    pub mapping_doc_path: PathBuf,
}

/// What the upcoming command needs from the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreflightMode {
    /// Indexing / retrieval / gate checks: project and config only.
    Tooling,
    /// A full mission run: additionally requires a configured policy command
    /// and the mission input documents.
    Mission,
}

/// Check the project layout and configuration.
///
/// Writes a default `config.toml` on first use so operators have a file to
/// edit. All failures here are fatal configuration errors.
pub fn preflight(project_root: &Path, mode: PreflightMode) -> Result<Preflight> {
    let project_root = project_root
        .canonicalize()
        .with_context(|| format!("project root {} not found", project_root.display()))?;
    if !project_root.is_dir() {
        return Err(anyhow!(
            "project root {} is not a directory",
            project_root.display()
        ));
    }

    let paths = AgentPaths::new(&project_root)?;
    std::fs::create_dir_all(&paths.state_dir)
        .with_context(|| format!("create state dir {}", paths.state_dir.display()))?;

    if !paths.config_path.exists() {
        write_config(&paths.config_path, &AgentConfig::default())
            .context("write default config")?;
        debug!(path = %paths.config_path.display(), "default config written");
    }
    let config = load_config(&paths.config_path).context("load config.toml")?;

    let doc_base = paths
        .state_dir
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| paths.state_dir.clone());
    let schema_doc_path = doc_base.join(&config.mission.schema_doc);
    let mapping_doc_path = doc_base.join(&config.mission.mapping_doc);

    if mode == PreflightMode::Mission {
        if config.policy.command.is_empty() {
            return Err(anyhow!(
                "policy.command is not configured in {} (set the external \
                 completion command before running a mission)",
                paths.config_path.display()
            ));
        }
        ensure_file(&schema_doc_path).context("content schema document")?;
        ensure_file(&mapping_doc_path).context("page-to-component mapping document")?;
    }

    Ok(Preflight {
        paths,
        config,
        schema_doc_path,
        mapping_doc_path,
    })
}

fn ensure_file(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow!("missing file {}", path.display()));
    }
    if !path.is_file() {
        return Err(anyhow!("expected file {}", path.display()));
    }
    Ok(())
}
