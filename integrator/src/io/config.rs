//! Agent configuration stored under `<state dir>/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Agent configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Hard cap on loop iterations; exhaustion is a recorded partial
    /// completion, not an error.
    pub max_iterations: u32,

    /// Wall-clock budget for each child process (shell, validation, policy).
    pub command_timeout_secs: u64,

    /// Truncate captured child-process output beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Compact the transcript once it holds more than this many entries.
    pub transcript_max_entries: usize,

    /// Entries kept verbatim after a compaction.
    pub transcript_keep_recent: usize,

    pub policy: PolicyConfig,
    pub validation: ValidationConfig,
    pub index: IndexConfig,
    pub mission: MissionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyConfig {
    /// External command that turns a prompt on stdin into an action on
    /// stdout. Must be configured before `run`.
    pub command: Vec<String>,
    /// Total completion attempts before giving up.
    pub max_retries: u32,
    /// Fixed pause between completion attempts.
    pub retry_backoff_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            max_retries: 6,
            retry_backoff_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidationConfig {
    /// Check-only type-check command, run as argv in the project root.
    pub command: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "npx".to_string(),
                "tsc".to_string(),
                "--noEmit".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexConfig {
    /// Target chunk size in bytes.
    pub chunk_size: usize,
    /// Bytes shared between consecutive chunks.
    pub chunk_overlap: usize,
    /// Chunks returned per retrieval.
    pub top_k: usize,
    /// File extensions to index.
    pub extensions: Vec<String>,
    /// Directory names pruned from discovery.
    pub exclude_dirs: Vec<String>,
    /// Embedding vector dimension.
    pub embedding_dim: usize,
    /// Total embedding attempts per chunk before giving up.
    pub embed_max_retries: u32,
    /// Fixed pause between embedding attempts.
    pub embed_retry_backoff_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
            top_k: 5,
            extensions: vec!["ts".to_string(), "tsx".to_string()],
            exclude_dirs: vec![
                "node_modules".to_string(),
                ".next".to_string(),
                ".git".to_string(),
            ],
            embedding_dim: 256,
            embed_max_retries: 3,
            embed_retry_backoff_secs: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MissionConfig {
    /// Content schema document, resolved against the project parent.
    pub schema_doc: String,
    /// Page-to-component mapping document, resolved against the project
    /// parent.
    pub mapping_doc: String,
}

impl Default for MissionConfig {
    fn default() -> Self {
        Self {
            schema_doc: "schema.json".to_string(),
            mapping_doc: "pages-components-list.txt".to_string(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15_000,
            command_timeout_secs: 300,
            output_limit_bytes: 100_000,
            transcript_max_entries: 200,
            transcript_keep_recent: 50,
            policy: PolicyConfig::default(),
            validation: ValidationConfig::default(),
            index: IndexConfig::default(),
            mission: MissionConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.transcript_keep_recent == 0
            || self.transcript_keep_recent > self.transcript_max_entries
        {
            return Err(anyhow!(
                "transcript_keep_recent must be in 1..=transcript_max_entries"
            ));
        }
        if self.policy.max_retries == 0 {
            return Err(anyhow!("policy.max_retries must be > 0"));
        }
        if self.validation.command.is_empty() || self.validation.command[0].trim().is_empty() {
            return Err(anyhow!("validation.command must be a non-empty array"));
        }
        if self.index.chunk_size == 0 {
            return Err(anyhow!("index.chunk_size must be > 0"));
        }
        if self.index.chunk_overlap >= self.index.chunk_size {
            return Err(anyhow!("index.chunk_overlap must be < index.chunk_size"));
        }
        if self.index.top_k == 0 {
            return Err(anyhow!("index.top_k must be > 0"));
        }
        if self.index.extensions.is_empty() {
            return Err(anyhow!("index.extensions must be a non-empty array"));
        }
        if self.index.embedding_dim == 0 {
            return Err(anyhow!("index.embedding_dim must be > 0"));
        }
        if self.index.embed_max_retries == 0 {
            return Err(anyhow!("index.embed_max_retries must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
