//! Test-only fixtures: a temp-dir project and scripted policy doubles.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use serde_json::json;

use crate::core::plan::{PlanCursor, standard_plan};
use crate::io::config::AgentConfig;
use crate::io::embed::HashEmbedder;
use crate::io::paths::AgentPaths;
use crate::io::policy::{Policy, PolicyRequest};
use crate::io::store::LoadedIndex;
use crate::io::tools::Toolbox;
use crate::step::Mission;

/// Configuration tuned for fast, hermetic tests: no retry pauses and a
/// validation gate driven by a grep probe (`BROKEN` anywhere under `src/`
/// fails validation) instead of a real type-checker.
pub fn test_config() -> AgentConfig {
    let mut config = AgentConfig::default();
    config.command_timeout_secs = 10;
    config.policy.command = vec!["unused-in-tests".to_string()];
    config.policy.max_retries = 1;
    config.policy.retry_backoff_secs = 0;
    config.index.embed_retry_backoff_secs = 0;
    config.validation.command = vec![
        "sh".to_string(),
        "-c".to_string(),
        "! grep -rn BROKEN src".to_string(),
    ];
    config
}

/// A temp-dir project with the sibling layout the agent expects:
/// `<temp>/site` as the project root, mission documents in `<temp>`.
pub struct TestProject {
    temp: tempfile::TempDir,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let project = Self { temp };
        fs::create_dir_all(project.root().join("src")).context("create src")?;
        fs::write(project.parent().join("schema.json"), "[{\"uid\": \"page\"}]")
            .context("write schema doc")?;
        fs::write(
            project.parent().join("pages-components-list.txt"),
            "home: Hero, Features\n",
        )
        .context("write mapping doc")?;
        Ok(project)
    }

    pub fn root(&self) -> PathBuf {
        self.temp.path().join("site")
    }

    pub fn parent(&self) -> PathBuf {
        self.temp.path().to_path_buf()
    }

    pub fn write_source(&self, rel: &str, content: &str) -> Result<()> {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, content).with_context(|| format!("write {}", path.display()))
    }

    pub fn write_config(&self, config: &AgentConfig) -> Result<()> {
        // Match preflight, which canonicalizes the root before deriving paths.
        let root = self.root().canonicalize().context("canonicalize root")?;
        let paths = AgentPaths::new(root)?;
        crate::io::config::write_config(&paths.config_path, config)
    }
}

/// A ready-to-step [`Mission`] over a [`TestProject`] with an empty index.
pub struct TestMission {
    pub project: TestProject,
    pub mission: Mission,
}

impl TestMission {
    pub fn new() -> Result<Self> {
        let project = TestProject::new()?;
        let config = test_config();
        let paths = AgentPaths::new(project.root())?;
        let toolbox = Toolbox::new(
            project.root(),
            &config,
            LoadedIndex::empty(),
            Box::new(HashEmbedder::new(config.index.embedding_dim)),
        );
        let mission = Mission::new(
            "run-test".to_string(),
            paths,
            config,
            toolbox,
            PlanCursor::new(standard_plan()),
            "[{\"uid\": \"page\"}]".to_string(),
            "home: Hero, Features".to_string(),
        );
        Ok(Self { project, mission })
    }
}

/// Policy that replays a fixed list of responses in order.
pub struct ScriptedPolicy {
    responses: RefCell<VecDeque<String>>,
}

impl ScriptedPolicy {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
        }
    }
}

impl Policy for ScriptedPolicy {
    fn complete(&self, _request: &PolicyRequest) -> Result<String> {
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted policy exhausted"))
    }
}

/// Build a wire action with a string input.
pub fn action(name: &str, input: &str) -> String {
    json!({ "action": name, "action_input": input }).to_string()
}

/// Build a wire `write_file` action.
pub fn write_action(path: &str, content: &str) -> String {
    json!({
        "action": "write_file",
        "action_input": { "path": path, "content": content },
    })
    .to_string()
}
