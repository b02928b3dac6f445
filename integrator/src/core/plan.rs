//! The staged mission plan and its machine-enforced completion gates.
//!
//! Stages describe the mission to the policy; the cursor owns the only
//! mutable piece (which stage is current) and refuses to advance until the
//! stage's gate holds. Tool calls themselves are never blocked by the stage:
//! only advancement is gated.

use serde::Serialize;

/// Condition the executor checks before allowing a stage to complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionGate {
    /// The most recent validation run passed and no mutation happened since.
    ValidationPass,
    /// No machine-checked condition; the stage completes on request.
    None,
}

/// One phase of the mission.
#[derive(Debug, Clone, Serialize)]
pub struct PlanStage {
    /// 1-indexed position in the plan.
    pub ordinal: u32,
    pub name: String,
    /// Goal description consumed by the policy.
    pub goal: String,
    /// Tools the stage is expected to lean on (advisory).
    pub expected_tools: Vec<String>,
    pub gate: CompletionGate,
}

fn stage(
    ordinal: u32,
    name: &str,
    goal: &str,
    expected_tools: &[&str],
    gate: CompletionGate,
) -> PlanStage {
    PlanStage {
        ordinal,
        name: name.to_string(),
        goal: goal.to_string(),
        expected_tools: expected_tools.iter().map(|t| t.to_string()).collect(),
        gate,
    }
}

/// The standard integration mission: seven ordered stages from discovery to
/// final validation.
pub fn standard_plan() -> Vec<PlanStage> {
    vec![
        stage(
            1,
            "discovery",
            "Read the content schema document and the page-to-component \
             mapping, and list the generated component files, to understand \
             the data shapes and which components need refactoring.",
            &["read_file", "list_directory", "retrieve_context"],
            CompletionGate::None,
        ),
        stage(
            2,
            "core-scaffolding",
            "Create the environment file and the content client module, and \
             install the delivery SDK packages.",
            &["write_file", "run_command", "validate"],
            CompletionGate::ValidationPass,
        ),
        stage(
            3,
            "lint-config",
            "Locate the project's lint configuration and relax the explicit-any \
             rule so pragmatic type assertions do not fail the build.",
            &["read_file", "write_file", "validate"],
            CompletionGate::ValidationPass,
        ),
        stage(
            4,
            "type-generation",
            "Generate type declarations from the content schema document and \
             write them to the project's types directory.",
            &["write_file", "validate", "retrieve_context"],
            CompletionGate::ValidationPass,
        ),
        stage(
            5,
            "query-generation",
            "Generate typed query modules for the shared layout entries and \
             for pages.",
            &["write_file", "validate", "retrieve_context"],
            CompletionGate::ValidationPass,
        ),
        stage(
            6,
            "component-refactor",
            "For each generated component: analyze its structure, install any \
             headless library it needs, rewrite it to accept a typed data prop \
             while preserving its markup and classes, and re-validate.",
            &["read_file", "write_file", "run_command", "validate", "retrieve_context"],
            CompletionGate::ValidationPass,
        ),
        stage(
            7,
            "final-assembly",
            "Refactor the layout and the dynamic page to fetch and render \
             content, then run a final full validation.",
            &["read_file", "write_file", "validate"],
            CompletionGate::ValidationPass,
        ),
    ]
}

/// Why a `complete_stage` request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateRefusal {
    pub stage_name: String,
    pub reason: String,
}

/// Tracks the current stage and enforces gates on advancement.
#[derive(Debug, Clone)]
pub struct PlanCursor {
    stages: Vec<PlanStage>,
    current: usize,
}

impl PlanCursor {
    pub fn new(stages: Vec<PlanStage>) -> Self {
        Self { stages, current: 0 }
    }

    pub fn stages(&self) -> &[PlanStage] {
        &self.stages
    }

    /// The stage the mission is currently in, or `None` once all stages are
    /// complete.
    pub fn current_stage(&self) -> Option<&PlanStage> {
        self.stages.get(self.current)
    }

    pub fn all_complete(&self) -> bool {
        self.current >= self.stages.len()
    }

    /// Attempt to complete the current stage.
    ///
    /// `validation_clean` must be true when the last validation run passed
    /// and no mutation happened since. On success the cursor moves to the
    /// next stage and the completed stage is returned.
    pub fn try_complete(&mut self, validation_clean: bool) -> Result<PlanStage, GateRefusal> {
        let Some(stage) = self.stages.get(self.current) else {
            return Err(GateRefusal {
                stage_name: "none".to_string(),
                reason: "all stages are already complete".to_string(),
            });
        };
        if stage.gate == CompletionGate::ValidationPass && !validation_clean {
            return Err(GateRefusal {
                stage_name: stage.name.clone(),
                reason: "completion gate not satisfied: run validate after your \
                         changes and make it pass before completing this stage"
                    .to_string(),
            });
        }
        let completed = stage.clone();
        self.current += 1;
        Ok(completed)
    }
}
