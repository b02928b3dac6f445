//! Multi-iteration mission loop.

use anyhow::{Context, Result};
use tracing::info;

use crate::core::plan::{PlanCursor, standard_plan};
use crate::core::transcript::now_epoch_seconds;
use crate::io::embed::Embedder;
use crate::io::indexer::{IndexSummary, index_project};
use crate::io::policy::Policy;
use crate::io::store::ChunkStore;
use crate::io::tools::Toolbox;
use crate::preflight::Preflight;
use crate::step::{Mission, StepOutcome, run_step};

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The policy emitted a terminal final answer.
    Completed { summary: String },
    /// The iteration budget ran out. A recorded partial completion, not a
    /// failure.
    IterationBudget { max_iterations: u32 },
}

/// Summary of a mission invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionOutcome {
    pub run_id: String,
    pub iterations: u32,
    pub index: IndexSummary,
    pub stop: LoopStop,
}

impl MissionOutcome {
    /// Single human-readable line describing how the mission ended.
    pub fn summary_line(&self) -> String {
        match &self.stop {
            LoopStop::Completed { summary } => format!(
                "mission completed after {} iterations: {}",
                self.iterations, summary
            ),
            LoopStop::IterationBudget { max_iterations } => format!(
                "mission partially completed: iteration budget of {} reached",
                max_iterations
            ),
        }
    }
}

/// Run steps until the policy finishes or the iteration budget is exhausted.
///
/// Stops with an error only on pre-established configuration problems or
/// policy retry exhaustion; everything else is converted to observations
/// inside [`run_step`].
pub fn run_loop<P: Policy + ?Sized, F: FnMut(&StepOutcome)>(
    mission: &mut Mission,
    policy: &P,
    index: IndexSummary,
    mut on_step: F,
) -> Result<MissionOutcome> {
    let max_iterations = mission.config.max_iterations;
    loop {
        if mission.transcript.steps_recorded() >= max_iterations {
            info!(max_iterations, "iteration budget exhausted");
            return Ok(MissionOutcome {
                run_id: mission.run_id.clone(),
                iterations: mission.transcript.steps_recorded(),
                index,
                stop: LoopStop::IterationBudget { max_iterations },
            });
        }

        let step = run_step(mission, policy)?;
        on_step(&step);
        if let Some(summary) = step.terminal {
            return Ok(MissionOutcome {
                run_id: mission.run_id.clone(),
                iterations: mission.transcript.steps_recorded(),
                index,
                stop: LoopStop::Completed { summary },
            });
        }
    }
}

/// Index the project, then drive the full mission loop.
///
/// The index is built to completion before the first step so every
/// `retrieve_context` call sees one consistent generation.
pub fn run_mission<P: Policy + ?Sized, F: FnMut(&StepOutcome)>(
    checked: &Preflight,
    policy: &P,
    embedder: Box<dyn Embedder>,
    on_step: F,
) -> Result<MissionOutcome> {
    let store = ChunkStore::new(&checked.paths.index_dir);
    let index_summary = index_project(
        &checked.paths.project_root,
        &store,
        &checked.config.index,
        embedder.as_ref(),
    )?;
    let index = store.load().context("load chunk index")?;

    let toolbox = Toolbox::new(
        checked.paths.project_root.clone(),
        &checked.config,
        index,
        embedder,
    );

    let schema_doc = std::fs::read_to_string(&checked.schema_doc_path)
        .with_context(|| format!("read {}", checked.schema_doc_path.display()))?;
    let mapping_doc = std::fs::read_to_string(&checked.mapping_doc_path)
        .with_context(|| format!("read {}", checked.mapping_doc_path.display()))?;

    let run_id = format!("run-{}", now_epoch_seconds());
    info!(run_id = %run_id, "mission starting");

    let mut mission = Mission::new(
        run_id,
        checked.paths.clone(),
        checked.config.clone(),
        toolbox,
        PlanCursor::new(standard_plan()),
        schema_doc,
        mapping_doc,
    );
    run_loop(&mut mission, policy, index_summary, on_step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedPolicy, TestMission, action};

    #[test]
    fn loop_stops_on_final_answer() {
        let mut fixture = TestMission::new().expect("fixture");
        let policy = ScriptedPolicy::new(vec![
            action("list_directory", "src"),
            action("final_answer", "done"),
        ]);

        let mut seen = Vec::new();
        let outcome = run_loop(
            &mut fixture.mission,
            &policy,
            IndexSummary { file_count: 0, chunk_count: 0 },
            |step| seen.push(step.action.clone()),
        )
        .expect("loop");

        assert_eq!(outcome.iterations, 2);
        assert_eq!(
            outcome.stop,
            LoopStop::Completed { summary: "done".to_string() }
        );
        assert_eq!(seen, vec!["list_directory", "final_answer"]);
        assert!(outcome.summary_line().contains("completed after 2 iterations"));
    }

    #[test]
    fn loop_records_budget_exhaustion_as_partial_completion() {
        let mut fixture = TestMission::new().expect("fixture");
        fixture.mission.config.max_iterations = 3;
        let policy = ScriptedPolicy::new(vec![
            action("list_directory", "src"),
            action("list_directory", "src"),
            action("list_directory", "src"),
            action("list_directory", "src"),
        ]);

        let outcome = run_loop(
            &mut fixture.mission,
            &policy,
            IndexSummary { file_count: 0, chunk_count: 0 },
            |_| {},
        )
        .expect("loop");

        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.stop, LoopStop::IterationBudget { max_iterations: 3 });
        assert!(outcome.summary_line().contains("partially completed"));
    }

    #[test]
    fn malformed_actions_do_not_stop_the_loop() {
        let mut fixture = TestMission::new().expect("fixture");
        let policy = ScriptedPolicy::new(vec![
            "definitely not an action".to_string(),
            action("final_answer", "recovered"),
        ]);

        let outcome = run_loop(
            &mut fixture.mission,
            &policy,
            IndexSummary { file_count: 0, chunk_count: 0 },
            |_| {},
        )
        .expect("loop");

        assert_eq!(outcome.iterations, 2);
        assert_eq!(
            outcome.stop,
            LoopStop::Completed { summary: "recovered".to_string() }
        );
    }
}
