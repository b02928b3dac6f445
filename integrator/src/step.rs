//! One deterministic plan-execute-observe iteration.
//!
//! A step asks the policy for exactly one action, dispatches it through the
//! toolbox, and appends the observation to the transcript. Nothing that
//! happens inside a step aborts the run except policy retry exhaustion;
//! tool failures, malformed actions, and gate refusals all come back as
//! observations.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::action::{Action, corrective_observation, parse_action};
use crate::core::plan::PlanCursor;
use crate::core::transcript::{Transcript, TranscriptEntry, now_epoch_seconds};
use crate::io::config::AgentConfig;
use crate::io::mission_log::{IterationWriteRequest, write_iteration};
use crate::io::paths::AgentPaths;
use crate::io::policy::{Policy, PolicyRequest, complete_with_retry};
use crate::io::tools::Toolbox;
use crate::prompt::{PromptBuilder, PromptInputs};

/// Mutable state of a running mission.
pub struct Mission {
    pub run_id: String,
    pub paths: AgentPaths,
    pub config: AgentConfig,
    pub toolbox: Toolbox,
    pub cursor: PlanCursor,
    pub transcript: Transcript,
    pub schema_doc: String,
    pub mapping_doc: String,
    /// True when the last validation run passed and no mutation happened
    /// since. Gates stage completion.
    validation_clean: bool,
}

impl Mission {
    pub fn new(
        run_id: String,
        paths: AgentPaths,
        config: AgentConfig,
        toolbox: Toolbox,
        cursor: PlanCursor,
        schema_doc: String,
        mapping_doc: String,
    ) -> Self {
        Self {
            run_id,
            paths,
            config,
            toolbox,
            cursor,
            transcript: Transcript::new(),
            schema_doc,
            mapping_doc,
            validation_clean: false,
        }
    }

    pub fn validation_clean(&self) -> bool {
        self.validation_clean
    }
}

/// Result of a single iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// 1-indexed iteration ordinal.
    pub iter: u32,
    /// Wire name of the chosen action (`invalid` for unparseable output).
    pub action: String,
    /// Whether the action's observation was a success.
    pub ok: bool,
    /// Final-answer summary when the policy ended the mission.
    pub terminal: Option<String>,
}

/// Execute one iteration of the agent loop.
pub fn run_step<P: Policy + ?Sized>(mission: &mut Mission, policy: &P) -> Result<StepOutcome> {
    let start = Instant::now();
    let iter = mission.transcript.next_step();
    debug!(iter, run_id = %mission.run_id, "starting step");

    // Context most relevant to where the plan currently stands.
    let stage_query = mission
        .cursor
        .current_stage()
        .map(|s| s.goal.clone())
        .unwrap_or_else(|| "final mission summary".to_string());
    let retrieved = mission.toolbox.retrieve_context(&stage_query);
    let retrieved_context = if retrieved.ok { retrieved.output } else { String::new() };

    let prompt = PromptBuilder::new()
        .render(&PromptInputs {
            stages: mission.cursor.stages(),
            current: mission.cursor.current_stage(),
            schema_doc: &mission.schema_doc,
            mapping_doc: &mission.mapping_doc,
            retrieved_context: &retrieved_context,
            transcript: &mission.transcript,
        })
        .context("render mission prompt")?;

    let request = PolicyRequest {
        prompt: prompt.clone(),
        workdir: mission.toolbox.project_root().clone(),
        timeout: Duration::from_secs(mission.config.command_timeout_secs),
        output_limit_bytes: mission.config.output_limit_bytes,
    };
    let raw = complete_with_retry(
        policy,
        &request,
        mission.config.policy.max_retries,
        Duration::from_secs(mission.config.policy.retry_backoff_secs),
    )?;

    let (action_name, input, ok, observation, terminal) = match parse_action(&raw) {
        Err(failure) => (
            "invalid".to_string(),
            head(&raw, 200),
            false,
            corrective_observation(&failure),
            None,
        ),
        Ok(action) => {
            let (ok, observation, terminal) = dispatch(mission, &action);
            (action.name().to_string(), action.input_summary(), ok, observation, terminal)
        }
    };

    let entry = TranscriptEntry {
        step: iter,
        action: action_name.clone(),
        input,
        observation,
        at_epoch_secs: now_epoch_seconds(),
        duration_ms: start.elapsed().as_millis() as u64,
    };
    write_iteration(&IterationWriteRequest {
        runs_dir: &mission.paths.runs_dir,
        run_id: &mission.run_id,
        iter,
        entry: &entry,
        prompt: &prompt,
        raw_action: &raw,
    })?;

    mission.transcript.push(entry);
    if mission.transcript.entries().len() > mission.config.transcript_max_entries {
        mission
            .transcript
            .compact(mission.config.transcript_keep_recent);
    }

    info!(iter, action = %action_name, ok, "step complete");
    Ok(StepOutcome {
        iter,
        action: action_name,
        ok,
        terminal,
    })
}

/// Execute the chosen action and produce its observation.
fn dispatch(mission: &mut Mission, action: &Action) -> (bool, String, Option<String>) {
    if action.is_mutation() {
        // Any mutation invalidates the last validation result, even if the
        // action itself fails: a dying command may still have touched files.
        mission.validation_clean = false;
    }

    match action {
        Action::ReadFile { path } => {
            let result = mission.toolbox.read_file(path);
            (result.ok, result.output, None)
        }
        Action::WriteFile { path, content } => {
            let result = mission.toolbox.write_file(path, content);
            (result.ok, result.output, None)
        }
        Action::ListDirectory { path } => {
            let result = mission.toolbox.list_directory(path);
            (result.ok, result.output, None)
        }
        Action::RunCommand { command } => {
            let result = mission.toolbox.run_command(command);
            (result.ok, result.output, None)
        }
        Action::RetrieveContext { query } => {
            let result = mission.toolbox.retrieve_context(query);
            let output = if result.ok && result.output.is_empty() {
                "(no indexed context matched)".to_string()
            } else {
                result.output
            };
            (result.ok, output, None)
        }
        Action::Validate => {
            let outcome = mission.toolbox.validate();
            mission.validation_clean = outcome.passed;
            let observation = if outcome.passed {
                "validation passed: no diagnostics".to_string()
            } else if outcome.output.trim().is_empty() {
                format!(
                    "validation failed with exit status {:?} and no output",
                    outcome.exit_code
                )
            } else {
                // Diagnostic text verbatim: this is the corrective signal.
                outcome.output
            };
            (outcome.passed, observation, None)
        }
        Action::CompleteStage => {
            let clean = mission.validation_clean;
            match mission.cursor.try_complete(clean) {
                Ok(completed) => {
                    let observation = match mission.cursor.current_stage() {
                        Some(next) => format!(
                            "stage '{}' complete; now in stage {} ({}): {}",
                            completed.name, next.ordinal, next.name, next.goal
                        ),
                        None => format!(
                            "stage '{}' complete; all stages are done, respond \
                             with final_answer",
                            completed.name
                        ),
                    };
                    (true, observation, None)
                }
                Err(refusal) => (
                    false,
                    format!("stage '{}' not complete: {}", refusal.stage_name, refusal.reason),
                    None,
                ),
            }
        }
        Action::FinalAnswer { summary } => {
            (true, "mission declared complete".to_string(), Some(summary.clone()))
        }
    }
}

fn head(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedPolicy, TestMission, action, write_action};

    #[test]
    fn malformed_policy_output_yields_corrective_observation() {
        let mut fixture = TestMission::new().expect("fixture");
        let policy = ScriptedPolicy::new(vec!["I will now read the schema.".to_string()]);

        let outcome = run_step(&mut fixture.mission, &policy).expect("step");

        assert_eq!(outcome.action, "invalid");
        assert!(!outcome.ok);
        assert!(outcome.terminal.is_none());
        let entries = fixture.mission.transcript.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].observation.contains("could not parse action"));
    }

    #[test]
    fn tool_failure_is_an_observation_not_an_error() {
        let mut fixture = TestMission::new().expect("fixture");
        let policy = ScriptedPolicy::new(vec![action("read_file", "src/absent.ts")]);

        let outcome = run_step(&mut fixture.mission, &policy).expect("step");

        assert_eq!(outcome.action, "read_file");
        assert!(!outcome.ok);
        let entries = fixture.mission.transcript.entries();
        assert!(entries[0].observation.contains("error reading file"));
    }

    #[test]
    fn mutation_then_validate_updates_gate_state() {
        let mut fixture = TestMission::new().expect("fixture");
        assert!(!fixture.mission.validation_clean());

        let policy = ScriptedPolicy::new(vec![
            write_action("src/a.ts", "export const ok = 1;"),
            action("validate", ""),
        ]);

        run_step(&mut fixture.mission, &policy).expect("write step");
        assert!(!fixture.mission.validation_clean());

        let outcome = run_step(&mut fixture.mission, &policy).expect("validate step");
        assert!(outcome.ok);
        assert!(fixture.mission.validation_clean());
    }

    #[test]
    fn failing_validation_feeds_diagnostics_back_verbatim() {
        let mut fixture = TestMission::new().expect("fixture");
        let policy = ScriptedPolicy::new(vec![
            write_action("src/broken.ts", "const BROKEN = true;"),
            action("validate", ""),
        ]);

        run_step(&mut fixture.mission, &policy).expect("write step");
        let outcome = run_step(&mut fixture.mission, &policy).expect("validate step");

        assert!(!outcome.ok);
        assert!(!fixture.mission.validation_clean());
        let entries = fixture.mission.transcript.entries();
        assert!(entries[1].observation.contains("BROKEN"));
    }

    #[test]
    fn complete_stage_is_refused_until_validation_is_clean() {
        let mut fixture = TestMission::new().expect("fixture");
        // Move past the ungated discovery stage first.
        let policy = ScriptedPolicy::new(vec![
            action("complete_stage", ""),
            write_action("src/a.ts", "export const ok = 1;"),
            action("complete_stage", ""),
            action("validate", ""),
            action("complete_stage", ""),
        ]);

        let discovery = run_step(&mut fixture.mission, &policy).expect("discovery");
        assert!(discovery.ok);

        run_step(&mut fixture.mission, &policy).expect("write");
        let refused = run_step(&mut fixture.mission, &policy).expect("refused completion");
        assert!(!refused.ok);
        assert!(
            fixture.mission.transcript.entries()[2]
                .observation
                .contains("not complete")
        );

        run_step(&mut fixture.mission, &policy).expect("validate");
        let accepted = run_step(&mut fixture.mission, &policy).expect("accepted completion");
        assert!(accepted.ok);
    }

    #[test]
    fn final_answer_terminates_with_a_summary() {
        let mut fixture = TestMission::new().expect("fixture");
        let policy = ScriptedPolicy::new(vec![action("final_answer", "integration finished")]);

        let outcome = run_step(&mut fixture.mission, &policy).expect("step");

        assert_eq!(outcome.terminal.as_deref(), Some("integration finished"));
        assert!(outcome.ok);
    }

    #[test]
    fn steps_write_mission_log_artifacts() {
        let mut fixture = TestMission::new().expect("fixture");
        let policy = ScriptedPolicy::new(vec![action("validate", "")]);

        run_step(&mut fixture.mission, &policy).expect("step");

        let iter_dir = fixture.mission.paths.iteration_dir(&fixture.mission.run_id, 1);
        assert!(iter_dir.join("entry.json").is_file());
        assert!(iter_dir.join("prompt.md").is_file());
        assert!(iter_dir.join("raw_action.txt").is_file());
    }
}
