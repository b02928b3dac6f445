//! Mission prompt builder: deterministic policy input per iteration.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::action::TOOL_DESCRIPTIONS;
use crate::core::plan::PlanStage;
use crate::core::transcript::Transcript;

const MISSION_TEMPLATE: &str = include_str!("prompts/mission.md");

/// Everything the policy sees for one decision.
#[derive(Debug)]
pub struct PromptInputs<'a> {
    pub stages: &'a [PlanStage],
    /// Current stage, or `None` once the plan is exhausted.
    pub current: Option<&'a PlanStage>,
    pub schema_doc: &'a str,
    pub mapping_doc: &'a str,
    pub retrieved_context: &'a str,
    pub transcript: &'a Transcript,
}

#[derive(Serialize)]
struct ToolDoc {
    name: &'static str,
    description: &'static str,
}

/// Template engine wrapper with byte budgets for the unbounded sections.
pub struct PromptBuilder {
    env: Environment<'static>,
    transcript_budget_bytes: usize,
    context_budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::with_budgets(30_000, 10_000)
    }

    pub fn with_budgets(transcript_budget_bytes: usize, context_budget_bytes: usize) -> Self {
        let mut env = Environment::new();
        env.add_template("mission", MISSION_TEMPLATE)
            .expect("mission template should be valid");
        Self {
            env,
            transcript_budget_bytes,
            context_budget_bytes,
        }
    }

    pub fn render(&self, inputs: &PromptInputs<'_>) -> Result<String> {
        let tools: Vec<ToolDoc> = TOOL_DESCRIPTIONS
            .iter()
            .map(|&(name, description)| ToolDoc { name, description })
            .collect();
        let transcript = render_transcript_tail(inputs.transcript, self.transcript_budget_bytes);
        let retrieved = clip(inputs.retrieved_context, self.context_budget_bytes);

        let template = self.env.get_template("mission")?;
        let rendered = template.render(context! {
            stages => inputs.stages,
            current => inputs.current,
            tools => tools,
            schema_doc => inputs.schema_doc.trim(),
            mapping_doc => inputs.mapping_doc.trim(),
            retrieved_context => retrieved.trim(),
            transcript => transcript.trim(),
        })?;
        Ok(rendered)
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Render the most recent transcript entries that fit the byte budget,
/// oldest first, with an omission marker when earlier entries were dropped.
fn render_transcript_tail(transcript: &Transcript, budget: usize) -> String {
    let mut blocks: Vec<String> = Vec::new();
    let mut used = 0usize;
    let mut omitted = false;

    for entry in transcript.entries().iter().rev() {
        let block = format!(
            "step {}: {}({})\nobservation:\n{}",
            entry.step, entry.action, entry.input, entry.observation
        );
        if used + block.len() > budget && !blocks.is_empty() {
            omitted = true;
            break;
        }
        used += block.len();
        blocks.push(block);
    }

    blocks.reverse();
    let mut rendered = blocks.join("\n\n");
    if omitted {
        rendered = format!("[earlier steps omitted]\n\n{rendered}");
    }
    rendered
}

fn clip(text: &str, budget: usize) -> String {
    if text.len() <= budget {
        return text.to_string();
    }
    let mut cut = budget;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n[context truncated]", &text[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::standard_plan;
    use crate::core::transcript::TranscriptEntry;

    fn entry(step: u32, observation: &str) -> TranscriptEntry {
        TranscriptEntry {
            step,
            action: "read_file".to_string(),
            input: format!("src/{step}.ts"),
            observation: observation.to_string(),
            at_epoch_secs: 0,
            duration_ms: 1,
        }
    }

    #[test]
    fn renders_plan_tools_and_documents() {
        let stages = standard_plan();
        let transcript = Transcript::new();
        let prompt = PromptBuilder::new()
            .render(&PromptInputs {
                stages: &stages,
                current: stages.first(),
                schema_doc: "[{\"uid\": \"page\"}]",
                mapping_doc: "home -> Hero",
                retrieved_context: "",
                transcript: &transcript,
            })
            .expect("render");

        assert!(prompt.contains("1. discovery (current)"));
        assert!(prompt.contains("- validate:"));
        assert!(prompt.contains("[{\"uid\": \"page\"}]"));
        assert!(prompt.contains("home -> Hero"));
        assert!(!prompt.contains("Relevant code context"));
        assert!(!prompt.contains("Transcript so far"));
    }

    #[test]
    fn exhausted_plan_instructs_final_answer() {
        let stages = standard_plan();
        let transcript = Transcript::new();
        let prompt = PromptBuilder::new()
            .render(&PromptInputs {
                stages: &stages,
                current: None,
                schema_doc: "{}",
                mapping_doc: "",
                retrieved_context: "",
                transcript: &transcript,
            })
            .expect("render");

        assert!(prompt.contains("All plan stages are complete"));
        assert!(prompt.contains("final_answer"));
    }

    #[test]
    fn transcript_tail_respects_the_budget() {
        let mut transcript = Transcript::new();
        for step in 1..=20 {
            transcript.push(entry(step, &"x".repeat(200)));
        }

        let tail = render_transcript_tail(&transcript, 1000);
        assert!(tail.starts_with("[earlier steps omitted]"));
        assert!(tail.contains("step 20"));
        assert!(!tail.contains("step 1:"));
        // Most recent entries render oldest-first.
        let pos_19 = tail.find("step 19").expect("step 19");
        let pos_20 = tail.find("step 20").expect("step 20");
        assert!(pos_19 < pos_20);
    }

    #[test]
    fn oversized_context_is_clipped() {
        let stages = standard_plan();
        let transcript = Transcript::new();
        let context = "y".repeat(50_000);
        let prompt = PromptBuilder::with_budgets(1000, 500)
            .render(&PromptInputs {
                stages: &stages,
                current: stages.first(),
                schema_doc: "{}",
                mapping_doc: "",
                retrieved_context: &context,
                transcript: &transcript,
            })
            .expect("render");

        assert!(prompt.contains("[context truncated]"));
        assert!(!prompt.contains(&"y".repeat(1000)));
    }
}
