//! The action protocol between the policy and the tool executor.
//!
//! The policy's output is free-form text; this module extracts a JSON blob
//! from it, validates the blob against a closed schema, and decodes it into
//! the [`Action`] enum. Malformed output never escapes as an error: callers
//! turn [`ActionParseFailure`] into a corrective observation and the loop
//! continues.

use std::fmt;
use std::sync::LazyLock;

use jsonschema::Draft;
use serde::Deserialize;
use serde_json::Value;

const ACTION_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/action.schema.json"
));

static ACTION_VALIDATOR: LazyLock<jsonschema::Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(ACTION_SCHEMA).expect("action schema should be valid JSON");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("action schema should compile")
});

static FENCED_JSON: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fence regex should compile")
});

/// One structured action chosen by the policy.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ReadFile { path: String },
    WriteFile { path: String, content: String },
    ListDirectory { path: String },
    RunCommand { command: String },
    Validate,
    RetrieveContext { query: String },
    CompleteStage,
    FinalAnswer { summary: String },
}

impl Action {
    /// Wire name of the action.
    pub fn name(&self) -> &'static str {
        match self {
            Action::ReadFile { .. } => "read_file",
            Action::WriteFile { .. } => "write_file",
            Action::ListDirectory { .. } => "list_directory",
            Action::RunCommand { .. } => "run_command",
            Action::Validate => "validate",
            Action::RetrieveContext { .. } => "retrieve_context",
            Action::CompleteStage => "complete_stage",
            Action::FinalAnswer { .. } => "final_answer",
        }
    }

    /// Short input rendering for transcripts and progress lines.
    pub fn input_summary(&self) -> String {
        match self {
            Action::ReadFile { path } | Action::ListDirectory { path } => path.clone(),
            Action::WriteFile { path, content } => {
                format!("{path} ({} bytes)", content.len())
            }
            Action::RunCommand { command } => command.clone(),
            Action::RetrieveContext { query } => query.clone(),
            Action::Validate | Action::CompleteStage => String::new(),
            Action::FinalAnswer { summary } => truncate(summary, 200),
        }
    }

    /// True for actions that mutate the project tree or spawn arbitrary
    /// commands, i.e. those that dirty the validation state.
    pub fn is_mutation(&self) -> bool {
        matches!(self, Action::WriteFile { .. } | Action::RunCommand { .. })
    }
}

/// Capability descriptions surfaced to the policy in the mission prompt.
pub const TOOL_DESCRIPTIONS: &[(&str, &str)] = &[
    (
        "read_file",
        "Read a file. action_input: path relative to the project root.",
    ),
    (
        "write_file",
        "Write a file, creating parent directories and overwriting existing \
         content. action_input: {\"path\": ..., \"content\": ...}.",
    ),
    (
        "list_directory",
        "List directory entries. action_input: path relative to the project root.",
    ),
    (
        "run_command",
        "Run a shell command in the project root (install dependencies, \
         scaffold files). action_input: the command string. A non-zero exit is \
         reported back, not fatal.",
    ),
    (
        "validate",
        "Run the project type-checker in check-only mode. Required after every \
         write_file or run_command before a stage can complete. No input.",
    ),
    (
        "retrieve_context",
        "Retrieve the most relevant indexed code snippets. action_input: a \
         natural-language or code query.",
    ),
    (
        "complete_stage",
        "Declare the current plan stage done. Refused unless the stage's \
         completion gate holds. No input.",
    ),
    (
        "final_answer",
        "Finish the mission. action_input: a summary of the work completed.",
    ),
];

/// Why a policy response could not be turned into an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionParseFailure {
    pub reason: String,
}

impl fmt::Display for ActionParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not parse action: {}", self.reason)
    }
}

impl std::error::Error for ActionParseFailure {}

/// Corrective observation injected into the transcript after a parse failure.
pub fn corrective_observation(failure: &ActionParseFailure) -> String {
    format!(
        "{failure}. Respond with exactly one JSON object of the form \
         {{\"action\": <tool name or final_answer>, \"action_input\": <input>}} \
         and nothing else."
    )
}

/// Parse free-form policy output into an [`Action`].
///
/// Accepts a fenced ```json block, a bare JSON object, or an object embedded
/// in surrounding prose (first `{` to last `}`). The extracted blob must pass
/// the embedded action schema before being decoded.
pub fn parse_action(raw: &str) -> Result<Action, ActionParseFailure> {
    let candidate = extract_json(raw).ok_or_else(|| ActionParseFailure {
        reason: "no JSON object found in response".to_string(),
    })?;

    let value: Value = serde_json::from_str(candidate).map_err(|err| ActionParseFailure {
        reason: format!("invalid JSON ({err})"),
    })?;

    let messages: Vec<String> = ACTION_VALIDATOR
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(ActionParseFailure {
            reason: format!("schema violations: {}", messages.join("; ")),
        });
    }

    decode(value)
}

#[derive(Deserialize)]
struct ActionWire {
    action: String,
    #[serde(default)]
    action_input: Value,
}

fn decode(value: Value) -> Result<Action, ActionParseFailure> {
    let wire: ActionWire = serde_json::from_value(value).map_err(|err| ActionParseFailure {
        reason: format!("invalid action payload ({err})"),
    })?;

    let input_str = || -> Result<String, ActionParseFailure> {
        match &wire.action_input {
            Value::String(s) => Ok(s.clone()),
            other => Err(ActionParseFailure {
                reason: format!("expected string action_input, got {other}"),
            }),
        }
    };

    match wire.action.as_str() {
        "read_file" => Ok(Action::ReadFile { path: input_str()? }),
        "list_directory" => Ok(Action::ListDirectory { path: input_str()? }),
        "run_command" => Ok(Action::RunCommand {
            command: input_str()?,
        }),
        "retrieve_context" => Ok(Action::RetrieveContext {
            query: input_str()?,
        }),
        "final_answer" => Ok(Action::FinalAnswer {
            summary: input_str()?,
        }),
        "validate" => Ok(Action::Validate),
        "complete_stage" => Ok(Action::CompleteStage),
        "write_file" => {
            #[derive(Deserialize)]
            struct WriteInput {
                path: String,
                content: String,
            }
            let input: WriteInput =
                serde_json::from_value(wire.action_input).map_err(|err| ActionParseFailure {
                    reason: format!("invalid write_file input ({err})"),
                })?;
            Ok(Action::WriteFile {
                path: input.path,
                content: input.content,
            })
        }
        other => Err(ActionParseFailure {
            reason: format!("unknown action '{other}'"),
        }),
    }
}

fn extract_json(raw: &str) -> Option<&str> {
    if let Some(caps) = FENCED_JSON.captures(raw) {
        return caps.get(1).map(|m| m.as_str());
    }
    let trimmed = raw.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end > start {
        return Some(&raw[start..=end]);
    }
    None
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &text[..cut])
}
