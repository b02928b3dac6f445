//! Append-only transcript: the loop's memory of action/observation pairs.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// One action/observation pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// 1-indexed step ordinal. Preserved across compaction, so ordinals keep
    /// counting even when old entries are folded away.
    pub step: u32,
    /// Wire name of the chosen action (or `invalid` / `summary`).
    pub action: String,
    /// Short rendering of the action input.
    pub input: String,
    /// Textual result of executing the action.
    pub observation: String,
    pub at_epoch_secs: u64,
    pub duration_ms: u64,
}

/// Ordered action/observation log. Entries are only ever appended or folded
/// into a leading summary entry; they are never reordered or dropped silently.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    recorded: u32,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Total steps recorded over the life of the run, including folded ones.
    /// This is the loop's iteration counter.
    pub fn steps_recorded(&self) -> u32 {
        self.recorded
    }

    /// Ordinal the next pushed entry will carry.
    pub fn next_step(&self) -> u32 {
        self.recorded + 1
    }

    pub fn push(&mut self, entry: TranscriptEntry) {
        self.recorded = self.recorded.max(entry.step);
        self.entries.push(entry);
    }

    /// Fold the oldest entries into a single synthetic `summary` entry so at
    /// most `keep_recent` real entries (plus the summary) remain.
    ///
    /// Deterministic: the summary lists each folded step's action and the
    /// head of its observation. A previous summary entry is folded like any
    /// other entry, so repeated compaction stays bounded.
    pub fn compact(&mut self, keep_recent: usize) {
        if self.entries.len() <= keep_recent {
            return;
        }
        let fold_count = self.entries.len() - keep_recent;
        let folded: Vec<TranscriptEntry> = self.entries.drain(..fold_count).collect();

        let first_step = folded.first().map(|e| e.step).unwrap_or(0);
        let last_step = folded.last().map(|e| e.step).unwrap_or(first_step);
        let mut lines = Vec::with_capacity(folded.len());
        for entry in &folded {
            lines.push(format!(
                "step {} {}({}): {}",
                entry.step,
                entry.action,
                head(&entry.input, 80),
                head(&entry.observation, 120)
            ));
        }

        let summary = TranscriptEntry {
            step: first_step,
            action: "summary".to_string(),
            input: format!("steps {first_step}-{last_step}"),
            observation: lines.join("\n"),
            at_epoch_secs: folded.last().map(|e| e.at_epoch_secs).unwrap_or(0),
            duration_ms: 0,
        };
        self.entries.insert(0, summary);
    }
}

/// Seconds since the Unix epoch, for transcript stamps.
pub fn now_epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn head(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}
