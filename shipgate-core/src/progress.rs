//! Progress log updates and the feature-completion heuristic.
//!
//! The progress log (`MEMORY.md`) is owned by the planning workflow; the
//! gate's writes are surgical: one status cell in the chunk table, one
//! appended entry under the session-log heading. Everything else is left
//! untouched.

use crate::config::GateConfig;
use crate::patch;
use crate::workspace::Workspace;
use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use tracing::warn;

/// Heading the session log entries are appended under.
const SESSION_LOG_HEADING: &str = "## Session Log";

static STATUS_COMPLETE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\*\*Status:\*\*[ \t]*(complete|done|finished)").expect("status pattern")
});

static ALL_PHASES_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)all[ \t]+phases?[ \t]+(?:are[ \t]+)?complete").expect("all-phases pattern")
});

static PHASE_ROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\|[ \t]*Phase[ \t]*\d+[^|]*\|[ \t]*([\w-]+)[ \t]*\|").expect("phase row pattern")
});

static CURRENT_PHASE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\*\*Current Phase:\*\*[ \t]*Phase[ \t]*(\d+)").expect("current phase pattern")
});

static PHASE_NUM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Phase[ \t]*(\d+)").expect("phase number pattern"));

/// Appends entries to and rewrites rows of a feature's progress log.
pub struct ProgressLog {
    workspace: Workspace,
}

impl ProgressLog {
    /// Create a progress log over the given workspace.
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    /// Rewrite the chunk's status cell in the progress table, preserving the
    /// trailing notes cells. Returns false when the document or row is
    /// missing or the cell already holds the value.
    pub fn mark_chunk_done(&self, feature: &str, chunk: &str, status: &str) -> bool {
        let path = match self.workspace.find_memory_file(feature) {
            Some(path) => path,
            None => return false,
        };
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => return false,
        };
        match patch::set_table_cell(&content, chunk, status) {
            Some(updated) if updated != content => match fs::write(&path, updated) {
                Ok(()) => true,
                Err(err) => {
                    warn!(feature, chunk, %err, "failed to write progress log");
                    false
                }
            },
            _ => false,
        }
    }

    /// Append a timestamped completion entry directly after the session-log
    /// heading (newest first).
    pub fn append_entry(&self, feature: &str, chunk: &str, description: &str) -> bool {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M");
        let entry = format!(
            "\n### {timestamp} - Chunk {chunk} Auto-Commit\n\n**Completed:** {description}\n\n*Auto-committed by shipgate.*\n"
        );
        self.insert_entry(feature, &entry)
    }

    /// Append a timestamped feature-review entry.
    pub fn append_review(&self, feature: &str, summary: &str) -> bool {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M");
        let entry = format!("\n### {timestamp} - Feature Review\n\n**Result:** {summary}\n");
        self.insert_entry(feature, &entry)
    }

    fn insert_entry(&self, feature: &str, entry: &str) -> bool {
        let path = match self.workspace.find_memory_file(feature) {
            Some(path) => path,
            None => return false,
        };
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => return false,
        };
        match patch::insert_after_heading(&content, SESSION_LOG_HEADING, entry) {
            Some(updated) => match fs::write(&path, updated) {
                Ok(()) => true,
                Err(err) => {
                    warn!(feature, %err, "failed to write progress log");
                    false
                }
            },
            None => false,
        }
    }

    /// Current phase number from the progress log.
    pub fn current_phase(&self, feature: &str) -> Option<u32> {
        let path = self.workspace.find_memory_file(feature)?;
        let content = fs::read_to_string(&path).ok()?;
        CURRENT_PHASE_RE
            .captures(&content)?
            .get(1)?
            .as_str()
            .parse()
            .ok()
    }
}

/// Best-effort signal that a feature's work is finished.
///
/// Deliberately heuristic: there is no authoritative ground truth for
/// "feature complete", so the predicate is pluggable and the default may
/// over- or under-trigger.
pub trait CompletionProbe: Send + Sync {
    /// Whether the named feature appears fully complete.
    fn is_complete(&self, feature: &str) -> bool;
}

/// Default heuristic over the feature's progress log.
pub struct HeuristicProbe {
    workspace: Workspace,
}

impl HeuristicProbe {
    /// Create a probe over the given workspace.
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    fn check(content: &str) -> bool {
        // Explicit completion status.
        if STATUS_COMPLETE_RE.is_match(content) {
            return true;
        }

        // An "all phases complete" phrase.
        if ALL_PHASES_RE.is_match(content) {
            return true;
        }

        // A phase table with nothing pending or in progress.
        let statuses: Vec<String> = PHASE_ROW_RE
            .captures_iter(content)
            .map(|caps| caps[1].to_lowercase())
            .collect();
        if !statuses.is_empty()
            && !statuses
                .iter()
                .any(|s| s == "pending" || s == "in-progress")
        {
            return true;
        }

        // On the final phase and that phase's row shows complete.
        if let Some(caps) = CURRENT_PHASE_RE.captures(content) {
            if let Ok(current) = caps[1].parse::<u32>() {
                let total = PHASE_NUM_RE
                    .captures_iter(content)
                    .filter_map(|caps| caps[1].parse::<u32>().ok())
                    .collect::<HashSet<_>>()
                    .len() as u32;
                if current >= total {
                    let final_row = format!(r"(?i)Phase[ \t]*{current}[^|]*\|[ \t]*(complete|done)");
                    if Regex::new(&final_row)
                        .map(|re| re.is_match(content))
                        .unwrap_or(false)
                    {
                        return true;
                    }
                }
            }
        }

        false
    }
}

impl CompletionProbe for HeuristicProbe {
    fn is_complete(&self, feature: &str) -> bool {
        let path = match self.workspace.find_memory_file(feature) {
            Some(path) => path,
            None => return false,
        };
        match fs::read_to_string(&path) {
            Ok(content) => Self::check(&content),
            Err(_) => false,
        }
    }
}
