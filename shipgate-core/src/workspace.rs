//! Locating collaborating documents in the working tree.
//!
//! Per-feature planning documents live under the plans directory, either
//! directly (`docs/plans/<feature>/`) or one level down for enhancement
//! layouts (`docs/plans/<parent>/<feature>/`). The current feature is
//! detected from the git branch, falling back to a scan for an in-progress
//! progress log.

use crate::config::GateConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Progress-log status line marking a feature as in progress.
static IN_PROGRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\*\*Status:\*\*[ \t]*(in[- ]?progress|implementing)")
        .expect("in-progress pattern")
});

/// `feature/<name>` branch naming.
static FEATURE_BRANCH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^feature/(.+)$").expect("feature branch pattern"));

/// Resolves planning documents for features in one working tree.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    plans_dir: PathBuf,
}

impl Workspace {
    /// Create a workspace over the configured working tree.
    pub fn new(config: &GateConfig) -> Self {
        Self {
            root: config.root().to_path_buf(),
            plans_dir: config.plans_dir(),
        }
    }

    /// Directory of per-feature planning documents.
    pub fn plans_dir(&self) -> &PathBuf {
        &self.plans_dir
    }

    /// Locate the feature's plan document.
    pub fn find_plan_file(&self, feature: &str) -> Option<PathBuf> {
        self.find_doc(feature, "PLAN.md")
    }

    /// Locate the feature's progress log.
    pub fn find_memory_file(&self, feature: &str) -> Option<PathBuf> {
        self.find_doc(feature, "MEMORY.md")
    }

    fn find_doc(&self, feature: &str, name: &str) -> Option<PathBuf> {
        let direct = self.plans_dir.join(feature).join(name);
        if direct.exists() {
            return Some(direct);
        }
        // Enhancement layout: one level of nesting.
        let entries = fs::read_dir(&self.plans_dir).ok()?;
        for entry in entries.flatten() {
            let nested = entry.path().join(feature).join(name);
            if nested.exists() {
                return Some(nested);
            }
        }
        None
    }

    /// Detect the current in-progress feature.
    ///
    /// Tries the `feature/<name>` git branch convention first, then scans
    /// progress logs for an in-progress status. All failures yield None.
    pub async fn current_feature(&self) -> Option<String> {
        if let Some(feature) = self.feature_from_branch().await {
            return Some(feature);
        }
        self.feature_from_progress_logs()
    }

    async fn feature_from_branch(&self) -> Option<String> {
        let mut command = Command::new("git");
        command
            .args(["branch", "--show-current"])
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let output = tokio::time::timeout(Duration::from_secs(5), command.output())
            .await
            .ok()?
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
        FEATURE_BRANCH_RE
            .captures(&branch)
            .map(|caps| caps[1].to_string())
    }

    fn feature_from_progress_logs(&self) -> Option<String> {
        let entries = fs::read_dir(&self.plans_dir).ok()?;
        for entry in entries.flatten() {
            let memory = entry.path().join("MEMORY.md");
            let content = match fs::read_to_string(&memory) {
                Ok(content) => content,
                Err(_) => continue,
            };
            if IN_PROGRESS_RE.is_match(&content) {
                if let Some(name) = entry.file_name().to_str() {
                    debug!(feature = name, "detected in-progress feature from progress log");
                    return Some(name.to_string());
                }
            }
        }
        None
    }

    /// Load the feature's progress log and plan for context injection.
    pub fn load_context(&self, feature: &str) -> (Option<String>, Option<String>) {
        let memory = self
            .find_memory_file(feature)
            .and_then(|path| fs::read_to_string(path).ok());
        let plan = self
            .find_plan_file(feature)
            .and_then(|path| fs::read_to_string(path).ok());
        (memory, plan)
    }

    /// Build the resume message for a detected in-progress feature, or None
    /// when there is nothing to inject.
    pub async fn session_context(&self) -> Option<String> {
        let feature = self.current_feature().await?;
        let (memory, plan) = self.load_context(&feature);
        if memory.is_none() && plan.is_none() {
            return None;
        }

        let mut lines = vec![format!("Resuming in-progress feature: {feature}\n")];
        if let Some(memory) = memory {
            lines.push("## Current State (MEMORY.md)\n".to_string());
            lines.push(memory);
            lines.push(String::new());
        }
        if let Some(plan) = plan {
            lines.push("## Implementation Plan (PLAN.md)\n".to_string());
            lines.push(plan);
        }
        Some(lines.join("\n"))
    }
}
