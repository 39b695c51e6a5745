//! Ship-criteria verification.
//!
//! Compares the checklist of declared ship criteria in a feature's plan
//! against the checked items in its progress log. Both sides are free-form
//! sentences written independently, so matching is fuzzy: substring
//! containment in either direction, or a word-overlap of at least 70% of the
//! criterion's own words. An absent plan, or a plan with no criteria section,
//! is a vacuous pass — the gate only blocks on an unmet specification, never
//! on a missing one.

use crate::error::{Error, Result};
use crate::workspace::Workspace;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fs;

/// Minimum share of a criterion's words that must appear in a satisfied item.
const WORD_OVERLAP_THRESHOLD: f64 = 0.7;

/// Matches a "Ship Criteria" section heading (either `**Ship Criteria:**` or
/// `## Ship Criteria`) followed by its run of checklist items.
static SHIP_SECTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\*\*Ship Criteria[:*]*|##[ \t]*Ship Criteria)[^\n]*\n(?:[ \t]*\n)*((?:[-*][ \t]*\[[ x]\][^\n]+\n?)+)")
        .expect("ship section pattern")
});

/// One checklist item, checked or not.
static CHECKLIST_ITEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-*][ \t]*\[[ x]\][ \t]*([^\n]+)").expect("checklist item pattern"));

/// One checked checklist item.
static CHECKED_ITEM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[-*][ \t]*\[x\][ \t]*([^\n]+)").expect("checked item pattern"));

/// Outcome of one verification call. Computed fresh, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    /// Number of declared criteria.
    pub total: usize,
    /// Number matched against the progress log.
    pub satisfied: usize,
    /// Criteria with no matching checked item, in declaration order.
    pub missing: Vec<String>,
}

impl VerificationReport {
    /// A pass with nothing to verify.
    pub fn vacuous() -> Self {
        Self {
            total: 0,
            satisfied: 0,
            missing: Vec::new(),
        }
    }

    /// True when every declared criterion is satisfied.
    pub fn passed(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Extract declared criteria from the plan's ship-criteria section(s).
pub fn extract_ship_criteria(plan: &str) -> Vec<String> {
    let mut criteria = Vec::new();
    for section in SHIP_SECTION_RE.captures_iter(plan) {
        for item in CHECKLIST_ITEM_RE.captures_iter(&section[1]) {
            criteria.push(item[1].trim().to_string());
        }
    }
    criteria
}

/// Extract every checked checklist item from the progress log.
pub fn extract_checked_items(log: &str) -> Vec<String> {
    CHECKED_ITEM_RE
        .captures_iter(log)
        .map(|item| item[1].trim().to_string())
        .collect()
}

fn normalize(text: &str) -> String {
    text.to_lowercase().trim().to_string()
}

/// Whether a normalized criterion matches any normalized satisfied item.
/// First match wins; there is no scoring across candidates.
fn is_satisfied(criterion: &str, items: &[String]) -> bool {
    let criterion_words: HashSet<&str> = criterion.split_whitespace().collect();
    for item in items {
        if item.contains(criterion) || criterion.contains(item.as_str()) {
            return true;
        }
        let item_words: HashSet<&str> = item.split_whitespace().collect();
        let overlap = criterion_words.intersection(&item_words).count();
        if overlap as f64 >= criterion_words.len() as f64 * WORD_OVERLAP_THRESHOLD {
            return true;
        }
    }
    false
}

/// Verify the plan's declared criteria against the progress log's checked
/// items.
pub fn verify(plan: &str, log: &str) -> VerificationReport {
    let criteria = extract_ship_criteria(plan);
    if criteria.is_empty() {
        return VerificationReport::vacuous();
    }

    let items: Vec<String> = extract_checked_items(log)
        .iter()
        .map(|item| normalize(item))
        .collect();

    let mut report = VerificationReport {
        total: criteria.len(),
        satisfied: 0,
        missing: Vec::new(),
    };
    for criterion in criteria {
        if is_satisfied(&normalize(&criterion), &items) {
            report.satisfied += 1;
        } else {
            report.missing.push(criterion);
        }
    }
    report
}

/// Format verification failures as readable feedback.
pub fn format_failures(report: &VerificationReport) -> String {
    let mut lines = vec![format!(
        "Plan verification: {}/{} criteria met",
        report.satisfied, report.total
    )];
    if !report.missing.is_empty() {
        lines.push("\nMissing ship criteria:".to_string());
        for item in &report.missing {
            lines.push(format!("  - [ ] {item}"));
        }
    }
    lines.push("\nPlease complete the missing criteria before finishing.".to_string());
    lines.join("\n")
}

/// Locates a feature's plan and progress documents and verifies them.
pub struct CriteriaVerifier {
    workspace: Workspace,
}

impl CriteriaVerifier {
    /// Create a verifier over the given workspace.
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    /// Verify the named feature.
    ///
    /// A plan that cannot be located is a vacuous pass. An unreadable plan
    /// or log is reported as an error for the caller to swallow (fail-open).
    pub fn verify_feature(&self, feature: &str) -> Result<VerificationReport> {
        let plan_path = match self.workspace.find_plan_file(feature) {
            Some(path) => path,
            None => return Ok(VerificationReport::vacuous()),
        };
        let plan = fs::read_to_string(&plan_path)
            .map_err(|err| Error::Corrupt(format!("plan unreadable: {err}")))?;

        let log = match self.workspace.find_memory_file(feature) {
            Some(path) => fs::read_to_string(&path)
                .map_err(|err| Error::Corrupt(format!("progress log unreadable: {err}")))?,
            None => String::new(),
        };

        Ok(verify(&plan, &log))
    }
}
