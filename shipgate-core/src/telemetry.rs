//! Token and cost telemetry for workflow phases.
//!
//! Planning and implementation phases are timed in a per-feature tracking
//! record. On each stop event the session transcript is summed for token
//! usage, the active phase is updated, and a compact elapsed-time / token /
//! cost display is returned for the host to show. All of it is best-effort:
//! telemetry never influences the gate's decision.

use crate::config::GateConfig;
use crate::error::Result;
use crate::event::{Decision, HookEvent};
use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// File name of the per-feature tracking record.
const TRACKING_FILE: &str = ".tracking.json";

/// Drafts live here until a plan is accepted into a feature directory.
const DRAFTS_DIR: &str = "_drafts";

/// Maximum length of a description-derived slug.
const SLUG_MAX_LEN: usize = 50;

/// Pricing per million tokens for one model family.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_create: f64,
}

/// Pricing by model-family substring, most specific first.
const PRICING: &[(&str, ModelPricing)] = &[
    (
        "claude-sonnet-4",
        ModelPricing {
            input: 3.00,
            output: 15.00,
            cache_read: 0.30,
            cache_create: 3.75,
        },
    ),
    (
        "claude-opus-4",
        ModelPricing {
            input: 15.00,
            output: 75.00,
            cache_read: 1.50,
            cache_create: 18.75,
        },
    ),
    (
        "claude-haiku-3.5",
        ModelPricing {
            input: 0.80,
            output: 4.00,
            cache_read: 0.08,
            cache_create: 1.00,
        },
    ),
];

/// Fallback pricing when the model is unrecognized.
const DEFAULT_PRICING: ModelPricing = ModelPricing {
    input: 3.00,
    output: 15.00,
    cache_read: 0.30,
    cache_create: 3.75,
};

static PLAN_CMD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^/(?:[\w-]+:)?plan\s+["']?(.+?)["']?\s*(?:--.*)?$"#)
        .expect("plan command pattern")
});

static IMPLEMENT_CMD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^/(?:[\w-]+:)?implement\s+(\S+)").expect("implement command pattern")
});

/// Token usage summed from a session transcript.
#[derive(Debug, Clone, Default)]
pub struct TokenTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    /// Most recently seen model id.
    pub model: Option<String>,
}

impl TokenTotals {
    /// Cost in USD for these totals under the matching pricing.
    pub fn cost(&self) -> f64 {
        let pricing = self
            .model
            .as_deref()
            .map(pricing_for)
            .unwrap_or(DEFAULT_PRICING);
        (self.input_tokens as f64 / 1_000_000.0) * pricing.input
            + (self.output_tokens as f64 / 1_000_000.0) * pricing.output
            + (self.cache_read_tokens as f64 / 1_000_000.0) * pricing.cache_read
            + (self.cache_creation_tokens as f64 / 1_000_000.0) * pricing.cache_create
    }
}

/// Look up pricing by model-family substring.
fn pricing_for(model: &str) -> ModelPricing {
    let lowered = model.to_lowercase();
    for (family, pricing) in PRICING {
        if lowered.contains(family) {
            return *pricing;
        }
    }
    DEFAULT_PRICING
}

/// Sum token usage from a transcript of JSONL entries, tolerating malformed
/// lines. Usage may sit at the entry root or nested under `message`.
pub fn parse_transcript(path: &Path) -> TokenTotals {
    let mut totals = TokenTotals::default();
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return totals,
    };

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: Value = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(_) => continue,
        };

        let message = entry.get("message").filter(|m| m.is_object());
        if let Some(model) = message
            .and_then(|m| m.get("model"))
            .or_else(|| entry.get("model"))
            .and_then(Value::as_str)
        {
            totals.model = Some(model.to_string());
        }

        let usage = message
            .and_then(|m| m.get("usage"))
            .or_else(|| entry.get("usage"));
        if let Some(usage) = usage {
            let count = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0);
            totals.input_tokens += count("input_tokens");
            totals.output_tokens += count("output_tokens");
            totals.cache_read_tokens += count("cache_read_input_tokens");
            totals.cache_creation_tokens += count("cache_creation_input_tokens");
        }
    }
    totals
}

/// One timed workflow phase.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PhaseRecord {
    pub started: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended: Option<String>,
    #[serde(default)]
    pub tokens_in: u64,
    #[serde(default)]
    pub tokens_out: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_creation_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl PhaseRecord {
    fn started_now() -> Self {
        Self {
            started: now_iso(),
            ..Self::default()
        }
    }

    fn is_active(&self) -> bool {
        self.ended.is_none()
    }

    /// Input tokens including both cache classes.
    fn total_input(&self) -> u64 {
        self.tokens_in + self.cache_read_tokens + self.cache_creation_tokens
    }

    fn cost(&self) -> f64 {
        TokenTotals {
            input_tokens: self.tokens_in,
            output_tokens: self.tokens_out,
            cache_read_tokens: self.cache_read_tokens,
            cache_creation_tokens: self.cache_creation_tokens,
            model: self.model.clone(),
        }
        .cost()
    }

    fn absorb(&mut self, totals: &TokenTotals) {
        self.tokens_in = totals.input_tokens;
        self.tokens_out = totals.output_tokens;
        self.cache_read_tokens = totals.cache_read_tokens;
        self.cache_creation_tokens = totals.cache_creation_tokens;
        self.model = totals.model.clone();
    }
}

/// Per-feature tracking record: plan phase, implement phase, or both.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrackingRecord {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub feature: Option<String>,
    #[serde(default)]
    pub plan: Option<PhaseRecord>,
    #[serde(default)]
    pub implement: Option<PhaseRecord>,
}

impl TrackingRecord {
    /// The phase currently accumulating tokens: implement wins over plan.
    fn active_phase_mut(&mut self) -> Option<&mut PhaseRecord> {
        if let Some(implement) = self.implement.as_mut() {
            if implement.is_active() {
                return Some(implement);
            }
        }
        if let Some(plan) = self.plan.as_mut() {
            if plan.is_active() {
                return Some(plan);
            }
        }
        None
    }

    fn active_started(&self) -> Option<&str> {
        if let Some(implement) = &self.implement {
            if implement.is_active() {
                return Some(&implement.started);
            }
        }
        if let Some(plan) = &self.plan {
            if plan.is_active() {
                return Some(&plan.started);
            }
        }
        None
    }
}

/// Convert a free-text description to a folder-safe slug.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for ch in text.to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let trimmed = slug.trim_matches('-');
    trimmed.chars().take(SLUG_MAX_LEN).collect()
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_iso(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Elapsed time between two timestamps, end defaulting to now.
pub fn format_duration(start: &str, end: Option<&str>) -> String {
    let start = match parse_iso(start) {
        Some(start) => start,
        None => return "?".to_string(),
    };
    let end = end.and_then(parse_iso).unwrap_or_else(Utc::now);
    let minutes = end.signed_duration_since(start).num_minutes();
    if minutes >= 60 {
        format!("{}h {}m", minutes / 60, minutes % 60)
    } else if minutes < 1 {
        "<1m".to_string()
    } else {
        format!("{minutes}m")
    }
}

/// Token counts with thousands separators and cost.
pub fn format_tokens(tokens_in: u64, tokens_out: u64, cost: Option<f64>) -> String {
    let token_str = format!(
        "{} in / {} out",
        group_thousands(tokens_in),
        group_thousands(tokens_out)
    );
    match cost {
        Some(cost) => format!("{token_str} | ${cost:.2}"),
        None => token_str,
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Reads and writes per-feature tracking records.
pub struct TrackingStore {
    plans_dir: PathBuf,
}

impl TrackingStore {
    /// Create a store over the configured plans directory.
    pub fn new(config: &GateConfig) -> Self {
        Self {
            plans_dir: config.plans_dir(),
        }
    }

    /// Find the most recently started tracking record that has an active
    /// phase, with its path.
    pub fn find_active(&self) -> Option<(PathBuf, TrackingRecord)> {
        let mut candidates: Vec<(String, PathBuf, TrackingRecord)> = Vec::new();
        for entry in WalkDir::new(&self.plans_dir)
            .max_depth(3)
            .into_iter()
            .flatten()
        {
            if entry.file_name() != std::ffi::OsStr::new(TRACKING_FILE) {
                continue;
            }
            let raw = match fs::read_to_string(entry.path()) {
                Ok(raw) => raw,
                Err(_) => continue,
            };
            let record: TrackingRecord = match serde_json::from_str(&raw) {
                Ok(record) => record,
                Err(_) => continue,
            };
            if let Some(started) = record.active_started() {
                candidates.push((started.to_string(), entry.path().to_path_buf(), record));
            }
        }
        candidates.sort_by(|a, b| b.0.cmp(&a.0));
        candidates
            .into_iter()
            .next()
            .map(|(_, path, record)| (path, record))
    }

    /// Persist a tracking record.
    pub fn save(&self, path: &Path, record: &TrackingRecord) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(record)?)?;
        Ok(())
    }

    /// Start timing a planning phase for a drafted description.
    pub fn start_plan(&self, description: &str) -> Result<PathBuf> {
        let slug = slugify(description);
        let path = self
            .plans_dir
            .join(DRAFTS_DIR)
            .join(slug)
            .join(TRACKING_FILE);
        let record = TrackingRecord {
            description: Some(description.to_string()),
            feature: None,
            plan: Some(PhaseRecord::started_now()),
            implement: None,
        };
        self.save(&path, &record)?;
        Ok(path)
    }

    /// Start timing an implementation phase, closing the plan phase if one
    /// is still open.
    pub fn start_implement(&self, feature: &str) -> Result<PathBuf> {
        let path = self.plans_dir.join(feature).join(TRACKING_FILE);
        let mut record = fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_else(|| TrackingRecord {
                feature: Some(feature.to_string()),
                ..TrackingRecord::default()
            });

        if let Some(plan) = record.plan.as_mut() {
            if plan.is_active() {
                plan.ended = Some(now_iso());
            }
        }
        record.implement = Some(PhaseRecord::started_now());
        self.save(&path, &record)?;
        Ok(path)
    }

    /// Handle a stop event: fold transcript usage into the active phase and
    /// build the metrics display.
    pub fn on_stop(&self, event: &HookEvent) -> Decision {
        if event.stop_hook_active {
            return Decision::approve();
        }
        let (path, mut record) = match self.find_active() {
            Some(found) => found,
            None => return Decision::approve(),
        };

        if let Some(transcript) = &event.transcript_path {
            let totals = parse_transcript(Path::new(transcript));
            if let Some(phase) = record.active_phase_mut() {
                phase.absorb(&totals);
            }
            if let Err(err) = self.save(&path, &record) {
                warn!(%err, "failed to persist tracking record");
            }
        }

        match build_display(&record) {
            Some(display) => Decision::approve_with(display),
            None => Decision::approve(),
        }
    }

    /// Handle a submitted prompt: bootstrap phase timers on recognized
    /// workflow commands. Always approves.
    pub fn on_prompt(&self, event: &HookEvent) -> Decision {
        let prompt = match &event.prompt {
            Some(prompt) => prompt.trim(),
            None => return Decision::approve(),
        };

        if let Some(caps) = PLAN_CMD_RE.captures(prompt) {
            let description = caps[1].trim();
            if !description.is_empty() {
                if let Err(err) = self.start_plan(description) {
                    warn!(%err, "failed to start plan tracking");
                }
            }
        } else if let Some(caps) = IMPLEMENT_CMD_RE.captures(prompt) {
            let feature = caps[1].trim();
            if !feature.is_empty() {
                if let Err(err) = self.start_implement(feature) {
                    warn!(%err, "failed to start implement tracking");
                }
            }
        }

        Decision::approve()
    }
}

/// Build the metrics display, or None when no phase has started.
pub fn build_display(record: &TrackingRecord) -> Option<String> {
    let name = record
        .feature
        .clone()
        .or_else(|| {
            record
                .description
                .as_ref()
                .map(|desc| desc.chars().take(30).collect())
        })
        .unwrap_or_else(|| "unknown".to_string());

    let plan = record.plan.as_ref();
    let implement = record.implement.as_ref();
    let mut lines = Vec::new();

    if let Some(implement) = implement {
        lines.push(format!("⏱  {name}"));

        if let Some(plan) = plan {
            let duration = format_duration(&plan.started, plan.ended.as_deref());
            let tokens = format_tokens(plan.total_input(), plan.tokens_out, Some(plan.cost()));
            lines.push(format!("    Planning:     {duration:>8} | {tokens}"));
        }

        let duration = format_duration(&implement.started, implement.ended.as_deref());
        let tokens = format_tokens(
            implement.total_input(),
            implement.tokens_out,
            Some(implement.cost()),
        );
        lines.push(format!("    Implementing: {duration:>8} | {tokens}"));

        let total_in = plan.map_or(0, PhaseRecord::total_input) + implement.total_input();
        let total_out = plan.map_or(0, |p| p.tokens_out) + implement.tokens_out;
        let total_cost = plan.map_or(0.0, PhaseRecord::cost) + implement.cost();
        lines.push(format!("    {}", "-".repeat(48)));
        lines.push(format!(
            "    Total: {}",
            format_tokens(total_in, total_out, Some(total_cost))
        ));
    } else if let Some(plan) = plan {
        let duration = format_duration(&plan.started, plan.ended.as_deref());
        let tokens = format_tokens(plan.total_input(), plan.tokens_out, Some(plan.cost()));
        lines.push(format!("⏱  Planning: {duration} | {tokens}"));
    }

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> TrackingStore {
        TrackingStore::new(&GateConfig::new(dir.path()))
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Add OAuth login!"), "add-oauth-login");
        assert_eq!(slugify("  spaces   everywhere  "), "spaces-everywhere");
        assert_eq!(slugify("x".repeat(80).as_str()).len(), SLUG_MAX_LEN);
    }

    #[test]
    fn test_pricing_partial_match() {
        let totals = TokenTotals {
            input_tokens: 1_000_000,
            output_tokens: 0,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            model: Some("claude-opus-4-20250514".to_string()),
        };
        assert!((totals.cost() - 15.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_model_uses_default_pricing() {
        let totals = TokenTotals {
            input_tokens: 0,
            output_tokens: 2_000_000,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            model: Some("experimental-1".to_string()),
        };
        assert!((totals.cost() - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_transcript_sums_usage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("transcript.jsonl");
        fs::write(
            &path,
            concat!(
                r#"{"message":{"model":"claude-sonnet-4","usage":{"input_tokens":100,"output_tokens":20,"cache_read_input_tokens":50}}}"#,
                "\n",
                "not json\n",
                r#"{"usage":{"input_tokens":10,"output_tokens":5,"cache_creation_input_tokens":7}}"#,
                "\n",
            ),
        )
        .unwrap();

        let totals = parse_transcript(&path);
        assert_eq!(totals.input_tokens, 110);
        assert_eq!(totals.output_tokens, 25);
        assert_eq!(totals.cache_read_tokens, 50);
        assert_eq!(totals.cache_creation_tokens, 7);
        assert_eq!(totals.model.as_deref(), Some("claude-sonnet-4"));
    }

    #[test]
    fn test_parse_transcript_missing_file() {
        let totals = parse_transcript(Path::new("/nonexistent/transcript.jsonl"));
        assert_eq!(totals.input_tokens, 0);
        assert!(totals.model.is_none());
    }

    #[test]
    fn test_format_duration() {
        let start = "2026-01-01T10:00:00Z";
        assert_eq!(format_duration(start, Some("2026-01-01T10:00:30Z")), "<1m");
        assert_eq!(format_duration(start, Some("2026-01-01T10:05:00Z")), "5m");
        assert_eq!(format_duration(start, Some("2026-01-01T12:30:00Z")), "2h 30m");
        assert_eq!(format_duration("garbage", None), "?");
    }

    #[test]
    fn test_format_tokens() {
        assert_eq!(format_tokens(1234567, 890, None), "1,234,567 in / 890 out");
        assert_eq!(
            format_tokens(1000, 2000, Some(1.5)),
            "1,000 in / 2,000 out | $1.50"
        );
    }

    #[test]
    fn test_start_plan_creates_draft_tracking() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.start_plan("Add OAuth login").unwrap();

        let (path, record) = store.find_active().expect("draft tracking");
        assert!(path.ends_with("_drafts/add-oauth-login/.tracking.json"));
        assert!(record.plan.as_ref().unwrap().is_active());
    }

    #[test]
    fn test_find_active_prefers_most_recently_started() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let stale = TrackingRecord {
            description: Some("old draft".to_string()),
            plan: Some(PhaseRecord {
                started: "2026-01-01T00:00:00Z".to_string(),
                ..PhaseRecord::default()
            }),
            ..TrackingRecord::default()
        };
        store
            .save(
                &dir.path().join("docs/plans/_drafts/old-draft/.tracking.json"),
                &stale,
            )
            .unwrap();
        store.start_implement("oauth-login").unwrap();

        let (path, record) = store.find_active().expect("implement tracking");
        assert!(path.ends_with("oauth-login/.tracking.json"));
        assert!(record.implement.as_ref().unwrap().is_active());
    }

    #[test]
    fn test_start_implement_closes_plan_phase() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let path = dir.path().join("docs/plans/auth/.tracking.json");
        let record = TrackingRecord {
            feature: Some("auth".to_string()),
            plan: Some(PhaseRecord::started_now()),
            ..TrackingRecord::default()
        };
        store.save(&path, &record).unwrap();

        store.start_implement("auth").unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        let record: TrackingRecord = serde_json::from_str(&raw).unwrap();
        assert!(record.plan.as_ref().unwrap().ended.is_some());
        assert!(record.implement.as_ref().unwrap().is_active());
    }

    #[test]
    fn test_on_prompt_recognizes_commands() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let event = HookEvent {
            prompt: Some("/shipgate:plan \"Add OAuth login\"".to_string()),
            ..HookEvent::default()
        };
        assert!(store.on_prompt(&event).is_approve());
        assert!(dir
            .path()
            .join("docs/plans/_drafts/add-oauth-login/.tracking.json")
            .exists());

        let event = HookEvent {
            prompt: Some("/implement oauth-login".to_string()),
            ..HookEvent::default()
        };
        assert!(store.on_prompt(&event).is_approve());
        assert!(dir
            .path()
            .join("docs/plans/oauth-login/.tracking.json")
            .exists());
    }

    #[test]
    fn test_on_prompt_ignores_ordinary_prompts() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let event = HookEvent {
            prompt: Some("please fix the tests".to_string()),
            ..HookEvent::default()
        };
        assert!(store.on_prompt(&event).is_approve());
        assert!(!dir.path().join("docs/plans").exists());
    }

    #[test]
    fn test_on_stop_updates_active_phase() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.start_implement("auth").unwrap();

        let transcript = dir.path().join("transcript.jsonl");
        fs::write(
            &transcript,
            r#"{"usage":{"input_tokens":42,"output_tokens":7}}"#,
        )
        .unwrap();

        let event = HookEvent {
            transcript_path: Some(transcript.to_string_lossy().into_owned()),
            ..HookEvent::default()
        };
        let decision = store.on_stop(&event);
        assert!(decision.is_approve());

        let raw = fs::read_to_string(dir.path().join("docs/plans/auth/.tracking.json")).unwrap();
        let record: TrackingRecord = serde_json::from_str(&raw).unwrap();
        let implement = record.implement.unwrap();
        assert_eq!(implement.tokens_in, 42);
        assert_eq!(implement.tokens_out, 7);
    }

    #[test]
    fn test_on_stop_without_tracking() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.on_stop(&HookEvent::default()), Decision::approve());
    }

    #[test]
    fn test_build_display_both_phases() {
        let record = TrackingRecord {
            feature: Some("auth".to_string()),
            plan: Some(PhaseRecord {
                started: "2026-01-01T10:00:00Z".to_string(),
                ended: Some("2026-01-01T10:20:00Z".to_string()),
                tokens_in: 1000,
                tokens_out: 500,
                ..PhaseRecord::default()
            }),
            implement: Some(PhaseRecord {
                started: "2026-01-01T10:20:00Z".to_string(),
                ended: Some("2026-01-01T11:20:00Z".to_string()),
                tokens_in: 2000,
                tokens_out: 1500,
                ..PhaseRecord::default()
            }),
            ..TrackingRecord::default()
        };
        let display = build_display(&record).unwrap();
        assert!(display.contains("auth"));
        assert!(display.contains("Planning:"));
        assert!(display.contains("Implementing:"));
        assert!(display.contains("Total:"));
        assert!(display.contains("1h 0m"));
    }

    #[test]
    fn test_build_display_empty_record() {
        assert!(build_display(&TrackingRecord::default()).is_none());
    }
}
