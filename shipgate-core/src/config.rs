//! Gate configuration: explicit root and resource paths passed to every
//! component at construction.
//!
//! # Configuration Priority
//!
//! 1. Builder overrides
//! 2. Environment variables (SHIPGATE_* prefix)
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `SHIPGATE_MAX_RETRIES` → max consecutive validation failures before the
//!   gate fails open (default 3)
//! - `SHIPGATE_TEST_TIMEOUT` → validation timeout in seconds (default 120)
//! - `SHIPGATE_TEST_COMMAND` → explicit check command, overriding project
//!   detection (whitespace-separated)

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory under the working-tree root holding gate-private state.
pub const STATE_DIR: &str = ".shipgate";

/// Marker file signalling a chunk believes itself finished.
const MARKER_FILE: &str = "chunk-complete.json";

/// Plain-integer consecutive-failure counter.
const RETRY_FILE: &str = "retries";

/// Advisory lock co-located with the retry counter.
const RETRY_LOCK_FILE: &str = "retries.lock";

/// Feature status graph, shared with surrounding tooling.
const GRAPH_FILE: &str = "graph.yaml";

/// Directory of per-feature planning documents.
const PLANS_DIR: &str = "docs/plans";

/// Default maximum consecutive validation failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Markers older than this are stale and never acted upon.
pub const DEFAULT_MARKER_MAX_AGE_SECS: u64 = 300;

/// Default validation timeout.
pub const DEFAULT_VALIDATOR_TIMEOUT_SECS: u64 = 120;

/// Default timeout for publisher git calls.
pub const DEFAULT_PUBLISH_TIMEOUT_SECS: u64 = 30;

/// Explicit configuration for all gate components.
///
/// Every persisted resource is addressed relative to `root` so isolated test
/// runs can point the whole gate at a temporary working tree.
#[derive(Debug, Clone)]
pub struct GateConfig {
    root: PathBuf,
    /// Maximum consecutive validation failures before failing open.
    pub max_retries: u32,
    /// Staleness threshold for completion markers.
    pub marker_max_age: Duration,
    /// Timeout for the validation subprocess.
    pub validator_timeout: Duration,
    /// Timeout for publisher git subprocesses.
    pub publish_timeout: Duration,
    /// Explicit check command, bypassing project detection.
    pub test_command: Option<Vec<String>>,
}

impl GateConfig {
    /// Create a configuration rooted at the given working tree, applying
    /// environment variable overrides.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let mut config = Self {
            root: root.into(),
            max_retries: DEFAULT_MAX_RETRIES,
            marker_max_age: Duration::from_secs(DEFAULT_MARKER_MAX_AGE_SECS),
            validator_timeout: Duration::from_secs(DEFAULT_VALIDATOR_TIMEOUT_SECS),
            publish_timeout: Duration::from_secs(DEFAULT_PUBLISH_TIMEOUT_SECS),
            test_command: None,
        };
        config.apply_env();
        config
    }

    /// Working-tree root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Gate-private state directory.
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    /// Path of the chunk-completion marker file.
    pub fn marker_path(&self) -> PathBuf {
        self.state_dir().join(MARKER_FILE)
    }

    /// Path of the retry counter file.
    pub fn retry_path(&self) -> PathBuf {
        self.state_dir().join(RETRY_FILE)
    }

    /// Path of the retry counter's lock file.
    pub fn retry_lock_path(&self) -> PathBuf {
        self.state_dir().join(RETRY_LOCK_FILE)
    }

    /// Path of the feature status graph.
    pub fn graph_path(&self) -> PathBuf {
        self.state_dir().join(GRAPH_FILE)
    }

    /// Directory of per-feature planning documents.
    pub fn plans_dir(&self) -> PathBuf {
        self.root.join(PLANS_DIR)
    }

    /// Override the retry budget.
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Override the marker staleness threshold.
    pub fn with_marker_max_age(mut self, age: Duration) -> Self {
        self.marker_max_age = age;
        self
    }

    /// Override the validation timeout.
    pub fn with_validator_timeout(mut self, timeout: Duration) -> Self {
        self.validator_timeout = timeout;
        self
    }

    /// Override the check command, bypassing project detection.
    pub fn with_test_command(mut self, command: Vec<String>) -> Self {
        self.test_command = Some(command);
        self
    }

    fn apply_env(&mut self) {
        if let Ok(raw) = std::env::var("SHIPGATE_MAX_RETRIES") {
            if let Ok(max) = raw.trim().parse() {
                self.max_retries = max;
            }
        }
        if let Ok(raw) = std::env::var("SHIPGATE_TEST_TIMEOUT") {
            if let Ok(secs) = raw.trim().parse() {
                self.validator_timeout = Duration::from_secs(secs);
            }
        }
        if let Ok(raw) = std::env::var("SHIPGATE_TEST_COMMAND") {
            let parts: Vec<String> = raw.split_whitespace().map(String::from).collect();
            if !parts.is_empty() {
                self.test_command = Some(parts);
            }
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::new(".")
    }
}
