//! Project check detection and bounded execution.
//!
//! The validator inspects the working tree for recognizable project markers,
//! runs the matching test invocation with a timeout, and normalizes the
//! outcome. A project it cannot recognize passes vacuously: the gate never
//! blocks work it has no way to check.

use crate::config::GateConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Maximum characters of check output embedded per check in a block reason.
const MAX_OUTPUT_CHARS: usize = 500;

/// A check invocation to run from the working-tree root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl TestCommand {
    fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }

    /// Build from a whitespace-split argv, e.g. a configured override.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

/// Normalized result of one executed check.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub name: String,
    pub passed: bool,
    pub output: String,
}

impl CheckOutcome {
    fn failed(name: &str, output: String) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            output,
        }
    }
}

/// Detect the project's test invocation from well-known manifest files.
pub fn detect_command(root: &Path) -> Option<TestCommand> {
    if root.join("package.json").exists() {
        return Some(TestCommand::new("npm", &["test"]));
    }
    if root.join("pyproject.toml").exists() || root.join("setup.py").exists() {
        return Some(TestCommand::new("pytest", &[]));
    }
    if root.join("Cargo.toml").exists() {
        return Some(TestCommand::new("cargo", &["test"]));
    }
    // Unknown project type: nothing to validate.
    None
}

/// Runs the detected (or configured) check command.
pub struct Validator {
    root: PathBuf,
    timeout: Duration,
    override_command: Option<Vec<String>>,
}

impl Validator {
    /// Create a validator for the configured working tree.
    pub fn new(config: &GateConfig) -> Self {
        Self {
            root: config.root().to_path_buf(),
            timeout: config.validator_timeout,
            override_command: config.test_command.clone(),
        }
    }

    /// The check command that would run, if any. A configured override wins
    /// over project detection.
    pub fn detect(&self) -> Option<TestCommand> {
        if let Some(argv) = &self.override_command {
            if let Some(cmd) = TestCommand::from_argv(argv) {
                return Some(cmd);
            }
        }
        detect_command(&self.root)
    }

    /// Run the project's checks. No recognizable command is a vacuous pass.
    pub async fn run(&self) -> (bool, Vec<CheckOutcome>) {
        match self.detect() {
            Some(cmd) => self.run_command(&cmd).await,
            None => (true, Vec::new()),
        }
    }

    /// Execute one check command with the configured timeout, capturing
    /// combined stdout and stderr. Timeouts and spawn failures are reported
    /// as failed outcomes, never as errors.
    pub async fn run_command(&self, cmd: &TestCommand) -> (bool, Vec<CheckOutcome>) {
        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => {
                let passed = output.status.success();
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                (
                    passed,
                    vec![CheckOutcome {
                        name: "test".to_string(),
                        passed,
                        output: combined,
                    }],
                )
            }
            Ok(Err(err)) => (
                false,
                vec![CheckOutcome::failed(
                    "test",
                    format!("Error running tests: {err}"),
                )],
            ),
            Err(_) => (
                false,
                vec![CheckOutcome::failed(
                    "test",
                    format!("Tests timed out after {} seconds", self.timeout.as_secs()),
                )],
            ),
        }
    }
}

/// Format check results into a block reason with actionable feedback.
pub fn format_block_reason(results: &[CheckOutcome]) -> String {
    let mut lines = vec!["Quality checks failed:\n".to_string()];
    for result in results {
        let status = if result.passed { "[PASS]" } else { "[FAIL]" };
        lines.push(format!("{status} {}", result.name));
        if !result.passed {
            lines.push(format!("\nOutput:\n{}", truncate_output(&result.output)));
        }
    }
    lines.push("\nPlease fix the failing checks.".to_string());
    lines.join("\n")
}

/// Truncate check output to keep the block message readable.
fn truncate_output(output: &str) -> String {
    if output.chars().count() <= MAX_OUTPUT_CHARS {
        return output.to_string();
    }
    let cut: String = output.chars().take(MAX_OUTPUT_CHARS).collect();
    format!("{cut}\n... (truncated)")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn validator_in(root: &Path, timeout: Duration) -> Validator {
        Validator::new(&GateConfig::new(root).with_validator_timeout(timeout))
    }

    #[test]
    fn test_detect_node_project() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        let cmd = detect_command(dir.path()).unwrap();
        assert_eq!(cmd.program, "npm");
        assert_eq!(cmd.args, vec!["test"]);
    }

    #[test]
    fn test_detect_python_project() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("pyproject.toml"), "").unwrap();
        assert_eq!(detect_command(dir.path()).unwrap().program, "pytest");
    }

    #[test]
    fn test_detect_rust_project() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        assert_eq!(detect_command(dir.path()).unwrap().program, "cargo");
    }

    #[test]
    fn test_detect_unknown_project() {
        let dir = TempDir::new().unwrap();
        assert!(detect_command(dir.path()).is_none());
    }

    #[test]
    fn test_override_wins_over_detection() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        let config = GateConfig::new(dir.path()).with_test_command(vec!["true".into()]);
        let validator = Validator::new(&config);
        assert_eq!(validator.detect().unwrap().program, "true");
    }

    #[tokio::test]
    async fn test_run_without_command_is_vacuous_pass() {
        let dir = TempDir::new().unwrap();
        let validator = validator_in(dir.path(), Duration::from_secs(5));
        let (passed, results) = validator.run().await;
        assert!(passed);
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_run_command_pass() {
        let dir = TempDir::new().unwrap();
        let validator = validator_in(dir.path(), Duration::from_secs(5));
        let cmd = TestCommand::new("sh", &["-c", "echo ok"]);
        let (passed, results) = validator.run_command(&cmd).await;
        assert!(passed);
        assert!(results[0].passed);
        assert!(results[0].output.contains("ok"));
    }

    #[tokio::test]
    async fn test_run_command_failure_captures_output() {
        let dir = TempDir::new().unwrap();
        let validator = validator_in(dir.path(), Duration::from_secs(5));
        let cmd = TestCommand::new("sh", &["-c", "echo boom >&2; exit 1"]);
        let (passed, results) = validator.run_command(&cmd).await;
        assert!(!passed);
        assert!(!results[0].passed);
        assert!(results[0].output.contains("boom"));
    }

    #[tokio::test]
    async fn test_run_command_timeout() {
        let dir = TempDir::new().unwrap();
        let validator = validator_in(dir.path(), Duration::from_millis(100));
        let cmd = TestCommand::new("sleep", &["10"]);
        let (passed, results) = validator.run_command(&cmd).await;
        assert!(!passed);
        assert!(results[0].output.contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_program_is_failed_outcome() {
        let dir = TempDir::new().unwrap();
        let validator = validator_in(dir.path(), Duration::from_secs(5));
        let cmd = TestCommand::new("definitely-not-a-real-binary", &[]);
        let (passed, results) = validator.run_command(&cmd).await;
        assert!(!passed);
        assert!(results[0].output.contains("Error running tests"));
    }

    #[test]
    fn test_block_reason_truncates_long_output() {
        let results = vec![CheckOutcome::failed("test", "x".repeat(600))];
        let reason = format_block_reason(&results);
        assert!(reason.contains("[FAIL] test"));
        assert!(reason.contains("... (truncated)"));
        assert!(reason.contains("Please fix the failing checks."));
        // 500 kept chars plus framing, not the whole 600.
        assert!(!reason.contains(&"x".repeat(501)));
    }

    #[test]
    fn test_block_reason_lists_passing_checks_without_output() {
        let results = vec![
            CheckOutcome {
                name: "test".into(),
                passed: true,
                output: "all green".into(),
            },
            CheckOutcome::failed("ship-criteria", "missing".into()),
        ];
        let reason = format_block_reason(&results);
        assert!(reason.contains("[PASS] test"));
        assert!(!reason.contains("all green"));
        assert!(reason.contains("[FAIL] ship-criteria"));
    }
}
