//! End-to-end gate flows against a temporary working tree.

use chrono::Utc;
use shipgate_core::{Decision, Gate, GateConfig, HookEvent};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn init_repo(root: &Path) {
    let run = |args: &[&str]| {
        let output = std::process::Command::new("git")
            .args(args)
            .current_dir(root)
            .output()
            .expect("git available");
        assert!(output.status.success(), "git {args:?} failed");
    };
    run(&["init", "-q"]);
    run(&["config", "user.email", "gate@example.com"]);
    run(&["config", "user.name", "gate"]);
}

fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn write_marker(root: &Path) {
    write_file(
        root,
        ".shipgate/chunk-complete.json",
        &format!(
            r#"{{"chunk":"1A","feature":"auth","phase":"implement","description":"add session cookie","timestamp":"{}"}}"#,
            Utc::now().to_rfc3339()
        ),
    );
}

const MEMORY: &str = "\
# auth

**Status:** in-progress

| Chunk | Status | Notes |
|-------|--------|-------|
| 1A | pending | |

## Session Log
";

#[tokio::test]
async fn chunk_success_updates_everything() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    init_repo(root);
    write_file(root, "docs/plans/auth/MEMORY.md", MEMORY);
    write_file(root, "src/cookie.rs", "// session cookie\n");
    write_marker(root);
    fs::write(root.join(".shipgate/retries"), "2").unwrap();

    let config = GateConfig::new(root)
        .with_test_command(vec!["sh".into(), "-c".into(), "exit 0".into()]);
    let decision = Gate::new(config).on_chunk_complete(&HookEvent::default()).await;

    match decision {
        Decision::Approve { system_message } => {
            let message = system_message.expect("approval message");
            assert!(message.contains("Chunk 1A complete"), "{message}");
        }
        Decision::Block { reason } => panic!("expected approve, got block: {reason}"),
    }

    // Ledger reset and marker consumed.
    assert!(!root.join(".shipgate/retries").exists());
    assert!(!root.join(".shipgate/chunk-complete.json").exists());

    // Progress log: row rewritten, entry appended.
    let memory = fs::read_to_string(root.join("docs/plans/auth/MEMORY.md")).unwrap();
    assert!(memory.contains("| 1A | complete | |"));
    assert!(memory.contains("Chunk 1A Auto-Commit"));
    assert!(memory.contains("**Completed:** add session cookie"));

    // Exactly one commit landed, carrying the chunk message.
    let log = std::process::Command::new("git")
        .args(["log", "--pretty=%s"])
        .current_dir(root)
        .output()
        .unwrap();
    let subjects = String::from_utf8_lossy(&log.stdout);
    assert_eq!(subjects.lines().count(), 1);
    assert!(subjects.contains("feat(auth): chunk 1A - add session cookie"));
}

#[tokio::test]
async fn no_marker_means_no_side_effects() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write_file(root, "docs/plans/auth/MEMORY.md", MEMORY);

    let config = GateConfig::new(root)
        .with_test_command(vec!["sh".into(), "-c".into(), "exit 1".into()]);
    let decision = Gate::new(config).on_chunk_complete(&HookEvent::default()).await;

    assert_eq!(decision, Decision::approve());
    assert!(!root.join(".shipgate/retries").exists());
    let memory = fs::read_to_string(root.join("docs/plans/auth/MEMORY.md")).unwrap();
    assert_eq!(memory, MEMORY);
}

#[tokio::test]
async fn chunk_retries_then_fails_open() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let config = GateConfig::new(root)
        .with_test_command(vec!["sh".into(), "-c".into(), "echo broken; exit 1".into()]);
    let gate = Gate::new(config);

    // Three failing validations block and count up.
    for expected in 1..=3u32 {
        write_marker(root);
        let decision = gate.on_chunk_complete(&HookEvent::default()).await;
        assert!(!decision.is_approve(), "attempt {expected} should block");
        let raw = fs::read_to_string(root.join(".shipgate/retries")).unwrap();
        assert_eq!(raw.trim(), expected.to_string());
    }

    // The budget is spent: the fourth check approves regardless and resets.
    write_marker(root);
    let decision = gate.on_chunk_complete(&HookEvent::default()).await;
    match decision {
        Decision::Approve { system_message } => {
            assert!(system_message.unwrap().contains("manual investigation"));
        }
        Decision::Block { reason } => panic!("expected fail-open, got: {reason}"),
    }
    assert!(!root.join(".shipgate/retries").exists());
    assert!(!root.join(".shipgate/chunk-complete.json").exists());
}

#[tokio::test]
async fn stop_blocks_on_missing_ship_criteria() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write_file(
        root,
        "docs/plans/login-feature/PLAN.md",
        "## Ship Criteria\n- [ ] Support password login\n- [ ] Support OAuth login\n",
    );
    write_file(
        root,
        "docs/plans/login-feature/MEMORY.md",
        "**Status:** in-progress\n\n- [x] Support password login implemented\n\n## Session Log\n",
    );

    let decision = Gate::new(GateConfig::new(root))
        .on_session_stop(&HookEvent::default())
        .await;

    match decision {
        Decision::Block { reason } => {
            assert!(reason.contains("1/2 criteria met"), "{reason}");
            assert!(reason.contains("Support OAuth login"));
            assert!(!reason.contains("- [ ] Support password login"));
            assert!(reason.contains("Attempt 1/3"));
        }
        Decision::Approve { .. } => panic!("expected block on missing criteria"),
    }
    let raw = fs::read_to_string(root.join(".shipgate/retries")).unwrap();
    assert_eq!(raw.trim(), "1");
}

#[tokio::test]
async fn stop_marks_feature_implemented_when_complete() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write_file(
        root,
        "docs/plans/login-feature/PLAN.md",
        "## Ship Criteria\n- [ ] Support password login\n",
    );
    write_file(
        root,
        "docs/plans/login-feature/MEMORY.md",
        "**Status:** in-progress\n\nall phases complete\n\n- [x] Support password login implemented\n\n## Session Log\n",
    );
    write_file(
        root,
        ".shipgate/graph.yaml",
        "login-feature:\n  status: in-progress\n",
    );

    let decision = Gate::new(GateConfig::new(root))
        .on_session_stop(&HookEvent::default())
        .await;

    match decision {
        Decision::Approve { system_message } => {
            let message = system_message.expect("approval message");
            assert!(message.contains("marked implemented"), "{message}");
        }
        Decision::Block { reason } => panic!("expected approve, got: {reason}"),
    }

    let graph = fs::read_to_string(root.join(".shipgate/graph.yaml")).unwrap();
    assert!(graph.contains("status: implemented"));
    let memory = fs::read_to_string(root.join("docs/plans/login-feature/MEMORY.md")).unwrap();
    assert!(memory.contains("Feature Review"));
}
