//! Integration tests for the rpi CLI.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn rpi() -> Command {
    let mut cmd = cargo_bin_cmd!("rpi");
    cmd.env_remove("RUST_LOG")
        .env_remove("RPI_RUNTIME")
        .env_remove("RPI_RUNTIME_COMMAND")
        .env_remove("RPI_POLICY_MODE");
    cmd
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        rpi()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("phased"))
            .stdout(predicate::str::contains("loop"))
            .stdout(predicate::str::contains("status"));
    }

    #[test]
    fn test_version() {
        rpi().arg("--version").assert().success();
    }

    #[test]
    fn test_phased_help_lists_engine_flags() {
        rpi()
            .args(["phased", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--from"))
            .stdout(predicate::str::contains("--max-retries"))
            .stdout(predicate::str::contains("--policy-mode"));
    }
}

mod phased {
    use super::*;

    #[test]
    fn test_dry_run_prints_prompts_and_writes_nothing() {
        let dir = create_temp_project();

        rpi()
            .current_dir(dir.path())
            .args(["phased", "add rate limiting", "--dry-run", "--runtime", "direct"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[dry-run]"))
            .stdout(predicate::str::contains("add rate limiting"))
            .stdout(predicate::str::contains("/crank"));

        assert!(!dir.path().join(".agents").exists());
    }

    #[test]
    fn test_missing_goal_fails() {
        let dir = create_temp_project();
        rpi()
            .current_dir(dir.path())
            .args(["phased", "--dry-run"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("goal is required"));
    }

    #[test]
    fn test_resume_without_prior_epic_fails() {
        let dir = create_temp_project();
        rpi()
            .current_dir(dir.path())
            .args(["phased", "--from", "implementation", "--dry-run"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("no epic ID in prior state"));
    }

    #[test]
    fn test_unknown_phase_name_fails() {
        let dir = create_temp_project();
        rpi()
            .current_dir(dir.path())
            .args(["phased", "goal", "--from", "deploy"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown phase 'deploy'"));
    }

    #[test]
    fn test_invalid_policy_mode_is_rejected_before_side_effects() {
        let dir = create_temp_project();
        rpi()
            .current_dir(dir.path())
            .args(["phased", "goal", "--policy-mode", "strict"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("off|observe|enforce"));
        assert!(!dir.path().join(".agents").exists());
    }

    #[test]
    fn test_runtime_failure_is_recorded_as_failed_run() {
        let dir = create_temp_project();
        let runtime = dir.path().join("failing-agent");
        fs::write(&runtime, "#!/bin/sh\necho 'agent crashed' >&2\nexit 7\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&runtime, fs::Permissions::from_mode(0o755)).unwrap();
        }

        rpi()
            .current_dir(dir.path())
            .args(["phased", "goal", "--runtime", "direct", "--runtime-cmd"])
            .arg(&runtime)
            .assert()
            .failure();

        let state = fs::read_to_string(dir.path().join(".agents/rpi/phased-state.json")).unwrap();
        let state: serde_json::Value = serde_json::from_str(&state).unwrap();
        assert_eq!(state["terminal_status"], "failed");
        assert!(
            state["terminal_reason"]
                .as_str()
                .unwrap()
                .starts_with("discovery:")
        );

        let log =
            fs::read_to_string(dir.path().join(".agents/rpi/phased-orchestration.log")).unwrap();
        assert!(log.contains("FATAL:"));
    }
}

mod supervisor_loop {
    use super::*;

    #[test]
    fn test_invalid_gate_policy_is_rejected() {
        let dir = create_temp_project();
        rpi()
            .current_dir(dir.path())
            .args(["loop", "--gate-policy", "sometimes"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("off|best-effort|required"));
        assert!(!dir.path().join(".agents").exists());
    }

    #[test]
    fn test_negative_cycle_retries_is_rejected() {
        let dir = create_temp_project();
        rpi()
            .current_dir(dir.path())
            .args(["loop", "--cycle-retries=-1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("cycle-retries must be >= 0"));
    }

    #[test]
    fn test_empty_queue_stops_cleanly() {
        let dir = create_temp_project();
        rpi()
            .current_dir(dir.path())
            .arg("loop")
            .assert()
            .success()
            .stdout(predicate::str::contains("No unconsumed work in queue"));
    }

    #[test]
    fn test_dry_run_shows_queued_goal_without_consuming() {
        let dir = create_temp_project();
        let rpi_dir = dir.path().join(".agents/rpi");
        fs::create_dir_all(&rpi_dir).unwrap();
        let entry = r#"{"source_epic":"ag-1","items":[{"title":"tighten auth","severity":"high"}],"consumed":false}"#;
        fs::write(rpi_dir.join("next-work.jsonl"), format!("{}\n", entry)).unwrap();

        rpi()
            .current_dir(dir.path())
            .args(["loop", "--dry-run", "--supervisor"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Would run phased engine for: \"tighten auth\""));

        let queue = fs::read_to_string(rpi_dir.join("next-work.jsonl")).unwrap();
        assert_eq!(queue.trim(), entry);
        assert!(!rpi_dir.join("supervisor.lock").exists());
    }

    #[test]
    fn test_kill_switch_stops_loop() {
        let dir = create_temp_project();
        let rpi_dir = dir.path().join(".agents/rpi");
        fs::create_dir_all(&rpi_dir).unwrap();
        fs::write(rpi_dir.join("KILL"), "").unwrap();

        rpi()
            .current_dir(dir.path())
            .args(["loop", "some goal"])
            .assert()
            .success()
            .stderr(predicate::str::contains("Kill switch present"));
    }
}

mod status {
    use super::*;

    #[test]
    fn test_status_without_state() {
        let dir = create_temp_project();
        rpi()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("No phased run found"));
    }

    #[test]
    fn test_status_reports_run() {
        let dir = create_temp_project();
        let rpi_dir = dir.path().join(".agents/rpi");
        fs::create_dir_all(rpi_dir.join("runs/a1b2c3d4e5f6")).unwrap();
        fs::write(
            rpi_dir.join("phased-state.json"),
            r#"{
  "schema_version": 1,
  "run_id": "a1b2c3d4e5f6",
  "goal": "add auth",
  "epic_id": "ag-abc",
  "phase": 2,
  "start_phase": 1,
  "cycle": 1,
  "verdicts": {"pre_mortem": "PASS"},
  "attempts": {"phase_1": 1},
  "started_at": "2026-01-01T00:00:00Z"
}"#,
        )
        .unwrap();
        fs::write(
            rpi_dir.join("runs/a1b2c3d4e5f6/heartbeat.txt"),
            "2026-01-01T00:05:00Z\n",
        )
        .unwrap();

        rpi()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("a1b2c3d4e5f6"))
            .stdout(predicate::str::contains("add auth"))
            .stdout(predicate::str::contains("implementation"))
            .stdout(predicate::str::contains("pre_mortem = PASS"))
            .stdout(predicate::str::contains("Heartbeat:"));
    }
}
