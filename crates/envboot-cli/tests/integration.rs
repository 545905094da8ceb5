#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn envboot(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("envboot").unwrap();
    cmd.current_dir(dir.path())
        .env("ENVBOOT_ROOT", dir.path())
        .env_remove("RUST_LOG");
    cmd
}

fn project(manifest: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("envboot.yaml"), manifest).unwrap();
    dir
}

fn log(dir: &TempDir) -> Vec<String> {
    std::fs::read_to_string(dir.path().join("log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

fn record(dir: &TempDir, env: &str) -> serde_yaml::Value {
    let path = dir.path().join(format!(".envboot/records/{env}.yaml"));
    serde_yaml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

fn status_of(dir: &TempDir, env: &str, step: &str) -> Option<String> {
    record(dir, env)["steps"][step]["status"]
        .as_str()
        .map(str::to_string)
}

const MANIFEST: &str = r#"
version: 1
vars:
  greeting: hello
environments:
  lab:
    description: Toy lab environment
    steps:
      - id: fetch
        action: { kind: shell, run: "echo fetch >> log" }
      - id: build
        depends_on: [fetch]
        action: { kind: shell, run: "echo build-${greeting} >> log" }
      - id: verify
        depends_on: [build]
        action: { kind: shell, run: "test -f ok || exit 7; echo verify >> log" }
  other:
    steps:
      - id: only
        action: { kind: shell, run: "true" }
"#;

// ---------------------------------------------------------------------------
// envboot run
// ---------------------------------------------------------------------------

#[test]
fn run_executes_steps_in_order() {
    let dir = project(MANIFEST);
    std::fs::write(dir.path().join("ok"), b"").unwrap();

    envboot(&dir)
        .args(["run", "lab"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ready"));

    assert_eq!(log(&dir), ["fetch", "build-hello", "verify"]);
    assert_eq!(status_of(&dir, "lab", "verify").as_deref(), Some("succeeded"));
}

#[test]
fn second_run_is_a_no_op() {
    let dir = project(MANIFEST);
    std::fs::write(dir.path().join("ok"), b"").unwrap();

    envboot(&dir).args(["run", "lab"]).assert().success();
    envboot(&dir)
        .args(["run", "lab"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already succeeded"));

    assert_eq!(log(&dir).len(), 3);
}

#[test]
fn failing_step_exits_3_and_names_the_step() {
    let dir = project(MANIFEST);

    envboot(&dir)
        .args(["run", "lab"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("step 'verify' (#3) failed"))
        .stderr(predicate::str::contains("status 7"));

    assert_eq!(status_of(&dir, "lab", "build").as_deref(), Some("succeeded"));
    assert_eq!(status_of(&dir, "lab", "verify").as_deref(), Some("failed"));
}

#[test]
fn rerun_resumes_after_fixing_the_failure() {
    let dir = project(MANIFEST);
    envboot(&dir).args(["run", "lab"]).assert().code(3);

    std::fs::write(dir.path().join("ok"), b"").unwrap();
    envboot(&dir).args(["run", "lab"]).assert().success();

    assert_eq!(log(&dir), ["fetch", "build-hello", "verify"]);
}

#[test]
fn force_reruns_everything() {
    let dir = project(MANIFEST);
    std::fs::write(dir.path().join("ok"), b"").unwrap();

    envboot(&dir).args(["run", "lab"]).assert().success();
    envboot(&dir).args(["run", "lab", "--force"]).assert().success();

    assert_eq!(log(&dir).len(), 6);
}

#[test]
fn held_lock_exits_4_and_runs_nothing() {
    let dir = project(MANIFEST);
    let locks = dir.path().join(".envboot/locks");
    std::fs::create_dir_all(&locks).unwrap();
    std::fs::write(
        locks.join("lab.lock"),
        r#"{"pid":4242,"acquired_at":"2026-01-01T00:00:00Z"}"#,
    )
    .unwrap();

    envboot(&dir)
        .args(["run", "lab"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("pid 4242"));
    assert!(log(&dir).is_empty());
    assert!(locks.join("lab.lock").exists());

    envboot(&dir).args(["run", "other"]).assert().success();
}

#[test]
fn set_overrides_manifest_variable() {
    let dir = project(MANIFEST);
    std::fs::write(dir.path().join("ok"), b"").unwrap();

    envboot(&dir)
        .args(["run", "lab", "--set", "greeting=bonjour"])
        .assert()
        .success();

    assert!(log(&dir).contains(&"build-bonjour".to_string()));
}

#[test]
fn dry_run_touches_nothing() {
    let dir = project(MANIFEST);

    envboot(&dir)
        .args(["run", "lab", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("would execute"));

    assert!(log(&dir).is_empty());
    assert!(!dir.path().join(".envboot/records/lab.yaml").exists());
}

#[test]
fn steps_selection_runs_only_named_steps() {
    let dir = project(MANIFEST);

    envboot(&dir)
        .args(["run", "lab", "--steps", "fetch"])
        .assert()
        .success();
    assert_eq!(log(&dir), ["fetch"]);

    envboot(&dir)
        .args(["run", "lab", "--steps", "verify"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("build"));
}

#[test]
fn run_json_reports_each_step() {
    let dir = project(MANIFEST);
    std::fs::write(dir.path().join("ok"), b"").unwrap();

    let output = envboot(&dir)
        .args(["--json", "run", "lab"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_yaml::Value = serde_yaml::from_slice(&output.stdout).unwrap();
    assert_eq!(report["environment"].as_str(), Some("lab"));
    assert_eq!(report["outcome"]["result"].as_str(), Some("completed"));
    assert_eq!(report["steps"][0]["disposition"].as_str(), Some("executed"));
    assert_eq!(report["steps"][2]["id"].as_str(), Some("verify"));
}

#[test]
fn spawn_toggle_survives_forced_reruns() {
    let dir = project(
        r#"
vars:
  spawn_with: Urdf
  spawn_without: Usd
environments:
  lab:
    steps:
      - id: select-spawn-format
        action:
          kind: toggle
          file: unitree.py
          enable: 'spawn\s*=\s*Unitree${spawn_with}FileCfg\s*\('
          disable: 'spawn\s*=\s*Unitree${spawn_without}FileCfg\s*\('
"#,
    );
    let file = dir.path().join("unitree.py");
    std::fs::write(
        &file,
        "G1_CFG = UnitreeArticulationCfg(\n    # spawn=UnitreeUrdfFileCfg(\n    #     asset_path=\"g1.urdf\",\n    # ),\n    spawn=UnitreeUsdFileCfg(\n        usd_path=\"g1.usd\",\n    ),\n)\n",
    )
    .unwrap();

    envboot(&dir).args(["run", "lab"]).assert().success();
    let urdf = std::fs::read_to_string(&file).unwrap();
    assert!(urdf.contains("\n    spawn=UnitreeUrdfFileCfg(\n        asset_path=\"g1.urdf\",\n    ),\n"));
    assert!(urdf.contains("\n    # spawn=UnitreeUsdFileCfg(\n"));

    envboot(&dir).args(["run", "lab", "--force"]).assert().success();
    assert_eq!(std::fs::read_to_string(&file).unwrap(), urdf);

    envboot(&dir)
        .args(["run", "lab", "--force", "--set", "spawn_with=Usd", "--set", "spawn_without=Urdf"])
        .assert()
        .success();
    let usd = std::fs::read_to_string(&file).unwrap();
    assert!(usd.contains("\n    spawn=UnitreeUsdFileCfg(\n        usd_path=\"g1.usd\",\n    ),\n"));
    assert!(usd.contains("\n    # spawn=UnitreeUrdfFileCfg(\n"));
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[test]
fn unknown_environment_exits_2() {
    let dir = project(MANIFEST);
    envboot(&dir)
        .args(["run", "nope"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("nope"));
}

#[test]
fn missing_manifest_exits_2() {
    let dir = TempDir::new().unwrap();
    envboot(&dir)
        .args(["run", "lab"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("envboot.yaml"));
}

#[test]
fn unknown_dependency_runs_nothing() {
    let dir = project(
        r#"
environments:
  lab:
    steps:
      - id: a
        action: { kind: shell, run: "echo a >> log" }
      - id: b
        depends_on: [ghost]
        action: { kind: shell, run: "echo b >> log" }
"#,
    );

    envboot(&dir)
        .args(["run", "lab"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("ghost"));
    assert!(log(&dir).is_empty());
}

#[test]
fn malformed_manifest_exits_2() {
    let dir = project("environments: [not, a, mapping]\n");
    envboot(&dir)
        .arg("list")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid manifest"));
}

#[test]
fn bad_assignment_exits_2() {
    let dir = project(MANIFEST);
    envboot(&dir)
        .args(["run", "lab", "--set", "no-equals-sign"])
        .assert()
        .code(2);
}

// ---------------------------------------------------------------------------
// envboot status / reset
// ---------------------------------------------------------------------------

#[test]
fn status_lists_every_step() {
    let dir = project(MANIFEST);
    envboot(&dir).args(["run", "lab"]).assert().code(3);

    envboot(&dir)
        .args(["status", "lab"])
        .assert()
        .success()
        .stdout(predicate::str::contains("fetch"))
        .stdout(predicate::str::contains("succeeded"))
        .stdout(predicate::str::contains("failed"))
        .stdout(predicate::str::contains("verify"));
}

#[test]
fn status_before_any_run_is_pending() {
    let dir = project(MANIFEST);
    let output = envboot(&dir)
        .args(["--json", "status", "lab"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let views: serde_yaml::Value = serde_yaml::from_slice(&output.stdout).unwrap();
    let statuses: Vec<&str> = views
        .as_sequence()
        .unwrap()
        .iter()
        .map(|v| v["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, ["pending", "pending", "pending"]);
}

#[test]
fn reset_makes_steps_run_again() {
    let dir = project(MANIFEST);
    std::fs::write(dir.path().join("ok"), b"").unwrap();
    envboot(&dir).args(["run", "lab"]).assert().success();

    envboot(&dir)
        .args(["reset", "lab", "--steps", "verify"])
        .assert()
        .success()
        .stdout(predicate::str::contains("verify"));
    assert_eq!(status_of(&dir, "lab", "verify"), None);
    assert_eq!(status_of(&dir, "lab", "fetch").as_deref(), Some("succeeded"));

    envboot(&dir).args(["run", "lab"]).assert().success();
    assert_eq!(log(&dir), ["fetch", "build-hello", "verify", "verify"]);
}

#[test]
fn reset_unknown_step_exits_2() {
    let dir = project(MANIFEST);
    envboot(&dir)
        .args(["reset", "lab", "--steps", "ghost"])
        .assert()
        .code(2);
}

// ---------------------------------------------------------------------------
// envboot plan / list / validate
// ---------------------------------------------------------------------------

#[test]
fn plan_prints_execution_order() {
    let dir = project(MANIFEST);
    let output = envboot(&dir)
        .args(["--json", "plan", "lab"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let planned: serde_yaml::Value = serde_yaml::from_slice(&output.stdout).unwrap();
    let ids: Vec<&str> = planned
        .as_sequence()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["fetch", "build", "verify"]);
    assert!(log(&dir).is_empty());
}

#[test]
fn list_shows_environments() {
    let dir = project(MANIFEST);
    envboot(&dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("lab"))
        .stdout(predicate::str::contains("Toy lab environment"))
        .stdout(predicate::str::contains("other"));
}

#[test]
fn validate_accepts_good_manifest() {
    let dir = project(MANIFEST);
    envboot(&dir)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("valid"));
}

#[test]
fn validate_rejects_out_of_order_dependency() {
    let dir = project(
        r#"
environments:
  lab:
    steps:
      - id: a
        depends_on: [b]
        action: { kind: shell, run: "true" }
      - id: b
        depends_on: [a]
        action: { kind: shell, run: "true" }
"#,
    );
    envboot(&dir).arg("validate").assert().code(2);
}

#[test]
fn validate_rejects_undefined_variable() {
    let dir = project(
        r#"
environments:
  lab:
    steps:
      - id: a
        action: { kind: shell, run: "echo ${missing}" }
"#,
    );
    envboot(&dir)
        .arg("validate")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("missing"));
}
