//! CLI subprocess integration tests.
//!
//! These run the `igloo` binary against the in-memory backend. Every
//! invocation starts with an empty backend, so tests that need an existing
//! instance go through `init` or `enter` within the same process.

use std::path::Path;
use std::process::{Command, Output};

struct Workspace {
    _tmp: tempfile::TempDir,
    project: std::path::PathBuf,
    data: std::path::PathBuf,
}

fn workspace() -> Workspace {
    let tmp = tempfile::tempdir().unwrap();
    let project = tmp.path().join("demo");
    std::fs::create_dir_all(&project).unwrap();
    Workspace {
        data: tmp.path().join("data"),
        project,
        _tmp: tmp,
    }
}

fn igloo(ws: &Workspace) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_igloo"));
    cmd.current_dir(&ws.project)
        .env("IGLOO_BACKEND", "mock")
        .env("IGLOO_SKIP_PREREQS", "1")
        .env("IGLOO_DATA_DIR", &ws.data)
        .env_remove("IGLOO_LOG")
        .env_remove("WAYLAND_DISPLAY")
        .env_remove("DISPLAY");
    cmd
}

fn write_manifest(project: &Path, body: &str) {
    let dir = project.join(".igloo");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("igloo.toml"), body).unwrap();
}

const MANIFEST: &str = r#"[container]
name = "igloo-demo"
image = "images:debian/trixie/cloud"

[packages]
install = "git, make"
"#;

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

#[test]
fn cli_version_exits_zero() {
    let out = Command::new(env!("CARGO_BIN_EXE_igloo"))
        .arg("--version")
        .output()
        .unwrap();
    assert!(out.status.success());
    assert!(stdout(&out).contains("igloo"));
}

#[test]
fn cli_help_lists_commands() {
    let out = Command::new(env!("CARGO_BIN_EXE_igloo"))
        .arg("--help")
        .output()
        .unwrap();
    assert!(out.status.success());
    let help = stdout(&out);
    for cmd in ["init", "enter", "stop", "remove", "destroy", "status", "doctor"] {
        assert!(help.contains(cmd), "help must list '{cmd}'");
    }
}

#[test]
fn cli_init_writes_config_and_provisions() {
    let ws = workspace();
    let out = igloo(&ws)
        .args(["init", "--distro", "debian", "--release", "trixie", "--packages", "git"])
        .args(["--json"])
        .output()
        .unwrap();
    assert!(out.status.success(), "stderr: {}", stderr(&out));

    let json: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(json["status"], "initialized");
    assert_eq!(json["name"], "igloo-demo");
    assert_eq!(json["image"], "images:debian/trixie/cloud");
    assert_eq!(json["report"]["created"], true);
    assert_eq!(json["report"]["path"].as_array().unwrap().last().unwrap(), "ready");

    let config = std::fs::read_to_string(ws.project.join(".igloo/igloo.toml")).unwrap();
    assert!(config.contains("install = \"git\""));
    assert!(ws
        .project
        .join(".igloo/scripts/00-example.sh.example")
        .exists());
    assert!(ws.data.join("fingerprints/igloo-demo.hash").exists());
}

#[test]
fn cli_init_refuses_existing_config() {
    let ws = workspace();
    write_manifest(&ws.project, MANIFEST);
    let out = igloo(&ws).args(["init", "-d", "debian"]).output().unwrap();
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).contains("already exists"));
}

#[test]
fn cli_init_rejects_unknown_distro() {
    let ws = workspace();
    let out = igloo(&ws)
        .args(["init", "--distro", "gentoo", "--release", "current"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(2));
    assert!(!ws.project.join(".igloo").exists());
}

#[test]
fn cli_status_json_for_missing_instance() {
    let ws = workspace();
    write_manifest(&ws.project, MANIFEST);
    let out = igloo(&ws).args(["status", "--json"]).output().unwrap();
    assert!(out.status.success(), "stderr: {}", stderr(&out));

    let json: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(json["name"], "igloo-demo");
    assert_eq!(json["state"], "not-created");
    assert_eq!(json["packages"], serde_json::json!(["git", "make"]));
    assert_eq!(json["mounts"]["home"], true);
    assert!(json["drift"].is_null());
}

#[test]
fn cli_status_without_config_is_config_error() {
    let ws = workspace();
    let out = igloo(&ws).arg("status").output().unwrap();
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).contains("igloo init"));
}

#[test]
fn cli_invalid_manifest_is_manifest_error() {
    let ws = workspace();
    write_manifest(&ws.project, "[container]\nname = \"igloo-x\"\nimage = \"\"\n");
    let out = igloo(&ws).arg("status").output().unwrap();
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).starts_with("error: manifest error:"));
}

#[test]
fn cli_enter_provisions_and_opens_shell() {
    let ws = workspace();
    write_manifest(&ws.project, MANIFEST);
    let out = igloo(&ws).arg("enter").output().unwrap();
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert!(ws.data.join("fingerprints/igloo-demo.hash").exists());
}

#[test]
fn cli_stop_missing_instance_fails() {
    let ws = workspace();
    write_manifest(&ws.project, MANIFEST);
    let out = igloo(&ws).arg("stop").output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("does not exist"));
}

#[test]
fn cli_remove_missing_instance_warns_and_succeeds() {
    let ws = workspace();
    write_manifest(&ws.project, MANIFEST);
    let out = igloo(&ws).args(["remove", "--json"]).output().unwrap();
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let json: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(json["status"], "not-found");
    assert!(ws.project.join(".igloo/igloo.toml").exists());
}

#[test]
fn cli_destroy_removes_config_and_record() {
    let ws = workspace();
    write_manifest(&ws.project, MANIFEST);
    let record = ws.data.join("fingerprints/igloo-demo.hash");
    std::fs::create_dir_all(record.parent().unwrap()).unwrap();
    std::fs::write(&record, "ab12\n").unwrap();

    let out = igloo(&ws).arg("destroy").output().unwrap();
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert!(!ws.project.join(".igloo").exists());
    assert!(!record.exists());
}

#[test]
fn cli_destroy_keep_config() {
    let ws = workspace();
    write_manifest(&ws.project, MANIFEST);
    let out = igloo(&ws)
        .args(["destroy", "--keep-config"])
        .output()
        .unwrap();
    assert!(out.status.success());
    assert!(ws.project.join(".igloo/igloo.toml").exists());
}

#[test]
fn cli_rejects_interval_not_below_timeout() {
    let ws = workspace();
    write_manifest(&ws.project, MANIFEST);
    let out = igloo(&ws)
        .args(["status", "--ready-timeout", "2", "--ready-interval", "2"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn cli_unknown_backend_fails() {
    let ws = workspace();
    write_manifest(&ws.project, MANIFEST);
    let out = igloo(&ws)
        .args(["status", "--backend", "docker"])
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(stderr(&out).contains("docker"));
}

#[test]
fn cli_doctor_json_with_mock_backend() {
    let ws = workspace();
    let out = igloo(&ws).args(["doctor", "--json"]).output().unwrap();
    let json: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    let checks = json["checks"].as_array().unwrap();
    assert!(checks.iter().any(|c| c["name"] == "data_dir" && c["status"] == "pass"));
    assert!(ws.data.join("locks").is_dir());
}

#[test]
fn cli_completions_bash() {
    let ws = workspace();
    let out = igloo(&ws).args(["completions", "bash"]).output().unwrap();
    assert!(out.status.success());
    assert!(stdout(&out).contains("igloo"));
}

#[test]
fn cli_man_pages_written() {
    let ws = workspace();
    let dir = ws.project.join("man");
    let out = igloo(&ws)
        .arg("man-pages")
        .arg(&dir)
        .output()
        .unwrap();
    assert!(out.status.success());
    assert!(dir.join("igloo.1").exists());
    assert!(dir.join("igloo-enter.1").exists());
}
