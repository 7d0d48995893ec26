//! Reconciliation scenarios driven through the in-memory backend.
//!
//! Each test builds a throwaway project with a `.igloo/` tree and a data
//! directory, then checks what the engine asked the backend to do and what
//! ended up in the fingerprint store.

use igloo_core::{
    CancelToken, CoreError, DriftPolicy, Engine, HostContext, InstanceState, ProvisionState,
    ReadinessOptions, ReadinessOutcome,
};
use igloo_runtime::{DeviceKind, DisplayMode, HostIdentity, MockBackend, ProbeReply};
use igloo_schema::{Environment, ProjectPaths};
use igloo_store::compute_fingerprint;
use std::cell::Cell;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const NAME: &str = "igloo-demo";

struct Fixture {
    _tmp: TempDir,
    data_dir: std::path::PathBuf,
    home: std::path::PathBuf,
    project: ProjectPaths,
}

fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("demo");
    let config = root.join(".igloo");
    fs::create_dir_all(&config).unwrap();
    fs::write(
        config.join("igloo.toml"),
        "[container]\nname = \"igloo-demo\"\nimage = \"images:debian/trixie/cloud\"\n",
    )
    .unwrap();
    let home = tmp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    Fixture {
        data_dir: tmp.path().join("data"),
        home,
        project: ProjectPaths::new(root),
        _tmp: tmp,
    }
}

fn host(home: &Path, display: DisplayMode) -> HostContext {
    HostContext {
        identity: HostIdentity {
            username: "dev".to_owned(),
            uid: 1000,
            gid: 1000,
            home: home.to_path_buf(),
        },
        display,
        xauthority: home.join(".Xauthority"),
        timezone: "Europe/Rome".to_owned(),
    }
}

fn fast() -> ReadinessOptions {
    ReadinessOptions::new(Duration::from_millis(5), Duration::from_millis(60)).unwrap()
}

fn engine<'a>(mock: &'a MockBackend, fx: &Fixture, display: DisplayMode) -> Engine<'a> {
    Engine::new(mock, &fx.data_dir, host(&fx.home, display)).with_readiness(fast())
}

fn env() -> Environment {
    Environment::new(NAME, "images:debian/trixie/cloud")
}

fn write_script(fx: &Fixture, name: &str) {
    let dir = fx.project.scripts_dir();
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(name), "#!/bin/sh\necho ok\n").unwrap();
}

#[test]
fn fresh_provision_reaches_ready() {
    let fx = fixture();
    let mock = MockBackend::new();
    let engine = engine(&mock, &fx, DisplayMode::None);
    let mut env = env();
    env.packages = vec!["git".to_owned(), "make".to_owned()];

    let report = engine
        .reconcile(&env, &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();

    assert!(report.is_ready());
    assert!(report.created && report.started && !report.rebuilt);
    assert_eq!(report.readiness, ReadinessOutcome::Done);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(
        report.path,
        [
            ProvisionState::Absent,
            ProvisionState::Creating,
            ProvisionState::Attaching,
            ProvisionState::Starting,
            ProvisionState::AwaitingGuestReady,
            ProvisionState::RunningScripts,
            ProvisionState::Ready,
        ]
    );

    let inst = mock.instance_snapshot(NAME).unwrap();
    assert!(inst.running);
    assert!(inst.boot_payload.starts_with("#cloud-config"));
    assert!(inst.boot_payload.contains("git"));
    assert!(inst.boot_payload.contains("Europe/Rome"));

    let home = &inst.devices["home"];
    assert_eq!(home.kind, DeviceKind::BindMount);
    assert_eq!(home.target, "/home/dev/host");
    assert_eq!(inst.devices["project"].target, "/home/dev/workspace/demo");

    let stored = engine.store().get_stored(NAME).unwrap().unwrap();
    assert_eq!(stored, compute_fingerprint(&fx.project.config_dir()).unwrap());
}

#[test]
fn disabled_mounts_are_not_attached() {
    let fx = fixture();
    let mock = MockBackend::new();
    let engine = engine(&mock, &fx, DisplayMode::None);
    let mut env = env();
    env.mounts.home = false;

    engine
        .reconcile(&env, &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();
    let names: Vec<String> = mock.devices(NAME).into_iter().map(|d| d.name).collect();
    assert_eq!(names, ["project"]);
}

#[test]
fn second_pass_on_running_instance_changes_nothing() {
    let fx = fixture();
    let mock = MockBackend::new();
    let engine = engine(&mock, &fx, DisplayMode::None);
    engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();

    let report = engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::AlwaysRebuild)
        .unwrap();
    assert!(!report.created && !report.started && !report.rebuilt);
    assert_eq!(report.readiness, ReadinessOutcome::Skipped);
    assert_eq!(report.path, [ProvisionState::Absent, ProvisionState::Ready]);
    assert_eq!(mock.calls_starting_with("create").len(), 1);
    assert_eq!(mock.calls_starting_with("start").len(), 1);
}

#[test]
fn stopped_instance_is_started_and_awaited() {
    let fx = fixture();
    let mock = MockBackend::new();
    let engine = engine(&mock, &fx, DisplayMode::None);
    engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();
    assert!(engine.stop(NAME).unwrap());

    let report = engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();
    assert!(report.started);
    assert_eq!(report.readiness, ReadinessOutcome::Done);
    assert!(report.is_ready());
    assert!(mock.instance_snapshot(NAME).unwrap().running);
}

#[test]
fn drift_with_rebuild_reprovisions() {
    let fx = fixture();
    let mock = MockBackend::new();
    let engine = engine(&mock, &fx, DisplayMode::None);
    engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();
    let before = engine.store().get_stored(NAME).unwrap().unwrap();

    write_script(&fx, "01-tools.sh");
    let report = engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::AlwaysRebuild)
        .unwrap();

    assert!(report.rebuilt && report.created);
    assert!(report.path.contains(&ProvisionState::PromptRebuild));
    assert!(report.path.contains(&ProvisionState::Rebuilding));
    assert_eq!(report.scripts_run, ["01-tools.sh"]);
    assert_eq!(mock.calls_starting_with("destroy").len(), 1);
    assert_eq!(mock.calls_starting_with("create").len(), 2);

    let after = engine.store().get_stored(NAME).unwrap().unwrap();
    assert_ne!(before, after);
    assert_eq!(after, compute_fingerprint(&fx.project.config_dir()).unwrap());
}

#[test]
fn drift_declined_records_current_fingerprint() {
    let fx = fixture();
    let mock = MockBackend::new();
    let engine = engine(&mock, &fx, DisplayMode::None);
    engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();
    fs::write(fx.project.config_dir().join("notes.txt"), "changed").unwrap();

    let report = engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();
    assert!(report.drift_accepted && !report.rebuilt);
    assert!(report.is_ready());
    assert!(mock.calls_starting_with("destroy").is_empty());

    // Accepted drift is not raised again.
    let asked = Cell::new(0);
    let mut policy = DriftPolicy::Prompt(Box::new(|_| {
        asked.set(asked.get() + 1);
        true
    }));
    engine.reconcile(&env(), &fx.project, &mut policy).unwrap();
    assert_eq!(asked.get(), 0);
}

#[test]
fn prompt_sees_both_fingerprints() {
    let fx = fixture();
    let mock = MockBackend::new();
    let engine = engine(&mock, &fx, DisplayMode::None);
    engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();
    let stored = engine.store().get_stored(NAME).unwrap().unwrap();
    fs::write(fx.project.manifest_path(), "[container]\nname = \"x\"\n").unwrap();

    let mut seen = None;
    let mut policy = DriftPolicy::Prompt(Box::new(|notice| {
        seen = Some(notice.clone());
        false
    }));
    engine.reconcile(&env(), &fx.project, &mut policy).unwrap();
    drop(policy);

    let notice = seen.unwrap();
    assert_eq!(notice.name, NAME);
    assert_eq!(notice.stored, stored);
    assert_ne!(notice.current, stored);
}

#[test]
fn first_observation_records_without_prompting() {
    let fx = fixture();
    let mock = MockBackend::new();
    mock.insert_instance(NAME, "images:debian/trixie/cloud", true);
    let engine = engine(&mock, &fx, DisplayMode::None);

    let mut policy = DriftPolicy::Prompt(Box::new(|_| panic!("must not prompt")));
    let report = engine.reconcile(&env(), &fx.project, &mut policy).unwrap();
    assert!(report.is_ready());
    assert!(!report.drift_accepted);
    assert!(engine.store().get_stored(NAME).unwrap().is_some());
}

#[test]
fn readiness_timeout_degrades_to_warning() {
    let fx = fixture();
    let mock = MockBackend::new();
    mock.set_default_probe(ProbeReply::Status("status: running".to_owned()));
    let engine = engine(&mock, &fx, DisplayMode::None);

    let report = engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();
    assert_eq!(report.readiness, ReadinessOutcome::TimedOut);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.is_ready());
    assert!(engine.store().get_stored(NAME).unwrap().is_some());
}

#[test]
fn unreachable_guest_then_done_is_ready() {
    let fx = fixture();
    let mock = MockBackend::new();
    mock.push_probe_reply(ProbeReply::Unreachable);
    mock.push_probe_reply(ProbeReply::Status("status: running".to_owned()));
    let engine = engine(&mock, &fx, DisplayMode::None);

    let report = engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();
    assert_eq!(report.readiness, ReadinessOutcome::Done);
    assert_eq!(mock.calls_starting_with("exec_capture").len(), 3);
}

#[test]
fn guest_error_degrades_to_warning() {
    let fx = fixture();
    let mock = MockBackend::new();
    mock.push_probe_reply(ProbeReply::Status("status: error".to_owned()));
    let engine = engine(&mock, &fx, DisplayMode::None);

    let report = engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();
    assert_eq!(
        report.readiness,
        ReadinessOutcome::GuestError("status: error".to_owned())
    );
    assert!(report.is_ready());
    assert_eq!(mock.calls_starting_with("exec_capture").len(), 1);
}

#[test]
fn x11_display_and_gpu_are_attached() {
    let fx = fixture();
    fs::write(fx.home.join(".Xauthority"), "cookie").unwrap();
    let mock = MockBackend::new();
    let engine = engine(
        &mock,
        &fx,
        DisplayMode::X11 {
            display: "0".to_owned(),
        },
    );
    let mut env = env();
    env.display.enabled = true;
    env.display.gpu = true;

    let report = engine
        .reconcile(&env, &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert!(report.path.contains(&ProvisionState::ConfiguringDisplay));

    let inst = mock.instance_snapshot(NAME).unwrap();
    assert_eq!(inst.devices["x11"].mode.as_deref(), Some("0777"));
    assert_eq!(inst.devices["xauthority"].target, "/home/dev/.Xauthority");
    assert!(inst.devices.contains_key("gpu"));
    assert_eq!(inst.env["DISPLAY"], ":0");
}

#[test]
fn display_failure_degrades_to_warning() {
    let fx = fixture();
    let mock = MockBackend::new();
    mock.fail_op("attach_socket_proxy");
    let engine = engine(
        &mock,
        &fx,
        DisplayMode::Wayland {
            socket: "wayland-0".to_owned(),
            runtime_dir: "/run/user/1000".to_owned(),
            xwayland: None,
        },
    );
    let mut env = env();
    env.display.enabled = true;

    let report = engine
        .reconcile(&env, &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();
    assert!(report.is_ready());
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("display passthrough failed"));
}

#[test]
fn display_enabled_without_server_is_noted() {
    let fx = fixture();
    let mock = MockBackend::new();
    let engine = engine(&mock, &fx, DisplayMode::None);
    let mut env = env();
    env.display.enabled = true;

    let report = engine
        .reconcile(&env, &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();
    assert!(report.is_ready());
    assert_eq!(report.warnings.len(), 1);
}

#[test]
fn xauthority_is_refreshed_on_reentry() {
    let fx = fixture();
    let mock = MockBackend::new();
    let mut ctx = host(
        &fx.home,
        DisplayMode::X11 {
            display: "1".to_owned(),
        },
    );
    let first = fx.home.join(".Xauthority");
    fs::write(&first, "cookie").unwrap();
    ctx.xauthority = first;
    let mut env = env();
    env.display.enabled = true;
    Engine::new(&mock, &fx.data_dir, ctx.clone())
        .with_readiness(fast())
        .reconcile(&env, &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();

    let rotated = fx.home.join("xauth_rotated");
    fs::write(&rotated, "cookie2").unwrap();
    ctx.xauthority = rotated.clone();
    Engine::new(&mock, &fx.data_dir, ctx)
        .with_readiness(fast())
        .reconcile(&env, &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();

    let inst = mock.instance_snapshot(NAME).unwrap();
    assert_eq!(
        inst.devices["xauthority"].source,
        rotated.to_string_lossy()
    );
    assert_eq!(mock.calls_starting_with("remove_device").len(), 1);
}

#[test]
fn scripts_run_in_order_from_workspace() {
    let fx = fixture();
    write_script(&fx, "10-b.sh");
    write_script(&fx, "02-a.sh");
    write_script(&fx, "03-skip.sh.example");
    let mock = MockBackend::new();
    let engine = engine(&mock, &fx, DisplayMode::None);

    let report = engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();
    assert_eq!(report.scripts_run, ["02-a.sh", "10-b.sh"]);
    let execs = mock.calls_starting_with("exec_as_admin");
    assert_eq!(execs.len(), 4);
    assert!(execs[1].contains("'/home/dev/workspace/demo/.igloo/scripts/02-a.sh'"));
}

#[test]
fn script_failure_is_fatal_and_leaves_no_record() {
    let fx = fixture();
    write_script(&fx, "01-a.sh");
    write_script(&fx, "02-b.sh");
    let mock = MockBackend::new();
    mock.fail_exec_containing("01-a.sh'");
    let engine = engine(&mock, &fx, DisplayMode::None);

    let err = engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap_err();
    assert!(matches!(err, CoreError::Script { ref name, .. } if name == "01-a.sh"));
    assert!(!mock.calls().join("\n").contains("02-b.sh"));
    assert!(engine.store().get_stored(NAME).unwrap().is_none());
}

#[test]
fn scripts_are_skipped_without_project_mount() {
    let fx = fixture();
    write_script(&fx, "01-a.sh");
    let mock = MockBackend::new();
    let engine = engine(&mock, &fx, DisplayMode::None);
    let mut env = env();
    env.mounts.project = false;

    let report = engine
        .reconcile(&env, &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();
    assert!(report.scripts_run.is_empty());
    assert_eq!(report.warnings.len(), 1);
    assert!(mock.calls_starting_with("exec_as_admin").is_empty());
}

#[test]
fn create_failure_is_fatal() {
    let fx = fixture();
    let mock = MockBackend::new();
    mock.fail_op("create");
    let engine = engine(&mock, &fx, DisplayMode::None);

    let err = engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap_err();
    assert!(matches!(err, CoreError::Provision { step: "create", .. }));
    assert!(mock.instance_snapshot(NAME).is_none());
    assert!(mock.calls_starting_with("start").is_empty());
}

#[test]
fn mount_failure_is_fatal() {
    let fx = fixture();
    let mock = MockBackend::new();
    mock.fail_op("attach_mount");
    let engine = engine(&mock, &fx, DisplayMode::None);

    let err = engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap_err();
    assert!(matches!(err, CoreError::Provision { step: "attach mounts", .. }));
    assert!(mock.calls_starting_with("start").is_empty());
}

#[test]
fn cancelled_token_stops_before_create() {
    let fx = fixture();
    let mock = MockBackend::new();
    let cancel = CancelToken::new();
    cancel.cancel();
    let engine = engine(&mock, &fx, DisplayMode::None).with_cancel_token(cancel);

    let err = engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap_err();
    assert!(matches!(err, CoreError::Cancelled));
    assert!(mock.calls_starting_with("create").is_empty());
}

#[test]
fn shell_opens_in_workspace() {
    let fx = fixture();
    let mock = MockBackend::new();
    let engine = engine(&mock, &fx, DisplayMode::None);

    let report = engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();
    assert!(report.is_ready());
    assert_eq!(engine.open_shell(&env(), &fx.project).unwrap(), 0);
    let shells = mock.calls_starting_with("exec_interactive_shell");
    assert_eq!(
        shells,
        ["exec_interactive_shell igloo-demo dev /home/dev/workspace/demo"]
    );
}

#[test]
fn malformed_record_is_replaced_without_prompt() {
    let fx = fixture();
    let mock = MockBackend::new();
    let engine = engine(&mock, &fx, DisplayMode::None);
    engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();
    let good = engine.store().get_stored(NAME).unwrap().unwrap();
    fs::write(engine.layout().fingerprint_file(NAME), "not a digest\n").unwrap();

    let report = engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::AlwaysRebuild)
        .unwrap();
    assert!(!report.rebuilt);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("unreadable fingerprint record"));
    assert_eq!(engine.store().get_stored(NAME).unwrap(), Some(good));

    let report = engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::AlwaysRebuild)
        .unwrap();
    assert!(report.warnings.is_empty());
    assert!(!report.rebuilt);
}

#[test]
fn remove_clears_record_and_keeps_config() {
    let fx = fixture();
    let mock = MockBackend::new();
    let engine = engine(&mock, &fx, DisplayMode::None);
    engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();
    engine.stop(NAME).unwrap();

    assert!(engine.remove(NAME, false).unwrap());
    assert!(mock.instance_snapshot(NAME).is_none());
    assert!(engine.store().get_stored(NAME).unwrap().is_none());
    assert!(fx.project.manifest_path().exists());

    assert!(!engine.remove(NAME, false).unwrap());
}

#[test]
fn remove_running_instance_needs_force() {
    let fx = fixture();
    let mock = MockBackend::new();
    mock.insert_instance(NAME, "img", true);
    let engine = engine(&mock, &fx, DisplayMode::None);

    assert!(engine.remove(NAME, false).is_err());
    assert!(engine.remove(NAME, true).unwrap());
}

#[test]
fn destroy_deletes_config_unless_kept() {
    let fx = fixture();
    let mock = MockBackend::new();
    let engine = engine(&mock, &fx, DisplayMode::None);
    engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();

    let kept = engine.destroy(NAME, &fx.project, true, true).unwrap();
    assert!(kept.existed && !kept.config_removed);
    assert!(fx.project.config_dir().exists());

    let gone = engine.destroy(NAME, &fx.project, true, false).unwrap();
    assert!(!gone.existed && gone.config_removed);
    assert!(!fx.project.config_dir().exists());
}

#[test]
fn status_reports_state_and_drift() {
    let fx = fixture();
    write_script(&fx, "01-a.sh");
    let mock = MockBackend::new();
    let engine = engine(&mock, &fx, DisplayMode::None);

    let status = engine.status(&env(), &fx.project).unwrap();
    assert_eq!(status.state, InstanceState::NotCreated);
    assert_eq!(status.drift, None);
    assert_eq!(status.scripts, ["01-a.sh"]);

    engine
        .reconcile(&env(), &fx.project, &mut DriftPolicy::NeverRebuild)
        .unwrap();
    assert_eq!(
        engine.status(&env(), &fx.project).unwrap().state,
        InstanceState::Running
    );

    fs::write(fx.project.config_dir().join("extra"), "x").unwrap();
    engine.stop(NAME).unwrap();
    let status = engine.status(&env(), &fx.project).unwrap();
    assert_eq!(status.state, InstanceState::Stopped);
    assert_eq!(status.drift, Some(true));
}
