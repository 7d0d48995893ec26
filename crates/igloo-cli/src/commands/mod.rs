pub mod completions;
pub mod destroy;
pub mod doctor;
pub mod enter;
pub mod init;
pub mod man_pages;
pub mod remove;
pub mod status;
pub mod stop;

use igloo_core::{CoreError, Engine, EnvLock, ProvisionReport};
use igloo_schema::{parse_manifest_file, Environment, ProjectPaths};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MANIFEST_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_state(state: &str) -> String {
    use console::Style;
    match state {
        "running" => Style::new().green().bold().apply_to(state).to_string(),
        "stopped" => Style::new().yellow().apply_to(state).to_string(),
        "not created" => Style::new().red().apply_to(state).to_string(),
        other => other.to_owned(),
    }
}

/// Map an error message to the process exit code.
pub fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with("manifest error:") || msg.starts_with("configuration error:") {
        EXIT_MANIFEST_ERROR
    } else if msg.starts_with("store error:") {
        EXIT_STORE_ERROR
    } else {
        EXIT_FAILURE
    }
}

/// Load and normalize `.igloo/igloo.toml` from the current directory.
pub fn load_project() -> Result<(ProjectPaths, Environment), String> {
    let project = ProjectPaths::from_current_dir()
        .map_err(|e| format!("cannot determine current directory: {e}"))?;
    let manifest_path = project.manifest_path();
    if !manifest_path.exists() {
        return Err(format!(
            "configuration error: {} not found (run `igloo init` to create an environment)",
            manifest_path.display()
        ));
    }
    let env = parse_manifest_file(&manifest_path)
        .and_then(|m| m.normalize())
        .map_err(|e| format!("manifest error: {e}"))?;
    Ok((project, env))
}

pub fn lock_env(engine: &Engine<'_>, env: &Environment) -> Result<EnvLock, String> {
    engine.lock(env.name.as_str()).map_err(|e| e.to_string())
}

/// Error text for a failed provisioning run, with a retry hint when an
/// instance may have been left half-provisioned.
pub fn provision_error(err: &CoreError) -> String {
    match err {
        CoreError::Script { .. }
        | CoreError::Cancelled
        | CoreError::Provision {
            step: "attach mounts" | "start",
            ..
        } => format!("{err}\nrun `igloo remove --force` and try again to provision from scratch"),
        _ => err.to_string(),
    }
}

/// One-line summary of what a reconciliation pass did.
pub fn describe_report(report: &ProvisionReport) -> String {
    let what = if report.rebuilt {
        "rebuilt"
    } else if report.created {
        "created"
    } else if report.started {
        "started"
    } else if report.drift_accepted {
        "kept with new configuration"
    } else {
        "already running"
    };
    if report.warnings.is_empty() {
        format!("{} {what}", report.name)
    } else {
        format!(
            "{} {what} ({} warning{})",
            report.name,
            report.warnings.len(),
            if report.warnings.len() == 1 { "" } else { "s" }
        )
    }
}
