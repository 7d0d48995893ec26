use super::{EXIT_FAILURE, EXIT_SUCCESS};
use igloo_core::EnvLock;
use igloo_runtime::{check_incus_prereqs, format_missing, DisplayMode, HostIdentity};
use igloo_store::{FingerprintStore, StoreLayout};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn pass(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: "pass",
            message: message.into(),
        }
    }

    fn fail(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: "fail",
            message: message.into(),
        }
    }

    fn warn(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: "warn",
            message: message.into(),
        }
    }

    fn info(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            status: "info",
            message: message.into(),
        }
    }
}

pub fn run(data_dir: &Path, backend: &str, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();

    check_prereqs(backend, &mut checks);
    check_data_dir(&StoreLayout::new(data_dir), &mut checks);
    check_disk_space(data_dir, &mut checks);
    check_display(&mut checks);

    let all_pass = checks.iter().all(|c| c.status != "fail");
    print_results(&checks, all_pass, json_output)
}

fn check_prereqs(backend: &str, checks: &mut Vec<Check>) {
    if backend != "incus" {
        checks.push(Check::info(
            "backend_prereqs",
            format!("Backend '{backend}' has no host prerequisites"),
        ));
        return;
    }
    let missing = check_incus_prereqs();
    if missing.is_empty() {
        checks.push(Check::pass("backend_prereqs", "incus is installed and reachable"));
    } else {
        checks.push(Check::fail("backend_prereqs", format_missing(&missing)));
    }
}

fn check_data_dir(layout: &StoreLayout, checks: &mut Vec<Check>) {
    if let Err(e) = layout.initialize() {
        checks.push(Check::fail(
            "data_dir",
            format!("Cannot create {}: {e}", layout.root().display()),
        ));
        return;
    }
    if layout.is_writable() {
        checks.push(Check::pass(
            "data_dir",
            format!("Data directory {} is writable", layout.root().display()),
        ));
    } else {
        checks.push(Check::fail(
            "data_dir",
            format!("Data directory {} is not writable", layout.root().display()),
        ));
        return;
    }

    let store = FingerprintStore::new(layout.clone());
    match store.list() {
        Ok(names) => {
            let locked = names
                .iter()
                .filter(|n| matches!(EnvLock::try_acquire(&layout.lock_file(n)), Ok(None)))
                .count();
            checks.push(Check::info(
                "records",
                format!("{} recorded environments ({locked} in use)", names.len()),
            ));
        }
        Err(e) => checks.push(Check::warn(
            "records",
            format!("Cannot list fingerprint records: {e}"),
        )),
    }
}

fn check_display(checks: &mut Vec<Check>) {
    let host = HostIdentity::current();
    match DisplayMode::detect(host.uid) {
        DisplayMode::None => checks.push(Check::warn(
            "display",
            "No display server detected; GUI passthrough will be skipped",
        )),
        mode => checks.push(Check::pass(
            "display",
            format!("{} display server detected", mode.label()),
        )),
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("igloo doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

fn check_disk_space(data_dir: &Path, checks: &mut Vec<Check>) {
    let probe = data_dir
        .ancestors()
        .find(|p| p.exists())
        .unwrap_or_else(|| Path::new("/"));
    let Ok(c_path) = std::ffi::CString::new(probe.to_string_lossy().as_bytes()) else {
        return;
    };

    // SAFETY: zeroed statvfs is a valid initial state for the struct.
    #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: NUL-terminated path and a zeroed output struct; the struct is
    // only read when the call returns 0.
    #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &raw mut stat) };
    if ret != 0 {
        return;
    }

    #[allow(clippy::unnecessary_cast)]
    let avail_mb = (stat.f_bavail as u64 * stat.f_frsize as u64) / (1024 * 1024);
    if avail_mb < 1024 {
        checks.push(Check::warn(
            "disk_space",
            format!("Disk space: {avail_mb} MB available; images need a few GB"),
        ));
    } else {
        checks.push(Check::pass(
            "disk_space",
            format!("Disk space: {} GB available", avail_mb / 1024),
        ));
    }
}
