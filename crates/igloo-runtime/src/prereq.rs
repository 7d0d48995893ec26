use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// `incus info` fails when the daemon is down or the user lacks access.
fn incus_daemon_reachable() -> bool {
    Command::new("incus")
        .arg("info")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check prerequisites for the incus backend. Empty means all are met.
pub fn check_incus_prereqs() -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists("incus") {
        missing.push(MissingPrereq {
            name: "incus",
            purpose: "container lifecycle and device management",
            install_hint: "apt install incus | dnf install incus | pacman -S incus | zypper install incus",
        });
    } else if !incus_daemon_reachable() {
        missing.push(MissingPrereq {
            name: "incus daemon",
            purpose: "running containers as the current user",
            install_hint: "start incus (systemctl start incus) and add yourself to the incus-admin group",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nigloo needs a working incus installation to manage environments.");
    msg
}
