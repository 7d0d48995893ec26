//! cloud-config boot payload consumed by the guest's cloud-init agent.
//!
//! Keys emitted here are read by guests that already exist, so they must
//! stay stable across releases.

use crate::host::HostIdentity;
use crate::RuntimeError;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Written last by `runcmd`; its presence means first boot finished.
pub const PROVISION_MARKER: &str = "/var/lib/igloo/provisioned";

const HEADER: &str = "#cloud-config\n";

/// Everything the payload depends on. Packages must already be normalized.
#[derive(Debug, Clone)]
pub struct CloudConfigInput<'a> {
    pub user: &'a HostIdentity,
    pub packages: &'a [String],
    pub timezone: &'a str,
    /// Entries under `~/host` to link into the guest home.
    pub symlinks: &'a [String],
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct CloudConfig {
    bootcmd: Vec<String>,
    users: Vec<CloudUser>,
    timezone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    package_update: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    packages: Vec<String>,
    runcmd: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CloudUser {
    name: String,
    uid: u32,
    primary_group: String,
    shell: &'static str,
    sudo: &'static str,
    lock_passwd: bool,
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn runcmd(input: &CloudConfigInput<'_>) -> Vec<String> {
    let user = input.user;
    let home = user.guest_home();
    let owner = format!("{}:{}", user.uid, user.gid);
    let mut cmds = vec![
        format!(
            "mkdir -p {} {}",
            shell_quote(&format!("{home}/workspace")),
            shell_quote(&format!("{home}/host"))
        ),
        // Never recursive: ~/host and the project are shifted host mounts.
        format!(
            "chown {owner} {} {}",
            shell_quote(&home),
            shell_quote(&format!("{home}/workspace"))
        ),
    ];
    for entry in input.symlinks {
        let source = shell_quote(&format!("{home}/host/{entry}"));
        let link = shell_quote(&format!("{home}/{entry}"));
        let parent = if entry.contains('/') {
            format!("mkdir -p \"$(dirname {link})\" && ")
        } else {
            String::new()
        };
        cmds.push(format!(
            "if [ -e {source} ]; then {parent}ln -sfn {source} {link} && chown -h {owner} {link}; fi"
        ));
    }
    cmds.push(format!(
        "mkdir -p /var/lib/igloo && echo {} > {PROVISION_MARKER}",
        shell_quote(&input.generated_at.to_rfc3339())
    ));
    cmds
}

/// Render the cloud-config document. The package section is omitted
/// entirely when `packages` is empty.
pub fn generate_cloud_config(input: &CloudConfigInput<'_>) -> Result<String, RuntimeError> {
    let user = input.user;
    let doc = CloudConfig {
        bootcmd: vec![format!(
            "getent group {name} >/dev/null || groupadd --non-unique -g {gid} {name}",
            name = shell_quote(&user.username),
            gid = user.gid
        )],
        users: vec![CloudUser {
            name: user.username.clone(),
            uid: user.uid,
            primary_group: user.username.clone(),
            shell: "/bin/bash",
            sudo: "ALL=(ALL) NOPASSWD:ALL",
            lock_passwd: true,
        }],
        timezone: input.timezone.to_owned(),
        package_update: (!input.packages.is_empty()).then_some(true),
        packages: input.packages.to_vec(),
        runcmd: runcmd(input),
    };
    let body = serde_yaml::to_string(&doc)?;
    Ok(format!("{HEADER}{body}"))
}
