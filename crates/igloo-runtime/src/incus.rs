use crate::backend::{Backend, DeviceSpec};
use crate::host::HostIdentity;
use crate::RuntimeError;
use serde::Deserialize;
use std::process::{Command, Stdio};
use tracing::debug;

const INCUS: &str = "incus";

/// Backend driving the `incus` command-line client.
///
/// Argument lists are built by pure functions so the command surface can be
/// tested without an incus daemon.
#[derive(Debug, Default)]
pub struct IncusBackend;

impl IncusBackend {
    pub fn new() -> Self {
        Self
    }

    fn command_line(args: &[String]) -> String {
        format!("{INCUS} {}", args.join(" "))
    }

    /// Run with captured output; non-zero exit becomes `CommandFailed`.
    fn output(args: &[String]) -> Result<String, RuntimeError> {
        debug!("exec: {}", Self::command_line(args));
        let output = Command::new(INCUS)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(spawn_error)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(RuntimeError::CommandFailed {
                command: Self::command_line(args),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            })
        }
    }

    /// Run with captured output, keeping stdout whatever the exit status.
    /// A failing run with nothing on stdout is still `CommandFailed`.
    fn capture(args: &[String]) -> Result<String, RuntimeError> {
        debug!("exec: {}", Self::command_line(args));
        let output = Command::new(INCUS)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(spawn_error)?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() || !stdout.trim().is_empty() {
            if !output.status.success() {
                debug!("{} exited with {}", Self::command_line(args), output.status);
            }
            Ok(stdout)
        } else {
            Err(RuntimeError::CommandFailed {
                command: Self::command_line(args),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            })
        }
    }

    /// Run with inherited stdio so guest output reaches the terminal.
    fn inherit(args: &[String]) -> Result<i32, RuntimeError> {
        debug!("exec: {}", Self::command_line(args));
        let status = Command::new(INCUS).args(args).status().map_err(spawn_error)?;
        Ok(status.code().unwrap_or(1))
    }

    fn add_device(instance: &str, device: &str, args: &[String]) -> Result<(), RuntimeError> {
        match Self::output(args) {
            Err(RuntimeError::CommandFailed { detail, .. }) if detail.contains("already exists") => {
                Err(RuntimeError::DeviceExists {
                    instance: instance.to_owned(),
                    device: device.to_owned(),
                })
            }
            other => other.map(|_| ()),
        }
    }

    fn list(name: &str) -> Result<Option<ListedInstance>, RuntimeError> {
        let stdout = Self::output(&list_args(name))?;
        parse_list(&stdout, name)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub(crate) struct ListedInstance {
    pub name: String,
    pub status: String,
}

fn spawn_error(e: std::io::Error) -> RuntimeError {
    if e.kind() == std::io::ErrorKind::NotFound {
        RuntimeError::BackendUnavailable(INCUS.to_owned())
    } else {
        RuntimeError::Io(e)
    }
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| (*s).to_owned()).collect()
}

pub(crate) fn list_args(name: &str) -> Vec<String> {
    owned(&["list", "--format=json", name])
}

/// `incus list <name>` filters by prefix, so pick the exact match.
pub(crate) fn parse_list(stdout: &str, name: &str) -> Result<Option<ListedInstance>, RuntimeError> {
    let instances: Vec<ListedInstance> =
        serde_json::from_str(stdout).map_err(|e| RuntimeError::Parse(e.to_string()))?;
    Ok(instances.into_iter().find(|i| i.name == name))
}

pub(crate) fn create_args(name: &str, image: &str, payload: &str) -> Vec<String> {
    let mut args = owned(&["init", image, name]);
    if !payload.is_empty() {
        args.push("--config".to_owned());
        args.push(format!("cloud-init.user-data={payload}"));
    }
    args
}

pub(crate) fn delete_args(name: &str, force: bool) -> Vec<String> {
    let mut args = owned(&["delete", name]);
    if force {
        args.push("--force".to_owned());
    }
    args
}

pub(crate) fn disk_device_args(instance: &str, spec: &DeviceSpec) -> Vec<String> {
    let mut args = owned(&["config", "device", "add", instance, spec.name.as_str(), "disk"]);
    args.push(format!("source={}", spec.source));
    args.push(format!("path={}", spec.target));
    if spec.shift {
        args.push("shift=true".to_owned());
    }
    args
}

/// Proxies with an explicit mode are plain file sockets; without one the
/// proxy process itself runs as the user via `security.uid`/`security.gid`.
pub(crate) fn proxy_device_args(instance: &str, spec: &DeviceSpec) -> Vec<String> {
    let mut args = owned(&["config", "device", "add", instance, spec.name.as_str(), "proxy"]);
    args.push(format!("connect={}", spec.source));
    args.push(format!("listen={}", spec.target));
    args.push("bind=instance".to_owned());
    if let Some(uid) = spec.uid {
        args.push(format!("uid={uid}"));
    }
    if let Some(gid) = spec.gid {
        args.push(format!("gid={gid}"));
    }
    match &spec.mode {
        Some(mode) => args.push(format!("mode={mode}")),
        None => {
            if let Some(uid) = spec.uid {
                args.push(format!("security.uid={uid}"));
            }
            if let Some(gid) = spec.gid {
                args.push(format!("security.gid={gid}"));
            }
        }
    }
    args
}

/// `incus config device list` prints one device name per line.
pub(crate) fn parse_device_list(stdout: &str) -> Vec<&str> {
    stdout.lines().map(str::trim).filter(|l| !l.is_empty()).collect()
}

pub(crate) fn exec_user_args(
    instance: &str,
    user: &HostIdentity,
    cwd: &str,
    interactive: bool,
) -> Vec<String> {
    let home = user.guest_home();
    let mut args = vec![
        "exec".to_owned(),
        instance.to_owned(),
        "--user".to_owned(),
        user.uid.to_string(),
        "--group".to_owned(),
        user.gid.to_string(),
        "--cwd".to_owned(),
        cwd.to_owned(),
        "--env".to_owned(),
        format!("HOME={home}"),
        "--env".to_owned(),
        format!("USER={}", user.username),
    ];
    if interactive {
        args.push("--env".to_owned());
        args.push(format!("XAUTHORITY={home}/.Xauthority"));
    }
    args.push("--".to_owned());
    args
}

impl Backend for IncusBackend {
    fn name(&self) -> &'static str {
        "incus"
    }

    fn exists(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(Self::list(name)?.is_some())
    }

    fn is_running(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(Self::list(name)?.is_some_and(|i| i.status == "Running"))
    }

    fn create(&self, name: &str, image: &str, boot_payload: &str) -> Result<(), RuntimeError> {
        Self::output(&create_args(name, image, boot_payload)).map(|_| ())
    }

    fn start(&self, name: &str) -> Result<(), RuntimeError> {
        Self::output(&owned(&["start", name])).map(|_| ())
    }

    fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        Self::output(&owned(&["stop", name])).map(|_| ())
    }

    fn destroy(&self, name: &str, force: bool) -> Result<(), RuntimeError> {
        Self::output(&delete_args(name, force)).map(|_| ())
    }

    fn attach_mount(&self, instance: &str, spec: &DeviceSpec) -> Result<(), RuntimeError> {
        Self::add_device(instance, &spec.name, &disk_device_args(instance, spec))
    }

    fn attach_socket_proxy(&self, instance: &str, spec: &DeviceSpec) -> Result<(), RuntimeError> {
        Self::add_device(instance, &spec.name, &proxy_device_args(instance, spec))
    }

    fn attach_gpu(&self, instance: &str) -> Result<(), RuntimeError> {
        Self::add_device(
            instance,
            "gpu",
            &owned(&["config", "device", "add", instance, "gpu", "gpu"]),
        )
    }

    fn remove_device(&self, instance: &str, device: &str) -> Result<(), RuntimeError> {
        Self::output(&owned(&["config", "device", "remove", instance, device])).map(|_| ())
    }

    fn device_exists(&self, instance: &str, device: &str) -> Result<bool, RuntimeError> {
        let stdout = Self::output(&owned(&["config", "device", "list", instance]))?;
        Ok(parse_device_list(&stdout).contains(&device))
    }

    fn get_device_source(
        &self,
        instance: &str,
        device: &str,
    ) -> Result<Option<String>, RuntimeError> {
        if !self.device_exists(instance, device)? {
            return Ok(None);
        }
        let stdout = Self::output(&owned(&["config", "device", "get", instance, device, "source"]))?;
        Ok(Some(stdout.trim().to_owned()))
    }

    fn set_guest_env(&self, instance: &str, key: &str, value: &str) -> Result<(), RuntimeError> {
        Self::output(&owned(&[
            "config",
            "set",
            instance,
            format!("environment.{key}={value}").as_str(),
        ]))
        .map(|_| ())
    }

    fn exec_as_admin(&self, instance: &str, argv: &[&str]) -> Result<(), RuntimeError> {
        let mut args = owned(&["exec", instance, "--"]);
        args.extend(argv.iter().map(|a| (*a).to_owned()));
        match Self::inherit(&args)? {
            0 => Ok(()),
            code => Err(RuntimeError::ExecFailed(format!(
                "`{}` exited with status {code}",
                argv.join(" ")
            ))),
        }
    }

    fn exec_capture(&self, instance: &str, argv: &[&str]) -> Result<String, RuntimeError> {
        let mut args = owned(&["exec", instance, "--"]);
        args.extend(argv.iter().map(|a| (*a).to_owned()));
        Self::capture(&args)
    }

    fn exec_as_user(
        &self,
        instance: &str,
        user: &HostIdentity,
        argv: &[&str],
        cwd: &str,
    ) -> Result<(), RuntimeError> {
        let mut args = exec_user_args(instance, user, cwd, false);
        args.extend(argv.iter().map(|a| (*a).to_owned()));
        match Self::inherit(&args)? {
            0 => Ok(()),
            code => Err(RuntimeError::ExecFailed(format!(
                "`{}` exited with status {code}",
                argv.join(" ")
            ))),
        }
    }

    fn exec_interactive_shell(
        &self,
        instance: &str,
        user: &HostIdentity,
        cwd: &str,
    ) -> Result<i32, RuntimeError> {
        let mut args = exec_user_args(instance, user, cwd, true);
        args.extend(owned(&["/bin/bash", "--login", "-i"]));
        Self::inherit(&args)
    }
}
