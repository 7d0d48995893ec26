use crate::host::HostIdentity;
use crate::RuntimeError;
use serde::{Deserialize, Serialize};

/// Backend names accepted by [`select_backend`].
pub const BACKEND_NAMES: &[&str] = &["incus", "mock"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    BindMount,
    SocketProxy,
    GpuPass,
}

/// A named attachment to an instance. Names are unique per instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub kind: DeviceKind,
    pub name: String,
    /// Host path for mounts, host socket address for proxies.
    pub source: String,
    /// Guest path for mounts, guest socket address for proxies.
    pub target: String,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// Octal permission mode of the guest-side socket.
    pub mode: Option<String>,
    /// Remap host ownership to the guest user.
    pub shift: bool,
}

impl DeviceSpec {
    pub fn bind_mount(name: &str, source: &str, target: &str) -> Self {
        Self {
            kind: DeviceKind::BindMount,
            name: name.to_owned(),
            source: source.to_owned(),
            target: target.to_owned(),
            uid: None,
            gid: None,
            mode: None,
            shift: true,
        }
    }

    pub fn socket_proxy(name: &str, connect: &str, listen: &str, uid: u32, gid: u32) -> Self {
        Self {
            kind: DeviceKind::SocketProxy,
            name: name.to_owned(),
            source: connect.to_owned(),
            target: listen.to_owned(),
            uid: Some(uid),
            gid: Some(gid),
            mode: None,
            shift: false,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: &str) -> Self {
        self.mode = Some(mode.to_owned());
        self
    }

    pub fn gpu() -> Self {
        Self {
            kind: DeviceKind::GpuPass,
            name: "gpu".to_owned(),
            source: String::new(),
            target: String::new(),
            uid: None,
            gid: None,
            mode: None,
            shift: false,
        }
    }
}

/// Capability surface of a container backend.
///
/// Every call is synchronous and either succeeds or returns a classified
/// [`RuntimeError`]. Attaching a device under a name that already exists
/// returns [`RuntimeError::DeviceExists`]; idempotence is the caller's job.
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn exists(&self, name: &str) -> Result<bool, RuntimeError>;

    fn is_running(&self, name: &str) -> Result<bool, RuntimeError>;

    /// Create (but do not start) an instance with the given boot payload.
    fn create(&self, name: &str, image: &str, boot_payload: &str) -> Result<(), RuntimeError>;

    fn start(&self, name: &str) -> Result<(), RuntimeError>;

    fn stop(&self, name: &str) -> Result<(), RuntimeError>;

    fn destroy(&self, name: &str, force: bool) -> Result<(), RuntimeError>;

    fn attach_mount(&self, instance: &str, spec: &DeviceSpec) -> Result<(), RuntimeError>;

    fn attach_socket_proxy(&self, instance: &str, spec: &DeviceSpec) -> Result<(), RuntimeError>;

    fn attach_gpu(&self, instance: &str) -> Result<(), RuntimeError>;

    fn remove_device(&self, instance: &str, device: &str) -> Result<(), RuntimeError>;

    fn device_exists(&self, instance: &str, device: &str) -> Result<bool, RuntimeError>;

    /// Source of an attached device, or `None` when no such device exists.
    fn get_device_source(&self, instance: &str, device: &str)
        -> Result<Option<String>, RuntimeError>;

    fn set_guest_env(&self, instance: &str, key: &str, value: &str) -> Result<(), RuntimeError>;

    /// Run `argv` as root in the guest with inherited stdio. Non-zero exit is an error.
    fn exec_as_admin(&self, instance: &str, argv: &[&str]) -> Result<(), RuntimeError>;

    /// Run `argv` as root and capture stdout. Used for status probes, whose
    /// exit status can be non-zero while stdout still carries the answer, so
    /// stdout is returned whenever there is any. An error means the command
    /// could not run or failed without output.
    fn exec_capture(&self, instance: &str, argv: &[&str]) -> Result<String, RuntimeError>;

    fn exec_as_user(
        &self,
        instance: &str,
        user: &HostIdentity,
        argv: &[&str],
        cwd: &str,
    ) -> Result<(), RuntimeError>;

    /// Interactive login shell. Returns the shell's exit code.
    fn exec_interactive_shell(
        &self,
        instance: &str,
        user: &HostIdentity,
        cwd: &str,
    ) -> Result<i32, RuntimeError>;
}

pub fn select_backend(name: &str) -> Result<Box<dyn Backend>, RuntimeError> {
    match name {
        "incus" => Ok(Box::new(crate::incus::IncusBackend::new())),
        "mock" => Ok(Box::new(crate::mock::MockBackend::new())),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}
