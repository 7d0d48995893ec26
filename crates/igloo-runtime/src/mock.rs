use crate::backend::{Backend, DeviceSpec};
use crate::host::HostIdentity;
use crate::RuntimeError;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// What the guest answers to a readiness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeReply {
    Status(String),
    /// The exec itself fails, as it does early in boot.
    Unreachable,
}

#[derive(Debug, Clone, Default)]
pub struct MockInstance {
    pub image: String,
    pub boot_payload: String,
    pub running: bool,
    pub devices: BTreeMap<String, DeviceSpec>,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug)]
struct MockState {
    instances: HashMap<String, MockInstance>,
    calls: Vec<String>,
    probe_replies: VecDeque<ProbeReply>,
    default_probe: ProbeReply,
    failing_execs: Vec<String>,
    failing_ops: Vec<String>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            instances: HashMap::new(),
            calls: Vec::new(),
            probe_replies: VecDeque::new(),
            default_probe: ProbeReply::Status("status: done".to_owned()),
            failing_execs: Vec::new(),
            failing_ops: Vec::new(),
        }
    }
}

/// In-memory backend for tests and `--backend mock`.
///
/// Keeps an instance table with per-instance devices, a log of every call,
/// a queue of scripted probe replies, and injectable failures.
#[derive(Debug, Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MockState>, RuntimeError> {
        self.state
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))
    }

    fn inspect(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Log the call and fail it if `op` was marked failing.
    fn record(&self, op: &str, detail: &str) -> Result<MutexGuard<'_, MockState>, RuntimeError> {
        let mut state = self.lock()?;
        state.calls.push(format!("{op} {detail}").trim_end().to_owned());
        if state.failing_ops.iter().any(|f| f == op) {
            return Err(RuntimeError::CommandFailed {
                command: format!("mock {op}"),
                detail: "injected failure".to_owned(),
            });
        }
        Ok(state)
    }

    fn instance<'a>(
        state: &'a mut MockState,
        name: &str,
    ) -> Result<&'a mut MockInstance, RuntimeError> {
        state
            .instances
            .get_mut(name)
            .ok_or_else(|| RuntimeError::InstanceNotFound(name.to_owned()))
    }

    fn attach(&self, op: &str, instance: &str, spec: &DeviceSpec) -> Result<(), RuntimeError> {
        let mut state = self.record(op, &format!("{instance} {}", spec.name))?;
        let inst = Self::instance(&mut state, instance)?;
        if inst.devices.contains_key(&spec.name) {
            return Err(RuntimeError::DeviceExists {
                instance: instance.to_owned(),
                device: spec.name.clone(),
            });
        }
        inst.devices.insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    fn check_exec(state: &MockState, instance: &str, argv: &[&str]) -> Result<(), RuntimeError> {
        let running = state.instances.get(instance).is_some_and(|i| i.running);
        if !running {
            return Err(RuntimeError::ExecFailed(format!(
                "instance '{instance}' is not running"
            )));
        }
        let line = argv.join(" ");
        if state.failing_execs.iter().any(|f| line.contains(f.as_str())) {
            return Err(RuntimeError::ExecFailed(format!("`{line}` exited with status 1")));
        }
        Ok(())
    }

    // Test controls

    pub fn insert_instance(&self, name: &str, image: &str, running: bool) {
        self.inspect().instances.insert(
            name.to_owned(),
            MockInstance {
                image: image.to_owned(),
                running,
                ..MockInstance::default()
            },
        );
    }

    pub fn set_running(&self, name: &str, running: bool) {
        if let Some(inst) = self.inspect().instances.get_mut(name) {
            inst.running = running;
        }
    }

    /// Queue a reply for the next readiness probe. Once the queue drains the
    /// default reply (`status: done`) is used.
    pub fn push_probe_reply(&self, reply: ProbeReply) {
        self.inspect().probe_replies.push_back(reply);
    }

    pub fn set_default_probe(&self, reply: ProbeReply) {
        self.inspect().default_probe = reply;
    }

    /// Make any admin/user exec whose command line contains `needle` fail.
    pub fn fail_exec_containing(&self, needle: &str) {
        self.inspect().failing_execs.push(needle.to_owned());
    }

    /// Make every call to backend operation `op` (e.g. `"attach_gpu"`) fail.
    pub fn fail_op(&self, op: &str) {
        self.inspect().failing_ops.push(op.to_owned());
    }

    pub fn calls(&self) -> Vec<String> {
        self.inspect().calls.clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.inspect()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn instance_snapshot(&self, name: &str) -> Option<MockInstance> {
        self.inspect().instances.get(name).cloned()
    }

    pub fn devices(&self, name: &str) -> Vec<DeviceSpec> {
        self.instance_snapshot(name)
            .map(|i| i.devices.into_values().collect())
            .unwrap_or_default()
    }
}

impl Backend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn exists(&self, name: &str) -> Result<bool, RuntimeError> {
        let state = self.record("exists", name)?;
        Ok(state.instances.contains_key(name))
    }

    fn is_running(&self, name: &str) -> Result<bool, RuntimeError> {
        let state = self.record("is_running", name)?;
        Ok(state.instances.get(name).is_some_and(|i| i.running))
    }

    fn create(&self, name: &str, image: &str, boot_payload: &str) -> Result<(), RuntimeError> {
        let mut state = self.record("create", name)?;
        if state.instances.contains_key(name) {
            return Err(RuntimeError::CommandFailed {
                command: format!("mock create {name}"),
                detail: "instance already exists".to_owned(),
            });
        }
        state.instances.insert(
            name.to_owned(),
            MockInstance {
                image: image.to_owned(),
                boot_payload: boot_payload.to_owned(),
                ..MockInstance::default()
            },
        );
        Ok(())
    }

    fn start(&self, name: &str) -> Result<(), RuntimeError> {
        let mut state = self.record("start", name)?;
        Self::instance(&mut state, name)?.running = true;
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        let mut state = self.record("stop", name)?;
        Self::instance(&mut state, name)?.running = false;
        Ok(())
    }

    fn destroy(&self, name: &str, force: bool) -> Result<(), RuntimeError> {
        let mut state = self.record("destroy", name)?;
        let running = Self::instance(&mut state, name)?.running;
        if running && !force {
            return Err(RuntimeError::CommandFailed {
                command: format!("mock destroy {name}"),
                detail: "instance is running; stop it or use force".to_owned(),
            });
        }
        state.instances.remove(name);
        Ok(())
    }

    fn attach_mount(&self, instance: &str, spec: &DeviceSpec) -> Result<(), RuntimeError> {
        self.attach("attach_mount", instance, spec)
    }

    fn attach_socket_proxy(&self, instance: &str, spec: &DeviceSpec) -> Result<(), RuntimeError> {
        self.attach("attach_socket_proxy", instance, spec)
    }

    fn attach_gpu(&self, instance: &str) -> Result<(), RuntimeError> {
        self.attach("attach_gpu", instance, &DeviceSpec::gpu())
    }

    fn remove_device(&self, instance: &str, device: &str) -> Result<(), RuntimeError> {
        let mut state = self.record("remove_device", &format!("{instance} {device}"))?;
        Self::instance(&mut state, instance)?
            .devices
            .remove(device)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::DeviceNotFound {
                instance: instance.to_owned(),
                device: device.to_owned(),
            })
    }

    fn device_exists(&self, instance: &str, device: &str) -> Result<bool, RuntimeError> {
        let mut state = self.record("device_exists", &format!("{instance} {device}"))?;
        Ok(Self::instance(&mut state, instance)?
            .devices
            .contains_key(device))
    }

    fn get_device_source(
        &self,
        instance: &str,
        device: &str,
    ) -> Result<Option<String>, RuntimeError> {
        let mut state = self.record("get_device_source", &format!("{instance} {device}"))?;
        Ok(Self::instance(&mut state, instance)?
            .devices
            .get(device)
            .map(|d| d.source.clone()))
    }

    fn set_guest_env(&self, instance: &str, key: &str, value: &str) -> Result<(), RuntimeError> {
        let mut state = self.record("set_guest_env", &format!("{instance} {key}={value}"))?;
        Self::instance(&mut state, instance)?
            .env
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn exec_as_admin(&self, instance: &str, argv: &[&str]) -> Result<(), RuntimeError> {
        let state = self.record("exec_as_admin", &format!("{instance} {}", argv.join(" ")))?;
        Self::check_exec(&state, instance, argv)
    }

    fn exec_capture(&self, instance: &str, argv: &[&str]) -> Result<String, RuntimeError> {
        let mut state = self.record("exec_capture", &format!("{instance} {}", argv.join(" ")))?;
        let running = state.instances.get(instance).is_some_and(|i| i.running);
        if !running {
            return Err(RuntimeError::ExecFailed(format!(
                "instance '{instance}' is not running"
            )));
        }
        let reply = state
            .probe_replies
            .pop_front()
            .unwrap_or_else(|| state.default_probe.clone());
        match reply {
            ProbeReply::Status(s) => Ok(s),
            ProbeReply::Unreachable => Err(RuntimeError::ExecFailed(
                "guest agent not reachable".to_owned(),
            )),
        }
    }

    fn exec_as_user(
        &self,
        instance: &str,
        user: &HostIdentity,
        argv: &[&str],
        cwd: &str,
    ) -> Result<(), RuntimeError> {
        let state = self.record(
            "exec_as_user",
            &format!("{instance} {} {cwd} {}", user.username, argv.join(" ")),
        )?;
        Self::check_exec(&state, instance, argv)
    }

    fn exec_interactive_shell(
        &self,
        instance: &str,
        user: &HostIdentity,
        cwd: &str,
    ) -> Result<i32, RuntimeError> {
        let state = self.record(
            "exec_interactive_shell",
            &format!("{instance} {} {cwd}", user.username),
        )?;
        Self::check_exec(&state, instance, &[])?;
        Ok(0)
    }
}
