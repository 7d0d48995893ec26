use crate::concurrency::{CancelToken, EnvLock};
use crate::devices::{ensure_gpu, ensure_mount};
use crate::display::{configure_display, refresh_xauthority};
use crate::drift::{DriftDecision, DriftNotice, DriftPolicy};
use crate::lifecycle::{validate_transition, ProvisionState};
use crate::readiness::{wait_for_ready, ReadinessOptions};
use crate::scripts;
use crate::{CoreError, Severity};
use igloo_runtime::{
    detect_timezone, generate_cloud_config, terminal, xauthority_path, Backend, CloudConfigInput,
    DeviceSpec, DisplayMode, HostIdentity, RuntimeError,
};
use igloo_schema::{DisplayIntent, Environment, Fingerprint, MountIntent, ProjectPaths};
use igloo_store::{compute_fingerprint, FingerprintStore, StoreError, StoreLayout};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Host facts the engine needs, detected once per invocation.
#[derive(Debug, Clone)]
pub struct HostContext {
    pub identity: HostIdentity,
    pub display: DisplayMode,
    pub xauthority: PathBuf,
    pub timezone: String,
}

impl HostContext {
    pub fn detect() -> Self {
        let identity = HostIdentity::current();
        let display = DisplayMode::detect(identity.uid);
        let xauthority = xauthority_path(
            std::env::var("XAUTHORITY").ok().as_deref(),
            &identity.home,
        );
        Self {
            identity,
            display,
            xauthority,
            timezone: detect_timezone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "kebab-case")]
pub enum ReadinessOutcome {
    /// No wait happened (instance was already running).
    Skipped,
    Done,
    TimedOut,
    GuestError(String),
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionReport {
    pub name: String,
    /// States visited, starting at `Absent`.
    pub path: Vec<ProvisionState>,
    pub created: bool,
    pub started: bool,
    pub rebuilt: bool,
    pub drift_accepted: bool,
    pub readiness: ReadinessOutcome,
    pub scripts_run: Vec<String>,
    /// Degraded-but-continue failures, already logged.
    pub warnings: Vec<String>,
}

impl ProvisionReport {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            path: vec![ProvisionState::Absent],
            created: false,
            started: false,
            rebuilt: false,
            drift_accepted: false,
            readiness: ReadinessOutcome::Skipped,
            scripts_run: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn state(&self) -> ProvisionState {
        self.path.last().copied().unwrap_or(ProvisionState::Absent)
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ProvisionState::Ready
    }

    fn advance(&mut self, to: ProvisionState) -> Result<(), CoreError> {
        let from = self.state();
        if from == to {
            return Ok(());
        }
        validate_transition(from, to)?;
        debug!("{}: {from} -> {to}", self.name);
        self.path.push(to);
        Ok(())
    }

    fn warn(&mut self, msg: String) {
        warn!("{msg}");
        self.warnings.push(msg);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    NotCreated,
    Running,
    Stopped,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotCreated => "not created",
            Self::Running => "running",
            Self::Stopped => "stopped",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvStatus {
    pub name: String,
    pub image: String,
    pub state: InstanceState,
    pub mounts: MountIntent,
    pub display: DisplayIntent,
    pub display_server: &'static str,
    pub packages: Vec<String>,
    pub symlinks: Vec<String>,
    pub scripts: Vec<String>,
    /// `None` when no fingerprint has been recorded yet.
    pub drift: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DestroyOutcome {
    pub existed: bool,
    pub config_removed: bool,
}

fn step(step: &'static str) -> impl Fn(RuntimeError) -> CoreError {
    move |source| CoreError::Provision { step, source }
}

/// Reconciliation orchestrator.
///
/// Sequences device attachment, lifecycle calls, the readiness wait,
/// display passthrough and init scripts against one backend, and owns the
/// drift decision on re-entry. It is the only layer that downgrades
/// failures into warnings.
pub struct Engine<'a> {
    backend: &'a dyn Backend,
    store: FingerprintStore,
    host: HostContext,
    readiness: ReadinessOptions,
    cancel: CancelToken,
}

impl<'a> Engine<'a> {
    pub fn new(backend: &'a dyn Backend, data_dir: impl Into<PathBuf>, host: HostContext) -> Self {
        Self {
            backend,
            store: FingerprintStore::new(StoreLayout::new(data_dir)),
            host,
            readiness: ReadinessOptions::default(),
            cancel: CancelToken::new(),
        }
    }

    #[must_use]
    pub fn with_readiness(mut self, readiness: ReadinessOptions) -> Self {
        self.readiness = readiness;
        self
    }

    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend
    }

    pub fn store(&self) -> &FingerprintStore {
        &self.store
    }

    pub fn layout(&self) -> &StoreLayout {
        self.store.layout()
    }

    pub fn host(&self) -> &HostContext {
        &self.host
    }

    /// Take the per-name lock, failing fast if another process holds it.
    pub fn lock(&self, name: &str) -> Result<EnvLock, CoreError> {
        EnvLock::try_acquire(&self.layout().lock_file(name))?
            .ok_or_else(|| CoreError::Locked(name.to_owned()))
    }

    /// Create and fully provision `env` if no instance exists. An existing
    /// instance is left untouched.
    pub fn provision(
        &self,
        env: &Environment,
        project: &ProjectPaths,
    ) -> Result<ProvisionReport, CoreError> {
        let name = env.name.as_str();
        let mut report = ProvisionReport::new(name);
        if self.backend.exists(name)? {
            debug!("{name} already exists, nothing to provision");
            report.advance(ProvisionState::Ready)?;
            return Ok(report);
        }
        self.provision_into(env, project, &mut report)?;
        Ok(report)
    }

    /// Bring `env` to `Ready`: create it if absent, otherwise resolve drift
    /// through `policy` and make sure it is running.
    pub fn reconcile(
        &self,
        env: &Environment,
        project: &ProjectPaths,
        policy: &mut DriftPolicy<'_>,
    ) -> Result<ProvisionReport, CoreError> {
        let name = env.name.as_str();
        info!("reconciling {name}");
        let mut report = ProvisionReport::new(name);
        self.cancel.check()?;

        if !self.backend.exists(name)? {
            self.provision_into(env, project, &mut report)?;
            return Ok(report);
        }

        report.advance(ProvisionState::Ready)?;
        if self.evaluate_drift(env, project, policy, &mut report)? == Some(DriftDecision::Rebuild) {
            info!("rebuilding {name}");
            report.advance(ProvisionState::Rebuilding)?;
            self.backend.destroy(name, true).map_err(step("destroy"))?;
            self.clear_record(name, &mut report);
            report.advance(ProvisionState::Absent)?;
            report.rebuilt = true;
            self.provision_into(env, project, &mut report)?;
            return Ok(report);
        }

        if !self.backend.is_running(name)? {
            self.start_and_wait(name, &mut report)?;
        }
        if env.display.enabled {
            self.refresh_display(name, &mut report);
        }
        report.advance(ProvisionState::Ready)?;
        Ok(report)
    }

    /// Interactive login shell as the host user, in the workspace when the
    /// project is mounted and in the guest home otherwise.
    pub fn open_shell(&self, env: &Environment, project: &ProjectPaths) -> Result<i32, CoreError> {
        let name = env.name.as_str();
        let user = &self.host.identity;
        let workdir = if env.mounts.project {
            project.guest_workspace(&user.username)
        } else {
            user.guest_home()
        };

        info!("opening shell in {name} at {workdir}");
        terminal::emit_container_push(name);
        terminal::print_enter_banner(name, &env.image, &workdir);
        let code = self.backend.exec_interactive_shell(name, user, &workdir);
        terminal::emit_container_pop();
        terminal::print_exit_banner(name);
        Ok(code?)
    }

    /// Stop a running instance. Returns `false` if it was already stopped.
    pub fn stop(&self, name: &str) -> Result<bool, CoreError> {
        if !self.backend.exists(name)? {
            return Err(CoreError::EnvNotFound(name.to_owned()));
        }
        if !self.backend.is_running(name)? {
            debug!("{name} already stopped");
            return Ok(false);
        }
        info!("stopping {name}");
        self.backend.stop(name).map_err(step("stop"))?;
        Ok(true)
    }

    /// Destroy the instance and clear its fingerprint record, keeping the
    /// project configuration. Returns whether an instance existed.
    pub fn remove(&self, name: &str, force: bool) -> Result<bool, CoreError> {
        let existed = self.backend.exists(name)?;
        if existed {
            info!("removing {name}");
            self.backend.destroy(name, force).map_err(step("destroy"))?;
        } else {
            warn!("environment {name} does not exist, nothing to remove");
        }
        if let Err(e) = self.store.remove(name) {
            warn!("could not clear fingerprint record for {name}: {e}");
        }
        Ok(existed)
    }

    /// [`remove`](Self::remove), then delete `.igloo/` unless `keep_config`.
    pub fn destroy(
        &self,
        name: &str,
        project: &ProjectPaths,
        force: bool,
        keep_config: bool,
    ) -> Result<DestroyOutcome, CoreError> {
        let existed = self.remove(name, force)?;
        let config_dir = project.config_dir();
        let config_removed = !keep_config && config_dir.exists();
        if config_removed {
            info!("deleting {}", config_dir.display());
            std::fs::remove_dir_all(&config_dir)?;
        }
        Ok(DestroyOutcome {
            existed,
            config_removed,
        })
    }

    pub fn status(&self, env: &Environment, project: &ProjectPaths) -> Result<EnvStatus, CoreError> {
        let name = env.name.as_str();
        let state = if !self.backend.exists(name)? {
            InstanceState::NotCreated
        } else if self.backend.is_running(name)? {
            InstanceState::Running
        } else {
            InstanceState::Stopped
        };
        let drift = match self.store.has_changed(name, &project.config_dir()) {
            Ok(check) => check.stored.is_some().then_some(check.changed),
            Err(e) => {
                debug!("drift unknown for {name}: {e}");
                None
            }
        };
        Ok(EnvStatus {
            name: name.to_owned(),
            image: env.image.clone(),
            state,
            mounts: env.mounts,
            display: env.display,
            display_server: self.host.display.label(),
            packages: env.packages.clone(),
            symlinks: env.symlinks.clone(),
            scripts: scripts::discover(&project.scripts_dir())?,
            drift,
        })
    }

    fn provision_into(
        &self,
        env: &Environment,
        project: &ProjectPaths,
        report: &mut ProvisionReport,
    ) -> Result<(), CoreError> {
        let name = env.name.as_str();
        let user = &self.host.identity;
        self.cancel.check()?;

        report.advance(ProvisionState::Creating)?;
        info!("creating {name} from {}", env.image);
        let payload = generate_cloud_config(&CloudConfigInput {
            user,
            packages: &env.packages,
            timezone: &self.host.timezone,
            symlinks: &env.symlinks,
            generated_at: chrono::Utc::now(),
        })?;
        self.backend
            .create(name, &env.image, &payload)
            .map_err(step("create"))?;
        report.created = true;

        report.advance(ProvisionState::Attaching)?;
        let mut mounts = Vec::new();
        if env.mounts.home {
            mounts.push(DeviceSpec::bind_mount(
                "home",
                &user.home.to_string_lossy(),
                &ProjectPaths::guest_host_home(&user.username),
            ));
        }
        if env.mounts.project {
            mounts.push(DeviceSpec::bind_mount(
                "project",
                &project.root().to_string_lossy(),
                &project.guest_workspace(&user.username),
            ));
        }
        for spec in &mounts {
            info!("mounting {} at {}", spec.source, spec.target);
            ensure_mount(self.backend, name, spec).map_err(step("attach mounts"))?;
        }

        self.cancel.check()?;
        self.start_and_wait(name, report)?;

        if env.display.enabled {
            report.advance(ProvisionState::ConfiguringDisplay)?;
            self.configure_display(env, report);
        }

        report.advance(ProvisionState::RunningScripts)?;
        self.run_scripts(env, project, report)?;

        report.advance(ProvisionState::Ready)?;
        let current = compute_fingerprint(&project.config_dir())?;
        self.save_record(name, &current, report);
        info!("{name} is ready");
        Ok(())
    }

    fn start_and_wait(&self, name: &str, report: &mut ProvisionReport) -> Result<(), CoreError> {
        report.advance(ProvisionState::Starting)?;
        if self.backend.is_running(name)? {
            debug!("{name} already running");
        } else {
            info!("starting {name}");
            self.backend.start(name).map_err(step("start"))?;
            report.started = true;
        }

        report.advance(ProvisionState::AwaitingGuestReady)?;
        info!("waiting for {name} to finish first boot");
        report.readiness = match wait_for_ready(self.backend, name, &self.readiness, &self.cancel) {
            Ok(()) => ReadinessOutcome::Done,
            Err(e) if e.severity() == Severity::Degraded => match e {
                CoreError::GuestReportedError(status) => {
                    report.warn(format!("cloud-init reported an error ({status}), continuing"));
                    ReadinessOutcome::GuestError(status)
                }
                e => {
                    report.warn(format!("{e}, continuing (the image may lack cloud-init)"));
                    ReadinessOutcome::TimedOut
                }
            },
            Err(e) => return Err(e),
        };
        Ok(())
    }

    fn configure_display(&self, env: &Environment, report: &mut ProvisionReport) {
        let name = env.name.as_str();
        let host = &self.host;
        info!("configuring {} display passthrough", host.display.label());
        match configure_display(self.backend, name, &host.display, &host.identity, &host.xauthority)
        {
            Ok(display) => {
                for note in display.notes {
                    report.warn(note);
                }
            }
            Err(e) => report.warn(format!(
                "display passthrough failed: {e}; GUI applications may not work"
            )),
        }
        if env.display.gpu {
            if let Err(e) = ensure_gpu(self.backend, name) {
                report.warn(format!("GPU passthrough failed: {e}"));
            }
        }
    }

    /// Re-point the Xauthority mount at the host's current file.
    fn refresh_display(&self, name: &str, report: &mut ProvisionReport) {
        let host = &self.host;
        let uses_x11 = matches!(
            host.display,
            DisplayMode::X11 { .. }
                | DisplayMode::Wayland {
                    xwayland: Some(_),
                    ..
                }
        );
        if !uses_x11 {
            return;
        }
        if let Err(e) = refresh_xauthority(self.backend, name, &host.identity, &host.xauthority) {
            report.warn(format!("could not update Xauthority mount: {e}"));
        }
    }

    fn run_scripts(
        &self,
        env: &Environment,
        project: &ProjectPaths,
        report: &mut ProvisionReport,
    ) -> Result<(), CoreError> {
        let names = scripts::discover(&project.scripts_dir())?;
        if names.is_empty() {
            debug!("no init scripts");
            return Ok(());
        }
        if !env.mounts.project {
            report.warn(format!(
                "skipping {} init script(s): the project mount is disabled",
                names.len()
            ));
            return Ok(());
        }
        info!("running {} init script(s)", names.len());
        let guest_dir = project.guest_scripts_dir(&self.host.identity.username);
        scripts::run(self.backend, env.name.as_str(), &guest_dir, &names, &self.cancel)?;
        report.scripts_run = names;
        Ok(())
    }

    fn evaluate_drift(
        &self,
        env: &Environment,
        project: &ProjectPaths,
        policy: &mut DriftPolicy<'_>,
        report: &mut ProvisionReport,
    ) -> Result<Option<DriftDecision>, CoreError> {
        let name = env.name.as_str();
        let check = match self.store.has_changed(name, &project.config_dir()) {
            Ok(check) => check,
            Err(e @ StoreError::MalformedRecord { .. }) => {
                report.warn(format!("replacing unreadable fingerprint record: {e}"));
                let current = compute_fingerprint(&project.config_dir())?;
                self.save_record(name, &current, report);
                return Ok(None);
            }
            Err(e) => {
                let e = CoreError::from(e);
                if e.severity() != Severity::Degraded {
                    return Err(e);
                }
                report.warn(format!("could not read fingerprint record for {name}: {e}"));
                return Ok(None);
            }
        };

        match check.stored {
            None => {
                debug!("first observation of {name}, recording fingerprint");
                self.save_record(name, &check.current, report);
                Ok(None)
            }
            Some(stored) if check.changed => {
                info!(
                    "configuration of {name} changed ({} -> {})",
                    stored.short(),
                    check.current.short()
                );
                report.advance(ProvisionState::PromptRebuild)?;
                let notice = DriftNotice {
                    name: name.to_owned(),
                    stored,
                    current: check.current.clone(),
                };
                let decision = policy.decide(&notice);
                if decision == DriftDecision::Accept {
                    self.save_record(name, &check.current, report);
                    report.drift_accepted = true;
                    report.advance(ProvisionState::Ready)?;
                }
                Ok(Some(decision))
            }
            Some(_) => Ok(None),
        }
    }

    fn save_record(&self, name: &str, digest: &Fingerprint, report: &mut ProvisionReport) {
        if let Err(e) = self.store.store(name, digest) {
            report.warn(format!("could not save fingerprint for {name}: {e}"));
        }
    }

    fn clear_record(&self, name: &str, report: &mut ProvisionReport) {
        if let Err(e) = self.store.remove(name) {
            report.warn(format!("could not clear fingerprint record for {name}: {e}"));
        }
    }
}
