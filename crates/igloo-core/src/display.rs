//! Display passthrough: socket proxies, Xauthority and guest environment.
//!
//! Must run after the guest is ready: the per-user runtime directory that
//! hosts the Wayland socket is created by the guest's own boot sequence.

use crate::devices::{ensure_socket_proxy, reconcile_mutable_source, DeviceChange};
use igloo_runtime::{Backend, DeviceSpec, DisplayMode, HostIdentity, RuntimeError};
use std::path::Path;
use tracing::debug;

pub const X11_DEVICE: &str = "x11";
pub const WAYLAND_DEVICE: &str = "wayland";
pub const XAUTHORITY_DEVICE: &str = "xauthority";

/// Non-fatal observations made while configuring the display.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DisplayReport {
    pub notes: Vec<String>,
}

fn xauthority_spec(host: &HostIdentity, xauthority: &Path) -> DeviceSpec {
    DeviceSpec::bind_mount(
        XAUTHORITY_DEVICE,
        &xauthority.to_string_lossy(),
        &format!("{}/.Xauthority", host.guest_home()),
    )
}

/// Attach the Xauthority file, following it if the host path rotated.
/// `None` when the host has no Xauthority file.
pub fn refresh_xauthority(
    backend: &dyn Backend,
    instance: &str,
    host: &HostIdentity,
    xauthority: &Path,
) -> Result<Option<DeviceChange>, RuntimeError> {
    if !xauthority.exists() {
        debug!("no Xauthority file at {}", xauthority.display());
        return Ok(None);
    }
    reconcile_mutable_source(backend, instance, &xauthority_spec(host, xauthority)).map(Some)
}

pub fn configure_x11(
    backend: &dyn Backend,
    instance: &str,
    display: &str,
    host: &HostIdentity,
    xauthority: &Path,
) -> Result<DisplayReport, RuntimeError> {
    let mut report = DisplayReport::default();
    let socket = format!("unix:/tmp/.X11-unix/X{display}");
    let proxy = DeviceSpec::socket_proxy(X11_DEVICE, &socket, &socket, host.uid, host.gid)
        .with_mode("0777");
    ensure_socket_proxy(backend, instance, &proxy)?;

    if refresh_xauthority(backend, instance, host, xauthority)?.is_none() {
        report.notes.push(format!(
            "no Xauthority file found at {}, X11 authentication may fail",
            xauthority.display()
        ));
    }

    backend.set_guest_env(instance, "DISPLAY", &format!(":{display}"))?;
    Ok(report)
}

pub fn configure_wayland(
    backend: &dyn Backend,
    instance: &str,
    socket: &str,
    runtime_dir: &str,
    xwayland: Option<&str>,
    host: &HostIdentity,
    xauthority: &Path,
) -> Result<DisplayReport, RuntimeError> {
    let guest_runtime_dir = format!("/run/user/{}", host.uid);
    let proxy = DeviceSpec::socket_proxy(
        WAYLAND_DEVICE,
        &format!("unix:{runtime_dir}/{socket}"),
        &format!("unix:{guest_runtime_dir}/{socket}"),
        host.uid,
        host.gid,
    );
    ensure_socket_proxy(backend, instance, &proxy)?;
    backend.set_guest_env(instance, "WAYLAND_DISPLAY", socket)?;
    backend.set_guest_env(instance, "XDG_RUNTIME_DIR", &guest_runtime_dir)?;

    let mut report = DisplayReport::default();
    if let Some(display) = xwayland {
        match configure_x11(backend, instance, display, host, xauthority) {
            Ok(x11) => report.notes.extend(x11.notes),
            Err(e) => report.notes.push(format!("XWayland setup skipped: {e}")),
        }
    }
    Ok(report)
}

/// Run the subroutine matching the host display server.
pub fn configure_display(
    backend: &dyn Backend,
    instance: &str,
    mode: &DisplayMode,
    host: &HostIdentity,
    xauthority: &Path,
) -> Result<DisplayReport, RuntimeError> {
    match mode {
        DisplayMode::None => Ok(DisplayReport {
            notes: vec!["display enabled but no display server detected on the host".to_owned()],
        }),
        DisplayMode::X11 { display } => configure_x11(backend, instance, display, host, xauthority),
        DisplayMode::Wayland {
            socket,
            runtime_dir,
            xwayland,
        } => configure_wayland(
            backend,
            instance,
            socket,
            runtime_dir,
            xwayland.as_deref(),
            host,
            xauthority,
        ),
    }
}
