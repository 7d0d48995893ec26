//! Idempotent device attachment.
//!
//! The backend's attach primitive fails on a duplicate name, so every entry
//! point queries current state before mutating. GPU attachment is the one
//! exception: the device is always identical, so "already exists" is
//! accepted as success.

use igloo_runtime::{Backend, DeviceKind, DeviceSpec, RuntimeError};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceChange {
    Added,
    Unchanged,
    /// Removed and re-added because the source moved.
    Replaced,
}

fn attach(backend: &dyn Backend, instance: &str, spec: &DeviceSpec) -> Result<(), RuntimeError> {
    match spec.kind {
        DeviceKind::BindMount => backend.attach_mount(instance, spec),
        DeviceKind::SocketProxy => backend.attach_socket_proxy(instance, spec),
        DeviceKind::GpuPass => backend.attach_gpu(instance),
    }
}

fn ensure_present(
    backend: &dyn Backend,
    instance: &str,
    spec: &DeviceSpec,
) -> Result<DeviceChange, RuntimeError> {
    if backend.device_exists(instance, &spec.name)? {
        debug!("device {} already present on {instance}", spec.name);
        return Ok(DeviceChange::Unchanged);
    }
    attach(backend, instance, spec)?;
    debug!("attached device {} to {instance}", spec.name);
    Ok(DeviceChange::Added)
}

/// Attach a shifted bind mount unless a device with that name exists.
pub fn ensure_mount(
    backend: &dyn Backend,
    instance: &str,
    spec: &DeviceSpec,
) -> Result<DeviceChange, RuntimeError> {
    ensure_present(backend, instance, spec)
}

/// Attach a socket forward bound inside the instance unless one with that
/// name exists.
pub fn ensure_socket_proxy(
    backend: &dyn Backend,
    instance: &str,
    spec: &DeviceSpec,
) -> Result<DeviceChange, RuntimeError> {
    ensure_present(backend, instance, spec)
}

/// Converge a device whose host source may move between sessions.
///
/// Never leaves two devices under one name. A source change is applied as
/// remove-then-add, so the device is briefly absent in between.
pub fn reconcile_mutable_source(
    backend: &dyn Backend,
    instance: &str,
    spec: &DeviceSpec,
) -> Result<DeviceChange, RuntimeError> {
    match backend.get_device_source(instance, &spec.name)? {
        None => {
            attach(backend, instance, spec)?;
            Ok(DeviceChange::Added)
        }
        Some(current) if current == spec.source => Ok(DeviceChange::Unchanged),
        Some(current) => {
            debug!(
                "device {} on {instance} moved: {current} -> {}",
                spec.name, spec.source
            );
            backend.remove_device(instance, &spec.name)?;
            attach(backend, instance, spec)?;
            Ok(DeviceChange::Replaced)
        }
    }
}

pub fn ensure_gpu(backend: &dyn Backend, instance: &str) -> Result<DeviceChange, RuntimeError> {
    match backend.attach_gpu(instance) {
        Ok(()) => Ok(DeviceChange::Added),
        Err(RuntimeError::DeviceExists { .. }) => Ok(DeviceChange::Unchanged),
        Err(e) => Err(e),
    }
}
