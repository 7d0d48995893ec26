//! Backend and host integration layer for igloo environments.
//!
//! This crate defines the `Backend` capability the reconciliation engine
//! drives (lifecycle, device attachment, exec), with an `incus` CLI
//! implementation and an in-memory `MockBackend`. It also generates the
//! cloud-config boot payload, detects host identity and display mode, and
//! checks prerequisites.

pub mod backend;
pub mod cloudinit;
pub mod host;
pub mod incus;
pub mod mock;
pub mod prereq;
pub mod terminal;

pub use backend::{select_backend, Backend, DeviceKind, DeviceSpec, BACKEND_NAMES};
pub use cloudinit::{generate_cloud_config, CloudConfigInput, PROVISION_MARKER};
pub use host::{detect_timezone, xauthority_path, DisplayMode, HostIdentity};
pub use incus::IncusBackend;
pub use mock::{MockBackend, ProbeReply};
pub use prereq::{check_incus_prereqs, format_missing, MissingPrereq};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend '{0}' is not available on this system")]
    BackendUnavailable(String),
    #[error("`{command}` failed: {detail}")]
    CommandFailed { command: String, detail: String },
    #[error("instance '{0}' not found")]
    InstanceNotFound(String),
    #[error("device '{device}' already exists on '{instance}'")]
    DeviceExists { instance: String, device: String },
    #[error("device '{device}' not found on '{instance}'")]
    DeviceNotFound { instance: String, device: String },
    #[error("command in guest failed: {0}")]
    ExecFailed(String),
    #[error("failed to parse backend output: {0}")]
    Parse(String),
    #[error("failed to render boot payload: {0}")]
    Payload(#[from] serde_yaml::Error),
}
