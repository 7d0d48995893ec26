//! Reconciliation engine for igloo development containers.
//!
//! This crate ties the schema, fingerprint store and backend together into
//! the `Engine`, which creates, attaches, starts, waits for, configures and
//! initializes an instance, and re-evaluates configuration drift on every
//! entry. The pieces it sequences (device reconciler, readiness poller,
//! script runner, display passthrough) live in their own modules and are
//! idempotent on their own.

pub mod concurrency;
pub mod devices;
pub mod display;
pub mod drift;
pub mod engine;
pub mod lifecycle;
pub mod readiness;
pub mod scripts;

pub use concurrency::{install_signal_handler, CancelToken, EnvLock};
pub use devices::{ensure_gpu, ensure_mount, ensure_socket_proxy, reconcile_mutable_source, DeviceChange};
pub use drift::{DriftDecision, DriftNotice, DriftPolicy};
pub use engine::{
    DestroyOutcome, Engine, EnvStatus, HostContext, InstanceState, ProvisionReport,
    ReadinessOutcome,
};
pub use lifecycle::{validate_transition, ProvisionState};
pub use readiness::{wait_for_ready, ReadinessOptions, ReadinessState};

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Manifest(#[from] igloo_schema::ManifestError),
    #[error("store error: {0}")]
    Store(#[from] igloo_store::StoreError),
    #[error("runtime error: {0}")]
    Runtime(#[from] igloo_runtime::RuntimeError),
    #[error("{step} failed: {source}")]
    Provision {
        step: &'static str,
        #[source]
        source: igloo_runtime::RuntimeError,
    },
    #[error("init script '{name}' failed: {source}")]
    Script {
        name: String,
        #[source]
        source: igloo_runtime::RuntimeError,
    },
    #[error("guest did not report readiness within {}s", .0.as_secs())]
    ReadinessTimeout(Duration),
    #[error("guest reported a provisioning error: {0}")]
    GuestReportedError(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("environment '{0}' does not exist")]
    EnvNotFound(String),
    #[error("environment '{0}' is in use by another igloo process")]
    Locked(String),
    #[error("invalid readiness options: {0}")]
    InvalidOptions(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a failure affects the command that hit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Abort the command.
    Fatal,
    /// Warn and continue; the environment may lack some functionality.
    Degraded,
    /// A valid zero-state, not an error.
    BenignAbsence,
}

impl CoreError {
    pub fn severity(&self) -> Severity {
        match self {
            Self::ReadinessTimeout(_) | Self::GuestReportedError(_) => Severity::Degraded,
            Self::Store(e) if !e.is_config_error() => Severity::Degraded,
            Self::EnvNotFound(_)
            | Self::Runtime(
                igloo_runtime::RuntimeError::InstanceNotFound(_)
                | igloo_runtime::RuntimeError::DeviceNotFound { .. },
            ) => Severity::BenignAbsence,
            _ => Severity::Fatal,
        }
    }
}
