//! Fingerprint persistence and data directory layout for igloo.
//!
//! `compute_fingerprint` folds a configuration tree through blake3,
//! `FingerprintStore` keeps one digest record per environment name under
//! the data directory, and `StoreLayout` owns the directory structure.

pub mod fingerprint;
pub mod layout;
pub mod records;

pub use fingerprint::compute_fingerprint;
pub use layout::{default_data_dir, StoreLayout};
pub use records::{DriftCheck, FingerprintStore};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fsync a directory so a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to read configuration tree at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("configuration directory not found: {0}")]
    ConfigMissing(PathBuf),
    #[error("malformed fingerprint record for '{name}': {reason}")]
    MalformedRecord { name: String, reason: String },
    #[error("invalid environment name: {0}")]
    InvalidName(String),
}

impl StoreError {
    /// True for failures reading the declared configuration itself, as
    /// opposed to failures on the persisted record.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigRead { .. } | Self::ConfigMissing(_))
    }
}
