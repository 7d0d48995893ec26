use crate::fingerprint::compute_fingerprint;
use crate::layout::StoreLayout;
use crate::StoreError;
use igloo_schema::{validate_env_name, Fingerprint};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Outcome of comparing the live configuration tree with its stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftCheck {
    /// True only when a record exists and differs from `current`.
    pub changed: bool,
    pub current: Fingerprint,
    pub stored: Option<Fingerprint>,
}

impl DriftCheck {
    pub fn is_first_observation(&self) -> bool {
        self.stored.is_none()
    }
}

/// Per-environment fingerprint records under `<data>/fingerprints/`.
///
/// Each record is a single line holding the hex digest. Records are keyed
/// by instance name and are independent of both the project tree and the
/// instance lifecycle; callers clear them explicitly on destroy.
pub struct FingerprintStore {
    layout: StoreLayout,
}

impl FingerprintStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    fn check_name(name: &str) -> Result<(), StoreError> {
        validate_env_name(name).map_err(|e| StoreError::InvalidName(e.to_string()))
    }

    /// Stored digest for `name`, or `None` when no record exists.
    pub fn get_stored(&self, name: &str) -> Result<Option<Fingerprint>, StoreError> {
        Self::check_name(name)?;
        let path = self.layout.fingerprint_file(name);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let digest = content.trim();
        if digest.is_empty() || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(StoreError::MalformedRecord {
                name: name.to_owned(),
                reason: "record is not a hex digest".to_owned(),
            });
        }
        Ok(Some(Fingerprint::new(digest)))
    }

    /// Persist `digest` for `name` atomically (temp file, fsync, rename).
    pub fn store(&self, name: &str, digest: &Fingerprint) -> Result<(), StoreError> {
        Self::check_name(name)?;
        let dir = self.layout.fingerprints_dir();
        fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        writeln!(tmp, "{digest}")?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.layout.fingerprint_file(name))
            .map_err(|e| StoreError::Io(e.error))?;
        crate::fsync_dir(&dir)?;
        debug!("stored fingerprint {} for {name}", digest.short());
        Ok(())
    }

    /// Delete the record for `name`. Returns whether a record existed.
    pub fn remove(&self, name: &str) -> Result<bool, StoreError> {
        Self::check_name(name)?;
        match fs::remove_file(self.layout.fingerprint_file(name)) {
            Ok(()) => {
                debug!("removed fingerprint record for {name}");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Compare the digest of `config_dir` against the record for `name`.
    ///
    /// Absence of a record is not drift. Configuration read errors are
    /// reported before the record is consulted, so callers can tell them
    /// apart with [`StoreError::is_config_error`].
    pub fn has_changed(&self, name: &str, config_dir: &Path) -> Result<DriftCheck, StoreError> {
        let current = compute_fingerprint(config_dir)?;
        let stored = self.get_stored(name)?;
        let changed = stored.as_ref().is_some_and(|s| *s != current);
        Ok(DriftCheck {
            changed,
            current,
            stored,
        })
    }

    /// Names with a stored record, sorted.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.layout.fingerprints_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let file_name = entry?.file_name();
            let file_name = file_name.to_string_lossy();
            if let Some(name) = file_name.strip_suffix(".hash") {
                names.push(name.to_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}
