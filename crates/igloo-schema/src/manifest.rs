use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("failed to serialize manifest: {0}")]
    SerializeToml(#[from] toml::ser::Error),
    #[error("container.image must not be empty")]
    EmptyImage,
    #[error("invalid environment name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("invalid symlink path '{0}': must be relative and must not contain '..'")]
    InvalidSymlink(String),
}

/// On-disk form of `.igloo/igloo.toml`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentManifest {
    pub container: ContainerSection,
    #[serde(default)]
    pub packages: PackagesSection,
    #[serde(default)]
    pub mounts: MountsSection,
    #[serde(default)]
    pub display: DisplaySection,
    #[serde(default, skip_serializing_if = "SymlinksSection::is_empty")]
    pub symlinks: SymlinksSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ContainerSection {
    pub name: String,
    pub image: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PackagesSection {
    /// Comma-separated package names, as typed by the user.
    #[serde(default)]
    pub install: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MountsSection {
    #[serde(default = "default_true")]
    pub home: bool,
    #[serde(default = "default_true")]
    pub project: bool,
}

impl Default for MountsSection {
    fn default() -> Self {
        Self {
            home: true,
            project: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DisplaySection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub gpu: bool,
}

/// Entries under `~/host` that get linked into the guest home directory.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SymlinksSection {
    #[serde(default)]
    pub paths: Vec<String>,
}

impl SymlinksSection {
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

fn default_true() -> bool {
    true
}

/// Validate a name as a backend instance name.
///
/// Instance names double as file names for the fingerprint record and the
/// per-environment lock, so the accepted alphabet is deliberately narrow.
pub fn validate_env_name(name: &str) -> Result<(), ManifestError> {
    let invalid = |reason| ManifestError::InvalidName {
        name: name.to_owned(),
        reason,
    };
    if name.is_empty() || name.len() > 63 {
        return Err(invalid("must be 1-63 characters"));
    }
    if !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
        return Err(invalid("must match [a-zA-Z0-9-]"));
    }
    if !name.as_bytes()[0].is_ascii_alphabetic() {
        return Err(invalid("must start with a letter"));
    }
    if name.ends_with('-') {
        return Err(invalid("must not end with '-'"));
    }
    Ok(())
}

impl EnvironmentManifest {
    pub fn validate(&self) -> Result<(), ManifestError> {
        validate_env_name(&self.container.name)?;
        if self.container.image.trim().is_empty() {
            return Err(ManifestError::EmptyImage);
        }
        for path in &self.symlinks.paths {
            let p = Path::new(path.trim());
            if path.trim().is_empty()
                || p.is_absolute()
                || p.components()
                    .any(|c| matches!(c, std::path::Component::ParentDir))
            {
                return Err(ManifestError::InvalidSymlink(path.clone()));
            }
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String, ManifestError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

pub fn parse_manifest_str(input: &str) -> Result<EnvironmentManifest, ManifestError> {
    let manifest: EnvironmentManifest = toml::from_str(input)?;
    manifest.validate()?;
    Ok(manifest)
}

pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<EnvironmentManifest, ManifestError> {
    let content = fs::read_to_string(path)?;
    parse_manifest_str(&content)
}

/// Write the manifest atomically: temp file in the same directory, fsync, rename.
pub fn write_manifest_file(
    path: &Path,
    manifest: &EnvironmentManifest,
) -> Result<(), ManifestError> {
    manifest.validate()?;
    let content = manifest.to_toml_string()?;
    let dir = path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    fs::create_dir_all(&dir)?;
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| ManifestError::Io(e.error))?;
    Ok(())
}
