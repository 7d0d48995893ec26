use crate::manifest::{EnvironmentManifest, ManifestError};
use crate::types::InstanceName;
use serde::{Deserialize, Serialize};

/// Declared desired state of one development container.
///
/// Produced from a validated manifest; never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub name: InstanceName,
    pub image: String,
    pub mounts: MountIntent,
    pub display: DisplayIntent,
    /// Cleaned package list: trimmed, blanks dropped, declaration order kept.
    pub packages: Vec<String>,
    pub symlinks: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountIntent {
    pub home: bool,
    pub project: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayIntent {
    pub enabled: bool,
    pub gpu: bool,
}

/// Split a comma-separated install list, trimming names and dropping blanks.
pub fn normalize_package_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_owned)
        .collect()
}

impl EnvironmentManifest {
    pub fn normalize(&self) -> Result<Environment, ManifestError> {
        self.validate()?;
        Ok(Environment {
            name: InstanceName::new(self.container.name.trim()),
            image: self.container.image.trim().to_owned(),
            mounts: MountIntent {
                home: self.mounts.home,
                project: self.mounts.project,
            },
            display: DisplayIntent {
                enabled: self.display.enabled,
                gpu: self.display.gpu,
            },
            packages: normalize_package_list(&self.packages.install),
            symlinks: self
                .symlinks
                .paths
                .iter()
                .map(|p| p.trim().to_owned())
                .collect(),
        })
    }
}

impl Environment {
    /// Convenience constructor used by tests and by `init`.
    pub fn new(name: &str, image: &str) -> Self {
        Self {
            name: InstanceName::new(name),
            image: image.to_owned(),
            mounts: MountIntent {
                home: true,
                project: true,
            },
            display: DisplayIntent {
                enabled: false,
                gpu: false,
            },
            packages: Vec::new(),
            symlinks: Vec::new(),
        }
    }
}
