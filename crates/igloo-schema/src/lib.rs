//! Declared configuration for igloo environments.
//!
//! This crate defines the schema layer: TOML manifest parsing and writing
//! (`EnvironmentManifest`), the normalized declared state the engine works
//! from (`Environment`), project-relative and guest-side paths
//! (`ProjectPaths`), the supported distro catalog, and identifier newtypes.

pub mod distro;
pub mod manifest;
pub mod normalize;
pub mod project;
pub mod types;

pub use distro::{
    default_release, detect_host_os, detect_host_os_from, host_os_from_release, image_reference,
    parse_os_release, validate_distro, DistroError, SUPPORTED_DISTROS,
};
pub use manifest::{
    parse_manifest_file, parse_manifest_str, validate_env_name, write_manifest_file,
    ContainerSection, DisplaySection, EnvironmentManifest, ManifestError, MountsSection,
    PackagesSection, SymlinksSection,
};
pub use normalize::{normalize_package_list, DisplayIntent, Environment, MountIntent};
pub use project::{ProjectPaths, CONFIG_DIR, MANIFEST_FILE, SCRIPTS_DIR};
pub use types::{Fingerprint, InstanceName};
