//! Supported distributions and host OS detection for `igloo init`.

use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Distribution name, supported releases (newest first).
pub const SUPPORTED_DISTROS: &[(&str, &[&str])] = &[
    ("ubuntu", &["questing", "plucky", "noble", "jammy", "focal"]),
    ("debian", &["trixie", "bookworm", "bullseye"]),
    ("fedora", &["43", "42", "41", "40", "39"]),
    ("archlinux", &["current"]),
];

const FALLBACK: (&str, &str) = ("ubuntu", "questing");

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DistroError {
    #[error("unsupported distribution: {0} (supported: ubuntu, debian, fedora, archlinux)")]
    UnsupportedDistro(String),
    #[error("unsupported release '{release}' for {distro} (supported: {supported})")]
    UnsupportedRelease {
        distro: String,
        release: String,
        supported: String,
    },
}

fn releases(distro: &str) -> Option<&'static [&'static str]> {
    SUPPORTED_DISTROS
        .iter()
        .find(|(name, _)| *name == distro)
        .map(|(_, r)| *r)
}

pub fn validate_distro(distro: &str, release: &str) -> Result<(), DistroError> {
    let known = releases(distro).ok_or_else(|| DistroError::UnsupportedDistro(distro.to_owned()))?;
    if known.contains(&release) {
        Ok(())
    } else {
        Err(DistroError::UnsupportedRelease {
            distro: distro.to_owned(),
            release: release.to_owned(),
            supported: known.join(", "),
        })
    }
}

/// Newest supported release of `distro`.
pub fn default_release(distro: &str) -> Option<&'static str> {
    releases(distro).and_then(|r| r.first().copied())
}

/// Cloud-enabled image reference for the incus `images:` remote.
pub fn image_reference(distro: &str, release: &str) -> String {
    format!("images:{distro}/{release}/cloud")
}

/// Parse `/etc/os-release` content into key/value pairs, unquoting values.
pub fn parse_os_release(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_owned(), v.trim().trim_matches('"').to_owned()))
        .collect()
}

/// Map os-release fields to a supported `(distro, release)` pair.
///
/// Unknown distros fall back to ubuntu/questing; known distros with an
/// unknown release fall back to that distro's newest release.
pub fn host_os_from_release(fields: &HashMap<String, String>) -> (String, String) {
    let distro = fields
        .get("ID")
        .map(|s| s.to_lowercase())
        .unwrap_or_default();
    if releases(&distro).is_none() {
        return (FALLBACK.0.to_owned(), FALLBACK.1.to_owned());
    }
    let release = match distro.as_str() {
        "fedora" => fields.get("VERSION_ID").cloned().unwrap_or_default(),
        "archlinux" => "current".to_owned(),
        _ => fields
            .get("VERSION_CODENAME")
            .map(|s| s.to_lowercase())
            .unwrap_or_default(),
    };
    if validate_distro(&distro, &release).is_ok() {
        (distro, release)
    } else {
        let fallback = default_release(&distro).unwrap_or(FALLBACK.1).to_owned();
        (distro, fallback)
    }
}

/// Detect the host distro from `/etc/os-release`.
pub fn detect_host_os() -> (String, String) {
    detect_host_os_from(Path::new("/etc/os-release"))
}

pub fn detect_host_os_from(path: &Path) -> (String, String) {
    match std::fs::read_to_string(path) {
        Ok(content) => host_os_from_release(&parse_os_release(&content)),
        Err(_) => (FALLBACK.0.to_owned(), FALLBACK.1.to_owned()),
    }
}
