use std::path::{Path, PathBuf};

/// Project-local configuration directory.
pub const CONFIG_DIR: &str = ".igloo";
pub const MANIFEST_FILE: &str = "igloo.toml";
/// Init scripts, relative to [`CONFIG_DIR`].
pub const SCRIPTS_DIR: &str = "scripts";

/// Host and guest paths derived from a project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    root: PathBuf,
    name: String,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let name = root
            .file_name()
            .map_or_else(|| "project".to_owned(), |n| n.to_string_lossy().into_owned());
        Self { root, name }
    }

    pub fn from_current_dir() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Base name of the project root, used for the guest workspace path.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn config_dir(&self) -> PathBuf {
        self.root.join(CONFIG_DIR)
    }

    #[inline]
    pub fn manifest_path(&self) -> PathBuf {
        self.config_dir().join(MANIFEST_FILE)
    }

    #[inline]
    pub fn scripts_dir(&self) -> PathBuf {
        self.config_dir().join(SCRIPTS_DIR)
    }

    /// Default instance name offered by `init`: `igloo-<project>`, with
    /// characters outside `[a-zA-Z0-9-]` replaced by `-`.
    pub fn default_env_name(&self) -> String {
        let mut sanitized: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        while sanitized.contains("--") {
            sanitized = sanitized.replace("--", "-");
        }
        let mut name = format!("igloo-{}", sanitized.trim_matches('-'));
        name.truncate(63);
        name.trim_end_matches('-').to_owned()
    }

    /// Guest home directory of `username`.
    pub fn guest_home(username: &str) -> String {
        format!("/home/{username}")
    }

    /// Mount target of the project inside the guest: `~/workspace/<project>`.
    pub fn guest_workspace(&self, username: &str) -> String {
        format!("{}/workspace/{}", Self::guest_home(username), self.name)
    }

    /// Mount target of the host home directory inside the guest.
    pub fn guest_host_home(username: &str) -> String {
        format!("{}/host", Self::guest_home(username))
    }

    /// Scripts directory as seen from inside the guest through the project mount.
    pub fn guest_scripts_dir(&self, username: &str) -> String {
        format!(
            "{}/{CONFIG_DIR}/{SCRIPTS_DIR}",
            self.guest_workspace(username)
        )
    }
}
