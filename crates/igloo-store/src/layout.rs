use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};

const FINGERPRINTS_DIR: &str = "fingerprints";
const LOCKS_DIR: &str = "locks";

/// Directory layout of the igloo data directory.
///
/// Lives outside any project tree so drift history survives removal of
/// `.igloo/`. Subdirectories are created on [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn fingerprints_dir(&self) -> PathBuf {
        self.root.join(FINGERPRINTS_DIR)
    }

    #[inline]
    pub fn fingerprint_file(&self, name: &str) -> PathBuf {
        self.fingerprints_dir().join(format!("{name}.hash"))
    }

    #[inline]
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join(LOCKS_DIR)
    }

    #[inline]
    pub fn lock_file(&self, name: &str) -> PathBuf {
        self.locks_dir().join(format!("{name}.lock"))
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.fingerprints_dir())?;
        fs::create_dir_all(self.locks_dir())?;
        Ok(())
    }

    /// True when the root exists and a probe file can be created in it.
    pub fn is_writable(&self) -> bool {
        tempfile::NamedTempFile::new_in(&self.root).is_ok()
    }
}

/// `$XDG_DATA_HOME/igloo`, else `$HOME/.local/share/igloo`, else a
/// relative `.igloo-data` as a last resort.
pub fn default_data_dir() -> PathBuf {
    data_dir_from(
        std::env::var_os("XDG_DATA_HOME").map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
    )
}

fn data_dir_from(xdg_data_home: Option<PathBuf>, home: Option<PathBuf>) -> PathBuf {
    match (xdg_data_home, home) {
        (Some(xdg), _) if xdg.is_absolute() => xdg.join("igloo"),
        (_, Some(home)) => home.join(".local").join("share").join("igloo"),
        _ => PathBuf::from(".igloo-data"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = StoreLayout::new("/data/igloo");
        assert_eq!(
            layout.fingerprint_file("igloo-demo"),
            PathBuf::from("/data/igloo/fingerprints/igloo-demo.hash")
        );
        assert_eq!(
            layout.lock_file("igloo-demo"),
            PathBuf::from("/data/igloo/locks/igloo-demo.lock")
        );
    }

    #[test]
    fn initialize_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path().join("data"));
        layout.initialize().unwrap();
        assert!(layout.fingerprints_dir().is_dir());
        assert!(layout.locks_dir().is_dir());
        assert!(layout.is_writable());
        layout.initialize().unwrap();
    }

    #[test]
    fn data_dir_prefers_xdg() {
        assert_eq!(
            data_dir_from(Some("/x".into()), Some("/home/u".into())),
            PathBuf::from("/x/igloo")
        );
        assert_eq!(
            data_dir_from(Some("relative".into()), Some("/home/u".into())),
            PathBuf::from("/home/u/.local/share/igloo")
        );
        assert_eq!(
            data_dir_from(None, Some("/home/u".into())),
            PathBuf::from("/home/u/.local/share/igloo")
        );
        assert_eq!(data_dir_from(None, None), PathBuf::from(".igloo-data"));
    }
}
