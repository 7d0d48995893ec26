use crate::StoreError;
use igloo_schema::Fingerprint;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Compute the blake3 digest of a configuration tree.
///
/// Entries are visited depth-first with siblings sorted by name. Each
/// directory contributes `dir:<rel>\n`; each file contributes
/// `file:<rel>:<len>\n` followed by its bytes, streamed. Symlinks contribute
/// their target without being followed. The length prefix keeps file
/// boundaries unambiguous, so moving bytes between adjacent files changes
/// the digest.
pub fn compute_fingerprint(dir: &Path) -> Result<Fingerprint, StoreError> {
    let meta = fs::metadata(dir).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            StoreError::ConfigMissing(dir.to_path_buf())
        } else {
            read_err(dir, e)
        }
    })?;
    if !meta.is_dir() {
        return Err(StoreError::ConfigMissing(dir.to_path_buf()));
    }

    let mut hasher = blake3::Hasher::new();
    hasher.update(b"dir:.\n");
    walk(dir, dir, &mut hasher)?;
    Ok(Fingerprint::new(hasher.finalize().to_hex().to_string()))
}

fn read_err(path: &Path, source: io::Error) -> StoreError {
    StoreError::ConfigRead {
        path: path.to_path_buf(),
        source,
    }
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn walk(root: &Path, dir: &Path, hasher: &mut blake3::Hasher) -> Result<(), StoreError> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| read_err(dir, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()
        .map_err(|e| read_err(dir, e))?;
    entries.sort();

    for path in entries {
        let rel = relative(root, &path);
        let file_type = fs::symlink_metadata(&path)
            .map_err(|e| read_err(&path, e))?
            .file_type();

        if file_type.is_symlink() {
            let target = fs::read_link(&path).map_err(|e| read_err(&path, e))?;
            hasher.update(format!("link:{rel}->{}\n", target.to_string_lossy()).as_bytes());
        } else if file_type.is_dir() {
            hasher.update(format!("dir:{rel}\n").as_bytes());
            walk(root, &path, hasher)?;
        } else {
            let mut file = fs::File::open(&path).map_err(|e| read_err(&path, e))?;
            let len = file.metadata().map_err(|e| read_err(&path, e))?.len();
            hasher.update(format!("file:{rel}:{len}\n").as_bytes());
            io::copy(&mut file, hasher).map_err(|e| read_err(&path, e))?;
        }
    }
    Ok(())
}
